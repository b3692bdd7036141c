//! Phases of the relay entry protocol.

use super::{submit_relay_entry, Error, NAMESPACE};
use crate::{
    chain::Relay,
    config::{
        MESSAGING_ACTIVE_BLOCKS, MESSAGING_DELAY_BLOCKS, SILENT_ACTIVE_BLOCKS, SILENT_DELAY_BLOCKS,
    },
    group::{Group, MemberIndex},
    membership::Validator,
    p2p::Channel,
    signer::ThresholdSigner,
    state::Phase,
    submission::Outcome,
    wire::{Message, SignatureShare},
};
use commonware_codec::Encode;
use commonware_cryptography::bls12381::primitives::{poly::PartialSignature, variant::Variant};
use std::{collections::BTreeMap, mem};
use tracing::{debug, info};

/// Shared by every phase of one member's run.
#[derive(Clone)]
pub struct Context<V: Variant, R: Relay, N: Channel> {
    pub signer: ThresholdSigner<V>,
    pub group: Group,
    pub previous_entry: Vec<u8>,
    pub relay: R,
    pub channel: N,
    pub validator: Validator<N::PublicKey>,

    /// Block height the run's schedule starts from.
    pub start_block: u64,
}

type Shares<V> = BTreeMap<MemberIndex, PartialSignature<V>>;

/// Phase of the relay entry protocol.
pub enum State<V: Variant, R: Relay, N: Channel> {
    /// Sign the previous entry and collect the shares of others.
    Share {
        context: Context<V, R, N>,
        shares: Shares<V>,
    },

    /// Combine the collected shares into the new entry.
    Combination {
        context: Context<V, R, N>,
        shares: Shares<V>,
        entry: Option<V::Signature>,
    },

    /// Publish the entry once eligible.
    Submission {
        context: Context<V, R, N>,
        entry: Option<V::Signature>,
        outcome: Option<Outcome>,
    },
}

impl<V, R, N> State<V, R, N>
where
    V: Variant,
    R: Relay<PublicKey = N::PublicKey>,
    N: Channel,
{
    /// Returns the initial phase of a run.
    pub fn new(context: Context<V, R, N>) -> Self {
        State::Share {
            context,
            shares: BTreeMap::new(),
        }
    }

    fn context(&self) -> &Context<V, R, N> {
        match self {
            State::Share { context, .. }
            | State::Combination { context, .. }
            | State::Submission { context, .. } => context,
        }
    }

    /// Returns the combined entry, once available.
    pub fn entry(&self) -> Option<&V::Signature> {
        match self {
            State::Share { .. } => None,
            State::Combination { entry, .. } | State::Submission { entry, .. } => entry.as_ref(),
        }
    }

    /// Returns how publication concluded, if the run reached submission.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            State::Submission { outcome, .. } => *outcome,
            _ => None,
        }
    }

    fn submission_start(start_block: u64) -> u64 {
        start_block
            + MESSAGING_DELAY_BLOCKS
            + MESSAGING_ACTIVE_BLOCKS
            + SILENT_DELAY_BLOCKS
            + SILENT_ACTIVE_BLOCKS
    }

    /// Validates a share received during the share phase.
    ///
    /// Returns false for the member's own echo.
    fn accept(
        context: &Context<V, R, N>,
        shares: &Shares<V>,
        sender: &N::PublicKey,
        message: &SignatureShare<V>,
    ) -> Result<bool, Error> {
        let index = message.sender;
        if index == context.signer.member_index() {
            return Ok(false);
        }
        if !context.validator.is_valid_membership(index, sender) {
            return Err(Error::InvalidMember(index));
        }
        if !context.group.is_operating(index) {
            return Err(Error::NotOperating(index));
        }
        if message.share.index + 1 != index as u32 {
            return Err(Error::ShareIndexMismatch(index));
        }
        if shares.contains_key(&index) {
            return Err(Error::DuplicateShare(index));
        }
        if !context
            .signer
            .verify_share(NAMESPACE, &context.previous_entry, &message.share)
        {
            return Err(Error::InvalidShare(index));
        }
        Ok(true)
    }
}

impl<V, R, N> Phase for State<V, R, N>
where
    V: Variant,
    R: Relay<PublicKey = N::PublicKey>,
    N: Channel,
{
    type PublicKey = N::PublicKey;
    type Message = Message<N::PublicKey, V>;
    type Error = Error;

    fn name(&self) -> &'static str {
        match self {
            State::Share { .. } => "signature_share",
            State::Combination { .. } => "signature_combination",
            State::Submission { .. } => "entry_submission",
        }
    }

    fn delay_blocks(&self) -> u64 {
        match self {
            State::Share { .. } => MESSAGING_DELAY_BLOCKS,
            _ => SILENT_DELAY_BLOCKS,
        }
    }

    fn active_blocks(&self) -> u64 {
        match self {
            State::Share { .. } => MESSAGING_ACTIVE_BLOCKS,
            _ => SILENT_ACTIVE_BLOCKS,
        }
    }

    async fn initiate(&mut self) -> Result<(), Error> {
        match self {
            State::Share { context, shares } => {
                let index = context.signer.member_index();
                let share = context.signer.sign_share(NAMESPACE, &context.previous_entry);
                shares.insert(index, share.clone());
                debug!(member = index, "broadcasting signature share");
                let message = Message::<N::PublicKey, V>::SignatureShare(SignatureShare {
                    sender: index,
                    share,
                });
                context.channel.send(message.encode().freeze()).await?;
            }
            State::Combination {
                context,
                shares,
                entry,
            } => {
                let need = context.relay.config().honest_threshold as usize;
                if shares.len() < need {
                    return Err(Error::NotEnoughShares {
                        have: shares.len(),
                        need,
                    });
                }
                let signature = context.signer.combine(need as u32, shares.values())?;
                if !context
                    .signer
                    .verify(NAMESPACE, &context.previous_entry, &signature)
                {
                    return Err(Error::InvalidEntry);
                }
                info!(
                    member = context.signer.member_index(),
                    shares = shares.len(),
                    "combined relay entry"
                );
                *entry = Some(signature);
            }
            State::Submission {
                context,
                entry,
                outcome,
            } => {
                let Some(entry) = entry else {
                    return Err(Error::NotCombined);
                };
                let start = Self::submission_start(context.start_block);
                let encoded = entry.encode();
                *outcome = Some(
                    submit_relay_entry(
                        &context.relay,
                        context.signer.member_index(),
                        &encoded,
                        start,
                    )
                    .await?,
                );
            }
        }
        Ok(())
    }

    fn receive(&mut self, sender: &N::PublicKey, message: Self::Message) -> Result<(), Error> {
        let State::Share { context, shares } = self else {
            return Ok(());
        };
        let Message::SignatureShare(message) = message else {
            return Err(Error::UnexpectedMessage);
        };
        if Self::accept(context, shares, sender, &message)? {
            shares.insert(message.sender, message.share);
        }
        Ok(())
    }

    fn next(&mut self) -> Option<Self> {
        match self {
            State::Share { context, shares } => Some(State::Combination {
                context: context.clone(),
                shares: mem::take(shares),
                entry: None,
            }),
            State::Combination { context, entry, .. } => Some(State::Submission {
                context: context.clone(),
                entry: entry.take(),
                outcome: None,
            }),
            State::Submission { .. } => None,
        }
    }

    fn member_index(&self) -> MemberIndex {
        self.context().signer.member_index()
    }
}
