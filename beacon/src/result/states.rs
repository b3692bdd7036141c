//! Phases of the result agreement protocol.

use super::{signing::SigningMember, submission::SubmittingMember, DkgResult, Error};
use crate::{
    chain::Relay,
    config::{
        MESSAGING_ACTIVE_BLOCKS, MESSAGING_DELAY_BLOCKS, SILENT_ACTIVE_BLOCKS, SILENT_DELAY_BLOCKS,
    },
    group::{Group, MemberIndex},
    membership::Validator,
    p2p::Channel,
    state::Phase,
    submission::Outcome,
    wire::{Message, ResultSignature},
};
use commonware_codec::Encode;
use commonware_cryptography::{bls12381::primitives::variant::Variant, Signer};
use std::{collections::BTreeMap, marker::PhantomData, mem};
use tracing::{debug, info};

/// Shared by every phase of one member's run.
pub struct Context<C: Signer, V: Variant, R: Relay, N: Channel> {
    pub member: SigningMember<C>,
    pub group: Group,
    pub result: DkgResult,
    pub relay: R,
    pub channel: N,
    pub validator: Validator<C::PublicKey>,

    /// Seed of the group selection being published.
    pub seed: u64,

    /// Block height the run's schedule starts from.
    pub start_block: u64,

    _variant: PhantomData<V>,
}

impl<C: Signer, V: Variant, R: Relay, N: Channel> Context<C, V, R, N> {
    pub fn new(
        member: SigningMember<C>,
        group: Group,
        result: DkgResult,
        relay: R,
        channel: N,
        validator: Validator<C::PublicKey>,
        seed: u64,
        start_block: u64,
    ) -> Self {
        Self {
            member,
            group,
            result,
            relay,
            channel,
            validator,
            seed,
            start_block,
            _variant: PhantomData,
        }
    }
}

impl<C: Signer, V: Variant, R: Relay, N: Channel> Clone for Context<C, V, R, N> {
    fn clone(&self) -> Self {
        Self {
            member: self.member.clone(),
            group: self.group.clone(),
            result: self.result.clone(),
            relay: self.relay.clone(),
            channel: self.channel.clone(),
            validator: self.validator.clone(),
            seed: self.seed,
            start_block: self.start_block,
            _variant: PhantomData,
        }
    }
}

type Signatures<C> = BTreeMap<MemberIndex, <C as Signer>::Signature>;

/// Phase of the result agreement protocol.
pub enum State<C: Signer, V: Variant, R: Relay, N: Channel> {
    /// Sign the preferred result and collect the signatures of others.
    Signing {
        context: Context<C, V, R, N>,
        messages: Vec<ResultSignature<C::PublicKey>>,
    },

    /// Keep only valid signatures over the preferred result.
    Verification {
        context: Context<C, V, R, N>,
        messages: Vec<ResultSignature<C::PublicKey>>,
        signatures: Signatures<C>,
    },

    /// Publish the result once eligible.
    Submission {
        context: Context<C, V, R, N>,
        signatures: Signatures<C>,
        outcome: Option<Outcome>,
    },
}

impl<C, V, R, N> State<C, V, R, N>
where
    C: Signer,
    V: Variant,
    R: Relay<PublicKey = C::PublicKey>,
    N: Channel<PublicKey = C::PublicKey>,
{
    /// Returns the initial phase of a run.
    pub fn new(context: Context<C, V, R, N>) -> Self {
        State::Signing {
            context,
            messages: Vec::new(),
        }
    }

    fn context(&self) -> &Context<C, V, R, N> {
        match self {
            State::Signing { context, .. }
            | State::Verification { context, .. }
            | State::Submission { context, .. } => context,
        }
    }

    /// Returns how publication concluded, if the run reached submission.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            State::Submission { outcome, .. } => *outcome,
            _ => None,
        }
    }

    /// Block at which submission eligibility is counted from.
    fn submission_start(start_block: u64) -> u64 {
        start_block
            + MESSAGING_DELAY_BLOCKS
            + MESSAGING_ACTIVE_BLOCKS
            + SILENT_DELAY_BLOCKS
            + SILENT_ACTIVE_BLOCKS
    }

    /// Checks that a signature message may be folded into the signing phase.
    ///
    /// Returns false for the member's own echo.
    fn accept(
        context: &Context<C, V, R, N>,
        sender: &C::PublicKey,
        message: &ResultSignature<C::PublicKey>,
    ) -> Result<bool, Error> {
        if message.sender == context.member.index() {
            return Ok(false);
        }
        if message.public_key != *sender {
            return Err(Error::PublicKeyMismatch(message.sender));
        }
        if !context.validator.is_valid_membership(message.sender, sender) {
            return Err(Error::InvalidMember(message.sender));
        }
        if !context.group.is_operating(message.sender) {
            return Err(Error::NotOperating(message.sender));
        }
        Ok(true)
    }
}

impl<C, V, R, N> Phase for State<C, V, R, N>
where
    C: Signer,
    V: Variant,
    R: Relay<PublicKey = C::PublicKey>,
    N: Channel<PublicKey = C::PublicKey>,
{
    type PublicKey = C::PublicKey;
    type Message = Message<C::PublicKey, V>;
    type Error = Error;

    fn name(&self) -> &'static str {
        match self {
            State::Signing { .. } => "result_signing",
            State::Verification { .. } => "signatures_verification",
            State::Submission { .. } => "result_submission",
        }
    }

    fn delay_blocks(&self) -> u64 {
        match self {
            State::Signing { .. } => MESSAGING_DELAY_BLOCKS,
            _ => SILENT_DELAY_BLOCKS,
        }
    }

    fn active_blocks(&self) -> u64 {
        match self {
            State::Signing { .. } => MESSAGING_ACTIVE_BLOCKS,
            _ => SILENT_ACTIVE_BLOCKS,
        }
    }

    async fn initiate(&mut self) -> Result<(), Error> {
        match self {
            State::Signing { context, .. } => {
                let message = context.member.sign_dkg_result(&context.result);
                debug!(
                    member = message.sender,
                    hash = ?message.result_hash,
                    "broadcasting result signature"
                );
                let message = Message::<C::PublicKey, V>::ResultSignature(message);
                context.channel.send(message.encode().freeze()).await?;
            }
            State::Verification {
                context,
                messages,
                signatures,
            } => {
                *signatures = context.member.verify_dkg_result_signatures(messages)?;
                info!(
                    member = context.member.index(),
                    received = messages.len(),
                    accepted = signatures.len(),
                    "verified result signatures"
                );
            }
            State::Submission {
                context,
                signatures,
                outcome,
            } => {
                let start = Self::submission_start(context.start_block);
                let submitter = SubmittingMember::new(context.member.index(), context.seed);
                *outcome = Some(
                    submitter
                        .submit_dkg_result(&context.relay, &context.result, signatures, start)
                        .await?,
                );
            }
        }
        Ok(())
    }

    fn receive(&mut self, sender: &C::PublicKey, message: Self::Message) -> Result<(), Error> {
        let State::Signing { context, messages } = self else {
            return Ok(());
        };
        let Message::ResultSignature(message) = message else {
            return Err(Error::UnexpectedMessage);
        };
        if Self::accept(context, sender, &message)? {
            messages.push(message);
        }
        Ok(())
    }

    fn next(&mut self) -> Option<Self> {
        match self {
            State::Signing { context, messages } => Some(State::Verification {
                context: context.clone(),
                messages: mem::take(messages),
                signatures: BTreeMap::new(),
            }),
            State::Verification {
                context,
                signatures,
                ..
            } => Some(State::Submission {
                context: context.clone(),
                signatures: mem::take(signatures),
                outcome: None,
            }),
            State::Submission { .. } => None,
        }
    }

    fn member_index(&self) -> MemberIndex {
        self.context().member.index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain, mocks, p2p::Provider as _};
    use commonware_cryptography::{bls12381::primitives::variant::MinSig, ed25519, PrivateKeyExt};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics as _, Runner};
    use std::time::Duration;

    type TestState = State<
        ed25519::PrivateKey,
        MinSig,
        mocks::Chain<ed25519::PublicKey>,
        mocks::Channel<ed25519::PublicKey>,
    >;

    fn key(index: MemberIndex) -> ed25519::PrivateKey {
        ed25519::PrivateKey::from_seed(index as u64)
    }

    #[test_traced]
    fn test_signing_acceptance() {
        let executor = deterministic::Runner::timed(Duration::from_secs(10));
        executor.start(|context| async move {
            let operators: Vec<_> = (1..=4).map(|index| key(index).public_key()).collect();
            let chain = mocks::Chain::new(
                context.with_label("chain"),
                mocks::ChainConfig {
                    chain: chain::Config {
                        group_size: 4,
                        honest_threshold: 3,
                        result_publication_block_step: 1,
                        relay_entry_submission_block_step: 1,
                        relay_entry_timeout: 10,
                    },
                    block_time: Duration::from_secs(1),
                },
                operators.clone(),
            );
            let network = mocks::Network::new();
            let mut group = Group::new(1, 4);
            group.mark_member_as_inactive(4);
            let result = DkgResult::new(vec![1, 2, 3], &group);
            let mut state: TestState = State::new(Context::new(
                SigningMember::new(1, key(1)),
                group,
                result.clone(),
                chain,
                network.register(operators[0].clone()).channel("dkg"),
                Validator::new(operators.clone()),
                1,
                0,
            ));

            let signed = |index: MemberIndex| {
                let mut member = SigningMember::new(index, key(index));
                member.sign_dkg_result(&result)
            };

            // Accepted
            state
                .receive(&operators[1], Message::ResultSignature(signed(2)))
                .unwrap();

            // Embedded key differs from the transport identity
            assert!(matches!(
                state.receive(&operators[3], Message::ResultSignature(signed(3))),
                Err(Error::PublicKeyMismatch(3))
            ));

            // Claimed index does not belong to the key
            let mut claimed = signed(3);
            claimed.sender = 2;
            assert!(matches!(
                state.receive(&operators[2], Message::ResultSignature(claimed)),
                Err(Error::InvalidMember(2))
            ));

            // Sender not operating
            assert!(matches!(
                state.receive(&operators[3], Message::ResultSignature(signed(4))),
                Err(Error::NotOperating(4))
            ));

            // Own echo ignored, duplicates kept for verification
            state
                .receive(&operators[0], Message::ResultSignature(signed(1)))
                .unwrap();
            state
                .receive(&operators[1], Message::ResultSignature(signed(2)))
                .unwrap();

            let State::Signing { messages, .. } = &state else {
                panic!("unexpected phase");
            };
            assert_eq!(
                messages.iter().map(|m| m.sender).collect::<Vec<_>>(),
                vec![2, 2]
            );

            // Transitions
            let mut verification = state.next().unwrap();
            assert_eq!(verification.name(), "signatures_verification");
            let mut submission = verification.next().unwrap();
            assert_eq!(submission.name(), "result_submission");
            assert!(submission.next().is_none());
        });
    }
}
