//! Generate a group key and publish the agreed outcome.
//!
//! # Overview
//!
//! [execute] sequences one member's participation in forming a group:
//!
//! 1. Runs key generation through a [KeyGenerator] to obtain the group
//!    public polynomial, the member's private share, and the member's final
//!    view of which members misbehaved.
//! 2. Starts computing every member's public key share in the background.
//!    This can take a long time for large groups.
//! 3. Runs result agreement ([crate::result]) starting
//!    `publication_delay_blocks` after key generation ended, leaving the
//!    background computation time to finish without holding up the
//!    submission race.
//! 4. Joins both into a [ThresholdSigner] and returns it as a [Membership],
//!    along with the final view of the group's faults.

use crate::{
    chain::{self, Relay},
    group::{Group, MemberIndex},
    membership::Validator,
    p2p::Channel,
    registry::Membership,
    result::{self, signing::SigningMember, states, DkgResult},
    signer::ThresholdSigner,
    state::{self, Machine},
};
use commonware_cryptography::{
    bls12381::{
        dkg::ops::evaluate_all,
        primitives::{group::Share, poly, variant::Variant},
    },
    Signer,
};
use commonware_runtime::{Metrics, Spawner};
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while forming a group.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("result publication failed: {0}")]
    Publication(#[from] state::Error<result::Error>),
    #[error("result publication ended in phase {0}")]
    UnexpectedFinalState(&'static str),
    #[error("group is beyond its fault threshold")]
    ThresholdNotSatisfied,
    #[error("public key share computation aborted")]
    PublicKeySharesAborted,
    #[error("chain: {0}")]
    Chain(#[from] chain::Error),
}

/// Output of key generation for one member.
pub struct Output<V: Variant> {
    /// Final view of the group's members and faults.
    pub group: Group,

    /// Public polynomial of the group key.
    pub public: poly::Public<V>,

    /// The member's private share.
    pub share: Share,

    /// Block at which key generation ended.
    pub end_block: u64,
}

/// Runs the key generation sub-protocol.
pub trait KeyGenerator<V: Variant>: Clone + Send + Sync + 'static {
    /// Runs key generation for `member` in the group seeded by `seed`,
    /// starting at `start_block`.
    fn generate(
        &self,
        member: MemberIndex,
        seed: u64,
        start_block: u64,
    ) -> impl Future<Output = Result<Output<V>, Error>> + Send;
}

/// Configuration for [execute].
pub struct Config<C: Signer, K, R, N> {
    /// Operator key used to sign the result.
    pub signer: C,

    /// Position of the member in the group.
    pub member_index: MemberIndex,

    /// Operators selected for the group, in member order.
    pub validator: Validator<C::PublicKey>,

    pub key_generator: K,
    pub relay: R,
    pub channel: N,

    /// Seed the group was selected with.
    pub seed: u64,

    /// Blocks between the end of key generation and result publication.
    pub publication_delay_blocks: u64,
}

/// Forms a group and returns the member's membership in it.
pub async fn execute<E, C, V, K, R, N>(
    context: E,
    cfg: Config<C, K, R, N>,
    start_block: u64,
) -> Result<Membership<C::PublicKey, V>, Error>
where
    E: Spawner + Metrics,
    C: Signer,
    V: Variant,
    K: KeyGenerator<V>,
    R: Relay<PublicKey = C::PublicKey>,
    N: Channel<PublicKey = C::PublicKey>,
{
    let member = cfg.member_index;
    let group_size = cfg.relay.config().group_size as u32;

    // Generate key
    let output = cfg
        .key_generator
        .generate(member, cfg.seed, start_block)
        .await?;
    info!(
        member,
        end_block = output.end_block,
        operating = output.group.operating_member_ids().len(),
        "key generation completed"
    );

    // Compute public key shares in the background
    let public = output.public.clone();
    let public_key_shares = context
        .with_label("public_key_shares")
        .spawn(move |_| async move { evaluate_all::<V>(&public, group_size) });

    // Agree on and publish the result
    let signer = ThresholdSigner::new(member, group_size, output.public, output.share);
    let result = DkgResult::new(signer.group_public_key_bytes(), &output.group);
    let threshold_satisfied = output.group.is_threshold_satisfied();
    let publication_start = output.end_block + cfg.publication_delay_blocks;
    let initial = states::State::<C, V, R, N>::new(states::Context::new(
        SigningMember::new(member, cfg.signer),
        output.group.clone(),
        result,
        cfg.relay.clone(),
        cfg.channel.clone(),
        cfg.validator.clone(),
        cfg.seed,
        publication_start,
    ));
    let machine = Machine::new(
        context.with_label("result_publication"),
        state::Config {
            block_counter: cfg.relay.block_counter(),
            channel: cfg.channel,
            validator: Some(cfg.validator.clone()),
        },
        initial,
    );
    let (last, end) = machine.execute(publication_start).await?;
    let Some(outcome) = last.outcome() else {
        return Err(Error::UnexpectedFinalState(state::Phase::name(&last)));
    };
    info!(member, ?outcome, end, "result publication completed");
    if !threshold_satisfied {
        warn!(member, "group exceeded its fault threshold");
        return Err(Error::ThresholdNotSatisfied);
    }

    // Join the background computation
    let public_key_shares = public_key_shares
        .await
        .map_err(|_| Error::PublicKeySharesAborted)?;
    Ok(Membership {
        signer: signer.with_public_key_shares(public_key_shares),
        validator: cfg.validator,
        group: output.group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks, p2p::Provider as _};
    use commonware_cryptography::{
        bls12381::primitives::variant::MinSig, ed25519, PrivateKeyExt as _, Signer as _,
    };
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use std::time::Duration;

    const GROUP_SIZE: u8 = 7;
    const HONEST_THRESHOLD: u8 = 4;

    fn start_chain(
        context: &deterministic::Context,
    ) -> (mocks::Chain<ed25519::PublicKey>, Vec<ed25519::PrivateKey>) {
        let signers: Vec<_> = (1..=GROUP_SIZE as u64)
            .map(ed25519::PrivateKey::from_seed)
            .collect();
        let chain = mocks::Chain::new(
            context.with_label("chain"),
            mocks::ChainConfig {
                chain: chain::Config {
                    group_size: GROUP_SIZE,
                    honest_threshold: HONEST_THRESHOLD,
                    result_publication_block_step: 1,
                    relay_entry_submission_block_step: 1,
                    relay_entry_timeout: 10,
                },
                block_time: Duration::from_secs(1),
            },
            signers.iter().map(|signer| signer.public_key()).collect(),
        );
        (chain, signers)
    }

    #[test_traced]
    fn test_threshold_not_satisfied() {
        let executor = deterministic::Runner::timed(Duration::from_secs(120));
        executor.start(|context| async move {
            let (chain, signers) = start_chain(&context);
            let network = mocks::Network::new();
            let validator = Validator::new(signers.iter().map(|s| s.public_key()).collect());

            // Two inactive members exceed half the dishonest threshold of 3
            let dealer = mocks::Dealer::new(chain.block_counter(), GROUP_SIZE, HONEST_THRESHOLD, 2)
                .with_inactive([6, 7]);
            let mut handles = Vec::new();
            for member in 1..=5 {
                let signer = signers[member as usize - 1].clone();
                let cfg = Config {
                    channel: network.register(signer.public_key()).channel("dkg"),
                    signer,
                    member_index: member,
                    validator: validator.clone(),
                    key_generator: dealer.clone(),
                    relay: chain.clone(),
                    seed: 3,
                    publication_delay_blocks: 1,
                };
                handles.push(
                    context
                        .with_label(&format!("member_{member}"))
                        .spawn(move |context| execute::<_, _, MinSig, _, _, _>(context, cfg, 0)),
                );
            }
            for handle in handles {
                assert!(matches!(
                    handle.await.unwrap(),
                    Err(Error::ThresholdNotSatisfied)
                ));
            }

            // The result is still published so the chain learns of the faults
            let submissions = chain.dkg_submissions();
            assert_eq!(submissions.len(), 1);
            assert_eq!(submissions[0].1.inactive, vec![0, 0, 0, 0, 0, 1, 1]);
        });
    }

    #[test_traced]
    fn test_key_generation_failure() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let (chain, signers) = start_chain(&context);
            let signer = signers[0].clone();
            let dealer = mocks::Dealer::new(chain.block_counter(), GROUP_SIZE, HONEST_THRESHOLD, 2);
            let cfg = Config {
                channel: mocks::Network::new()
                    .register(signer.public_key())
                    .channel("dkg"),
                validator: Validator::new(vec![signer.public_key()]),
                signer,
                member_index: GROUP_SIZE + 1,
                key_generator: dealer,
                relay: chain.clone(),
                seed: 3,
                publication_delay_blocks: 1,
            };
            let result = execute::<_, _, MinSig, _, _, _>(context.with_label("member"), cfg, 0).await;
            assert!(matches!(result, Err(Error::KeyGeneration(_))));
            assert!(chain.dkg_submissions().is_empty());
        });
    }
}
