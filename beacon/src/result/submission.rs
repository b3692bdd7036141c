//! Publish an agreed result once the member becomes eligible.

use super::{DkgResult, Error};
use crate::{
    chain::{BlockCounter, Relay},
    group::MemberIndex,
    submission::{self, Outcome, Race},
};
use commonware_cryptography::Verifier;
use std::collections::BTreeMap;
use tracing::info;

/// Returns the number of signatures required before a result is submitted.
///
/// The honest threshold plus half of the remaining members.
pub fn minimum_signatures(group_size: usize, honest_threshold: usize) -> usize {
    honest_threshold + group_size.saturating_sub(honest_threshold) / 2
}

/// A member publishing the result of the group selected with `seed`.
pub struct SubmittingMember {
    index: MemberIndex,
    seed: u64,
}

impl SubmittingMember {
    pub fn new(index: MemberIndex, seed: u64) -> Self {
        Self { index, seed }
    }

    /// Submits `result` with its supporting `signatures` once this member is
    /// eligible, unless another member gets a result for the same group
    /// selection accepted first. Results accepted for other selections are
    /// ignored.
    ///
    /// Fails without submitting if there are fewer signatures than
    /// [minimum_signatures].
    pub async fn submit_dkg_result<R: Relay>(
        &self,
        relay: &R,
        result: &DkgResult,
        signatures: &BTreeMap<MemberIndex, <R::PublicKey as Verifier>::Signature>,
        start_block: u64,
    ) -> Result<Outcome, Error> {
        let config = relay.config();
        let need = minimum_signatures(
            config.group_size as usize,
            config.honest_threshold as usize,
        );
        if signatures.len() < need {
            return Err(Error::NotEnoughSignatures {
                have: signatures.len(),
                need,
            });
        }

        // Subscribe before checking so a concurrent acceptance is not missed
        let accepted = relay.on_dkg_result_submitted();
        if relay.is_dkg_result_submitted(self.seed).await? {
            info!(member = self.index, seed = self.seed, "result already submitted");
            return Ok(Outcome::AlreadySubmitted);
        }

        let block_counter = relay.block_counter();
        let eligible = submission::eligible_block(
            start_block,
            self.index,
            config.result_publication_block_step,
        );
        info!(
            member = self.index,
            seed = self.seed,
            eligible,
            current = block_counter.current_block(),
            "waiting to submit result"
        );
        let seed = self.seed;
        match submission::race(&block_counter, eligible, accepted, |event| event.seed == seed)
            .await?
        {
            Race::Eligible(height) => {
                let accepted = relay
                    .submit_dkg_result(seed, self.index, result, signatures)
                    .await?;
                info!(member = self.index, seed, height, accepted, "submitted result");
                Ok(Outcome::Submitted(accepted))
            }
            Race::Accepted(event) => {
                info!(
                    member = self.index,
                    submitter = event.submitter,
                    height = event.block,
                    "result submitted by another member"
                );
                Ok(Outcome::Preempted(event.block))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain, group::Group, mocks, result::signing::SigningMember};
    use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics as _, Runner, Spawner as _};
    use std::time::Duration;

    const GROUP_SIZE: u8 = 5;
    const SEED: u64 = 11;

    fn config() -> chain::Config {
        chain::Config {
            group_size: GROUP_SIZE,
            honest_threshold: 3,
            result_publication_block_step: 3,
            relay_entry_submission_block_step: 1,
            relay_entry_timeout: 10,
        }
    }

    fn start_chain(context: &deterministic::Context) -> mocks::Chain<ed25519::PublicKey> {
        let operators: Vec<_> = (1..=GROUP_SIZE as u64)
            .map(|seed| ed25519::PrivateKey::from_seed(seed).public_key())
            .collect();
        mocks::Chain::new(
            context.with_label("chain"),
            mocks::ChainConfig {
                chain: config(),
                block_time: Duration::from_secs(1),
            },
            operators,
        )
    }

    fn signatures(
        result: &DkgResult,
        count: u8,
    ) -> BTreeMap<MemberIndex, ed25519::Signature> {
        (1..=count)
            .map(|index| {
                let mut member =
                    SigningMember::new(index, ed25519::PrivateKey::from_seed(index as u64));
                (index, member.sign_dkg_result(result).signature)
            })
            .collect()
    }

    #[test]
    fn test_minimum_signatures() {
        assert_eq!(minimum_signatures(5, 3), 4);
        assert_eq!(minimum_signatures(64, 33), 48);
        assert_eq!(minimum_signatures(3, 3), 3);
    }

    #[test_traced]
    fn test_not_enough_signatures() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let chain = start_chain(&context);
            let result = DkgResult::new(vec![7; 8], &Group::new(2, GROUP_SIZE));
            let err = SubmittingMember::new(1, SEED)
                .submit_dkg_result(&chain, &result, &signatures(&result, 3), 1)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::NotEnoughSignatures { have: 3, need: 4 }
            ));
            assert!(chain.dkg_submissions().is_empty());
        });
    }

    #[test_traced]
    fn test_later_member_stands_down() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = start_chain(&context);
            let result = DkgResult::new(vec![7; 8], &Group::new(2, GROUP_SIZE));
            let signatures = signatures(&result, 4);

            // Members 2 and 3 compete, starting at block 5
            let mut handles = Vec::new();
            for index in [3, 2] {
                let chain = chain.clone();
                let result = result.clone();
                let signatures = signatures.clone();
                handles.push(context.with_label(&format!("member_{index}")).spawn(
                    move |_| async move {
                        SubmittingMember::new(index, SEED)
                            .submit_dkg_result(&chain, &result, &signatures, 5)
                            .await
                    },
                ));
            }
            let third = handles.remove(0).await.unwrap().unwrap();
            let second = handles.remove(0).await.unwrap().unwrap();
            assert_eq!(second, Outcome::Submitted(8));
            assert_eq!(third, Outcome::Preempted(8));

            // Only one submission reached the chain
            let submissions = chain.dkg_submissions();
            assert_eq!(submissions.len(), 1);
            assert_eq!(submissions[0].0, 2);

            // A late member sees the registered group and does nothing
            let late = SubmittingMember::new(1, SEED)
                .submit_dkg_result(&chain, &result, &signatures, 5)
                .await
                .unwrap();
            assert_eq!(late, Outcome::AlreadySubmitted);
            assert_eq!(chain.dkg_submissions().len(), 1);
        });
    }

    #[test_traced]
    fn test_concurrent_selections() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = start_chain(&context);
            let first = DkgResult::new(vec![7; 8], &Group::new(2, GROUP_SIZE));
            let second = DkgResult::new(vec![9; 8], &Group::new(2, GROUP_SIZE));

            // Member 1 of the second selection is eligible at block 5, members
            // 2 and 3 of the first selection at blocks 8 and 11
            let mut handles = Vec::new();
            for (seed, index, result) in [
                (SEED + 1, 1, second.clone()),
                (SEED, 2, first.clone()),
                (SEED, 3, first.clone()),
            ] {
                let chain = chain.clone();
                let signatures = signatures(&result, 4);
                handles.push(
                    context
                        .with_label(&format!("selection_{seed}_member_{index}"))
                        .spawn(move |_| async move {
                            SubmittingMember::new(index, seed)
                                .submit_dkg_result(&chain, &result, &signatures, 5)
                                .await
                        }),
                );
            }
            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await.unwrap().unwrap());
            }
            assert_eq!(
                outcomes,
                vec![
                    Outcome::Submitted(5),
                    Outcome::Submitted(8),
                    Outcome::Preempted(8)
                ]
            );

            // Both groups were published
            let submitted: Vec<_> = chain
                .dkg_submissions()
                .into_iter()
                .map(|(submitter, result, _)| (submitter, result.group_public_key))
                .collect();
            assert_eq!(
                submitted,
                vec![(1, second.group_public_key), (2, first.group_public_key)]
            );
            assert!(chain.is_dkg_result_submitted(SEED).await.unwrap());
            assert!(!chain.is_dkg_result_submitted(SEED + 2).await.unwrap());
        });
    }
}
