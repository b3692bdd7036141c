//! Order members so that usually only one of them submits to the chain.
//!
//! Member `i` becomes eligible to submit at `start + (i - 1) * step`. While
//! waiting, it listens for the chain to accept a submission from someone
//! else. If that happens first, the member stands down: losing the race is
//! the expected outcome for every member but the first operating one. Since
//! every member eventually becomes eligible, a submission is made as long as
//! one member remains.

use crate::{
    chain::{self, BlockCounter},
    group::MemberIndex,
};
use commonware_macros::select;
use futures::{channel::mpsc, StreamExt};

/// Returns the first block at which `index` may submit.
pub fn eligible_block(start: u64, index: MemberIndex, step: u64) -> u64 {
    start + (index.saturating_sub(1) as u64) * step
}

/// How a submission attempt concluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// This member's submission was accepted by the chain at the given height.
    Submitted(u64),

    /// Another member's submission was accepted at the given height before
    /// this member became eligible.
    Preempted(u64),

    /// A submission was accepted before the attempt started.
    AlreadySubmitted,
}

/// Winner of [race].
pub enum Race<T> {
    /// The eligible height was reached first.
    Eligible(u64),

    /// A relevant acceptance event arrived first.
    Accepted(T),
}

/// Waits until either the chain reaches `eligible` or `accepted` yields an
/// event for which `relevant` returns true.
///
/// `accepted` must be subscribed before checking whether a submission was
/// already accepted, so that no acceptance is missed between the check and
/// the wait. The subscription is dropped when this returns.
pub async fn race<B: BlockCounter, T>(
    block_counter: &B,
    eligible: u64,
    mut accepted: mpsc::UnboundedReceiver<T>,
    relevant: impl Fn(&T) -> bool,
) -> Result<Race<T>, chain::Error> {
    let mut waiter = block_counter.block_height_waiter(eligible);
    let mut subscribed = true;
    loop {
        if !subscribed {
            let height = waiter.await.map_err(|_| chain::Error::BlockCounterClosed)?;
            return Ok(Race::Eligible(height));
        }
        select! {
            event = accepted.next() => {
                match event {
                    Some(event) if relevant(&event) => return Ok(Race::Accepted(event)),
                    Some(_) => {},
                    None => subscribed = false,
                }
            },
            height = &mut waiter => {
                let height = height.map_err(|_| chain::Error::BlockCounterClosed)?;
                return Ok(Race::Eligible(height));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::Relay as _, mocks};
    use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics as _, Runner};
    use std::time::Duration;

    #[test]
    fn test_eligible_block() {
        assert_eq!(eligible_block(100, 1, 5), 100);
        assert_eq!(eligible_block(100, 2, 5), 105);
        assert_eq!(eligible_block(100, 7, 5), 130);
        assert_eq!(eligible_block(100, 7, 0), 100);
    }

    #[test_traced]
    fn test_race() {
        let executor = deterministic::Runner::timed(Duration::from_secs(60));
        executor.start(|context| async move {
            let chain = mocks::Chain::new(
                context.with_label("chain"),
                mocks::ChainConfig {
                    chain: chain::Config {
                        group_size: 1,
                        honest_threshold: 1,
                        result_publication_block_step: 1,
                        relay_entry_submission_block_step: 1,
                        relay_entry_timeout: 10,
                    },
                    block_time: Duration::from_secs(1),
                },
                vec![ed25519::PrivateKey::from_seed(0).public_key()],
            );
            let counter = chain.block_counter();

            // Nothing accepted: eligible height wins
            let (_sender, receiver) = mpsc::unbounded::<u64>();
            match race(&counter, 3, receiver, |_| true).await.unwrap() {
                Race::Eligible(height) => assert_eq!(height, 3),
                Race::Accepted(_) => panic!("unexpected acceptance"),
            }

            // Relevant acceptance arrives first
            let (sender, receiver) = mpsc::unbounded::<u64>();
            sender.unbounded_send(1).unwrap();
            sender.unbounded_send(2).unwrap();
            match race(&counter, 10, receiver, |event| *event == 2).await.unwrap() {
                Race::Accepted(event) => assert_eq!(event, 2),
                Race::Eligible(_) => panic!("unexpected eligibility"),
            }
            assert!(counter.current_block() < 10);

            // Closed subscription falls back to the eligible height
            let (sender, receiver) = mpsc::unbounded::<u64>();
            drop(sender);
            match race(&counter, 6, receiver, |_| true).await.unwrap() {
                Race::Eligible(height) => assert_eq!(height, 6),
                Race::Accepted(_) => panic!("unexpected acceptance"),
            }
        });
    }
}
