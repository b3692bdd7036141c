use crate::{
    chain::{
        self, DkgResultSubmitted, GroupSelectionRequested, Relay, RelayEntryRequested,
        RelayEntrySubmitted,
    },
    group::MemberIndex,
    result::{DkgResult, NAMESPACE},
};
use commonware_cryptography::PublicKey;
use commonware_runtime::{Clock, Metrics, Spawner};
use futures::channel::{mpsc, oneshot};
use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::debug;

/// Configuration for the mock [Chain].
#[derive(Clone, Debug)]
pub struct Config {
    pub chain: chain::Config,

    /// Time between blocks.
    pub block_time: Duration,
}

#[derive(Default)]
struct Height {
    height: u64,
    waiters: BTreeMap<u64, Vec<oneshot::Sender<u64>>>,
}

/// Block counter driven by the mock [Chain].
#[derive(Clone, Default)]
pub struct BlockCounter {
    inner: Arc<Mutex<Height>>,
}

impl BlockCounter {
    /// Produces a block and wakes every waiter it satisfies.
    fn advance(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.height += 1;
        let height = inner.height;
        let pending = inner.waiters.split_off(&(height + 1));
        let ready = mem::replace(&mut inner.waiters, pending);
        drop(inner);
        for waiter in ready.into_values().flatten() {
            let _ = waiter.send(height);
        }
        height
    }
}

impl chain::BlockCounter for BlockCounter {
    fn current_block(&self) -> u64 {
        self.inner.lock().unwrap().height
    }

    fn block_height_waiter(&self, height: u64) -> oneshot::Receiver<u64> {
        let (sender, receiver) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        if inner.height >= height {
            let _ = sender.send(inner.height);
        } else {
            inner.waiters.entry(height).or_default().push(sender);
        }
        receiver
    }
}

struct Subscribers<T: Clone>(Vec<mpsc::UnboundedSender<T>>);

impl<T: Clone> Default for Subscribers<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Clone> Subscribers<T> {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<T> {
        let (sender, receiver) = mpsc::unbounded();
        self.0.push(sender);
        receiver
    }

    fn notify(&mut self, event: T) {
        self.0
            .retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct State {
    /// Registered groups and whether they are stale.
    groups: BTreeMap<Vec<u8>, bool>,

    /// Seeds of group selections with an accepted result.
    selections: BTreeSet<u64>,
    dkg_submissions: Vec<(MemberIndex, DkgResult, usize)>,
    entries: Vec<Vec<u8>>,
    request: Option<RelayEntryRequested>,
    timeouts: usize,

    dkg_subscribers: Subscribers<DkgResultSubmitted>,
    entry_subscribers: Subscribers<RelayEntrySubmitted>,
    request_subscribers: Subscribers<RelayEntryRequested>,
    selection_subscribers: Subscribers<GroupSelectionRequested>,
}

/// In-memory chain that produces blocks at a fixed interval.
///
/// Every group is formed from the same operators, in the order given.
#[derive(Clone)]
pub struct Chain<P: PublicKey> {
    config: chain::Config,
    operators: Arc<Vec<P>>,
    counter: BlockCounter,
    state: Arc<Mutex<State>>,
}

impl<P: PublicKey> Chain<P> {
    /// Creates the chain and starts producing blocks.
    pub fn new<E: Spawner + Clock + Metrics>(context: E, cfg: Config, operators: Vec<P>) -> Self {
        let counter = BlockCounter::default();
        context.with_label("blocks").spawn({
            let counter = counter.clone();
            move |context| async move {
                loop {
                    context.sleep(cfg.block_time).await;
                    let height = counter.advance();
                    debug!(height, "produced block");
                }
            }
        });
        Self {
            config: cfg.chain,
            operators: Arc::new(operators),
            counter,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Returns every accepted DKG result as (submitter, result, signature count).
    pub fn dkg_submissions(&self) -> Vec<(MemberIndex, DkgResult, usize)> {
        self.state.lock().unwrap().dkg_submissions.clone()
    }

    /// Returns every accepted relay entry.
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().entries.clone()
    }

    /// Returns the number of timeouts reported.
    pub fn timeouts_reported(&self) -> usize {
        self.state.lock().unwrap().timeouts
    }

    /// Requests a new relay entry from the group with the given public key.
    pub fn request_relay_entry(
        &self,
        group_public_key: Vec<u8>,
        previous_entry: Vec<u8>,
    ) -> RelayEntryRequested {
        let request = RelayEntryRequested {
            group_public_key,
            previous_entry,
            block: chain::BlockCounter::current_block(&self.counter),
        };
        let mut state = self.state.lock().unwrap();
        state.request = Some(request.clone());
        state.request_subscribers.notify(request.clone());
        request
    }

    /// Requests that a new group be formed.
    pub fn request_group_selection(&self, seed: u64) -> GroupSelectionRequested {
        let selection = GroupSelectionRequested {
            seed,
            block: chain::BlockCounter::current_block(&self.counter),
        };
        self.state
            .lock()
            .unwrap()
            .selection_subscribers
            .notify(selection.clone());
        selection
    }

    /// Marks a registered group as stale.
    pub fn mark_stale(&self, group_public_key: &[u8]) {
        if let Some(stale) = self.state.lock().unwrap().groups.get_mut(group_public_key) {
            *stale = true;
        }
    }
}

impl<P: PublicKey> Relay for Chain<P> {
    type PublicKey = P;
    type BlockCounter = BlockCounter;

    fn config(&self) -> chain::Config {
        self.config.clone()
    }

    fn block_counter(&self) -> BlockCounter {
        self.counter.clone()
    }

    async fn is_dkg_result_submitted(&self, seed: u64) -> Result<bool, chain::Error> {
        Ok(self.state.lock().unwrap().selections.contains(&seed))
    }

    async fn is_stale_group(&self, group_public_key: &[u8]) -> Result<bool, chain::Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .groups
            .get(group_public_key)
            .copied()
            .unwrap_or(false))
    }

    async fn submit_dkg_result(
        &self,
        seed: u64,
        submitter: MemberIndex,
        result: &DkgResult,
        signatures: &BTreeMap<MemberIndex, P::Signature>,
    ) -> Result<u64, chain::Error> {
        // Validate supporting signatures
        if signatures.len() < self.config.honest_threshold as usize {
            return Err(chain::Error::SubmissionRejected(format!(
                "{} signatures is below the honest threshold",
                signatures.len()
            )));
        }
        let digest = result.digest();
        for (index, signature) in signatures {
            let Some(operator) = (*index as usize)
                .checked_sub(1)
                .and_then(|position| self.operators.get(position))
            else {
                return Err(chain::Error::SubmissionRejected(format!(
                    "unknown member {index}"
                )));
            };
            if !operator.verify(Some(NAMESPACE), &digest, signature) {
                return Err(chain::Error::SubmissionRejected(format!(
                    "invalid signature from member {index}"
                )));
            }
        }

        // Register group
        let block = chain::BlockCounter::current_block(&self.counter);
        let mut state = self.state.lock().unwrap();
        if state.selections.contains(&seed) {
            return Err(chain::Error::SubmissionRejected(format!(
                "result for selection {seed} already accepted"
            )));
        }
        if state.groups.contains_key(&result.group_public_key) {
            return Err(chain::Error::SubmissionRejected(
                "group already registered".into(),
            ));
        }
        state.selections.insert(seed);
        state.groups.insert(result.group_public_key.clone(), false);
        state
            .dkg_submissions
            .push((submitter, result.clone(), signatures.len()));
        state.dkg_subscribers.notify(DkgResultSubmitted {
            seed,
            submitter,
            group_public_key: result.group_public_key.clone(),
            block,
        });
        Ok(block)
    }

    fn on_dkg_result_submitted(&self) -> mpsc::UnboundedReceiver<DkgResultSubmitted> {
        self.state.lock().unwrap().dkg_subscribers.subscribe()
    }

    async fn submit_relay_entry(&self, entry: &[u8]) -> Result<u64, chain::Error> {
        let block = chain::BlockCounter::current_block(&self.counter);
        let mut state = self.state.lock().unwrap();
        if state.request.take().is_none() {
            return Err(chain::Error::NoRequestInProgress);
        }
        state.entries.push(entry.to_vec());
        state.entry_subscribers.notify(RelayEntrySubmitted {
            entry: entry.to_vec(),
            block,
        });
        Ok(block)
    }

    fn on_relay_entry_submitted(&self) -> mpsc::UnboundedReceiver<RelayEntrySubmitted> {
        self.state.lock().unwrap().entry_subscribers.subscribe()
    }

    fn on_relay_entry_requested(&self) -> mpsc::UnboundedReceiver<RelayEntryRequested> {
        self.state.lock().unwrap().request_subscribers.subscribe()
    }

    fn on_group_selection_requested(&self) -> mpsc::UnboundedReceiver<GroupSelectionRequested> {
        self.state.lock().unwrap().selection_subscribers.subscribe()
    }

    async fn is_entry_in_progress(&self) -> Result<bool, chain::Error> {
        Ok(self.state.lock().unwrap().request.is_some())
    }

    async fn current_request(&self) -> Result<RelayEntryRequested, chain::Error> {
        self.state
            .lock()
            .unwrap()
            .request
            .clone()
            .ok_or(chain::Error::NoRequestInProgress)
    }

    async fn report_relay_entry_timeout(&self) -> Result<(), chain::Error> {
        let mut state = self.state.lock().unwrap();
        if state.request.take().is_none() {
            return Err(chain::Error::NoRequestInProgress);
        }
        state.timeouts += 1;
        Ok(())
    }

    async fn select_group(&self, _seed: u64) -> Result<Vec<P>, chain::Error> {
        Ok(self.operators.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::BlockCounter as _;
    use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    #[test_traced]
    fn test_block_production() {
        let executor = deterministic::Runner::timed(Duration::from_secs(30));
        executor.start(|context| async move {
            let chain = Chain::new(
                context.with_label("chain"),
                Config {
                    chain: chain::Config {
                        group_size: 1,
                        honest_threshold: 1,
                        result_publication_block_step: 1,
                        relay_entry_submission_block_step: 1,
                        relay_entry_timeout: 5,
                    },
                    block_time: Duration::from_secs(1),
                },
                vec![ed25519::PrivateKey::from_seed(0).public_key()],
            );
            let counter = chain.block_counter();
            assert_eq!(counter.wait_for_block_height(4).await.unwrap(), 4);

            // Reached heights resolve immediately
            assert_eq!(counter.wait_for_block_height(2).await.unwrap(), 4);

            // Requests are served once
            let request = chain.request_relay_entry(vec![1], vec![2]);
            assert_eq!(request.block, 4);
            assert!(chain.is_entry_in_progress().await.unwrap());
            assert_eq!(chain.submit_relay_entry(&[3]).await.unwrap(), 4);
            assert!(!chain.is_entry_in_progress().await.unwrap());
            assert!(matches!(
                chain.submit_relay_entry(&[4]).await,
                Err(chain::Error::NoRequestInProgress)
            ));
            assert_eq!(chain.entries(), vec![vec![3]]);
        });
    }
}
