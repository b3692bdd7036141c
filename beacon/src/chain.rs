//! Interfaces to the ledger the beacon publishes to.
//!
//! The beacon only needs a handful of capabilities from the chain: a shared
//! block-height clock, a way to submit agreed results, and notifications when
//! some member (possibly another one) got a submission accepted.

use crate::{group::MemberIndex, result::DkgResult};
use commonware_cryptography::{PublicKey, Verifier};
use futures::channel::{mpsc, oneshot};
use std::{collections::BTreeMap, future::Future};
use thiserror::Error;

/// Errors returned by chain collaborators.
#[derive(Debug, Error)]
pub enum Error {
    #[error("block counter closed")]
    BlockCounterClosed,
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("event subscription closed")]
    SubscriptionClosed,
    #[error("no relay request in progress")]
    NoRequestInProgress,
}

/// Parameters of the beacon that are fixed by the chain.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of members in every group.
    pub group_size: u8,

    /// Minimum number of honest members required to produce a group signature.
    pub honest_threshold: u8,

    /// Blocks between consecutive members becoming eligible to submit a DKG result.
    pub result_publication_block_step: u64,

    /// Blocks between consecutive members becoming eligible to submit a relay entry.
    pub relay_entry_submission_block_step: u64,

    /// Blocks after a relay request starts before it may be reported as timed out.
    pub relay_entry_timeout: u64,
}

/// Shared block-height clock.
pub trait BlockCounter: Clone + Send + Sync + 'static {
    /// Returns the latest observed block height.
    fn current_block(&self) -> u64;

    /// Registers a one-shot waiter that resolves with the observed height once
    /// the chain reaches at least `height`.
    ///
    /// If the height was already reached, the waiter resolves immediately. The
    /// waiter is canceled if the counter shuts down.
    fn block_height_waiter(&self, height: u64) -> oneshot::Receiver<u64>;

    /// Suspends until the chain reaches at least `height`.
    fn wait_for_block_height(&self, height: u64) -> impl Future<Output = Result<u64, Error>> + Send {
        let waiter = self.block_height_waiter(height);
        async move { waiter.await.map_err(|_| Error::BlockCounterClosed) }
    }
}

/// Emitted when a DKG result is accepted on chain.
#[derive(Clone, Debug)]
pub struct DkgResultSubmitted {
    /// Seed of the group selection the result belongs to.
    pub seed: u64,
    pub submitter: MemberIndex,
    pub group_public_key: Vec<u8>,
    pub block: u64,
}

/// Emitted when a relay entry is accepted on chain.
#[derive(Clone, Debug)]
pub struct RelayEntrySubmitted {
    pub entry: Vec<u8>,
    pub block: u64,
}

/// Emitted when a new relay entry is requested from a group.
#[derive(Clone, Debug)]
pub struct RelayEntryRequested {
    pub group_public_key: Vec<u8>,
    pub previous_entry: Vec<u8>,
    pub block: u64,
}

/// Emitted when a new group must be formed.
#[derive(Clone, Debug)]
pub struct GroupSelectionRequested {
    pub seed: u64,
    pub block: u64,
}

/// Relay interface of the beacon contract.
///
/// Event subscriptions are unbounded receivers: dropping the receiver
/// unsubscribes.
pub trait Relay: Clone + Send + Sync + 'static {
    /// Operator identity used to sign DKG results.
    type PublicKey: PublicKey;

    /// Block counter backed by this chain.
    type BlockCounter: BlockCounter;

    /// Returns the chain parameters.
    fn config(&self) -> Config;

    /// Returns the chain's block counter.
    fn block_counter(&self) -> Self::BlockCounter;

    /// Returns true if a result was already accepted for the group selected
    /// with `seed`.
    fn is_dkg_result_submitted(
        &self,
        seed: u64,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Returns true if the group was marked stale and can be forgotten.
    fn is_stale_group(
        &self,
        group_public_key: &[u8],
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Submits the DKG result of the group selected with `seed`, along with
    /// the supporting operator signatures.
    ///
    /// Returns the block at which the result was accepted.
    fn submit_dkg_result(
        &self,
        seed: u64,
        submitter: MemberIndex,
        result: &DkgResult,
        signatures: &BTreeMap<MemberIndex, <Self::PublicKey as Verifier>::Signature>,
    ) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Subscribes to accepted DKG results.
    fn on_dkg_result_submitted(&self) -> mpsc::UnboundedReceiver<DkgResultSubmitted>;

    /// Submits a relay entry and returns the block at which it was accepted.
    fn submit_relay_entry(&self, entry: &[u8]) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Subscribes to accepted relay entries.
    fn on_relay_entry_submitted(&self) -> mpsc::UnboundedReceiver<RelayEntrySubmitted>;

    /// Subscribes to relay entry requests.
    fn on_relay_entry_requested(&self) -> mpsc::UnboundedReceiver<RelayEntryRequested>;

    /// Subscribes to group selection requests.
    fn on_group_selection_requested(&self) -> mpsc::UnboundedReceiver<GroupSelectionRequested>;

    /// Returns true if a relay entry was requested and not yet submitted.
    fn is_entry_in_progress(&self) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Returns the relay request currently in progress.
    fn current_request(
        &self,
    ) -> impl Future<Output = Result<RelayEntryRequested, Error>> + Send;

    /// Reports that the request in progress was not served in time.
    fn report_relay_entry_timeout(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Returns the operators selected (in member order) for the group seeded by `seed`.
    fn select_group(
        &self,
        seed: u64,
    ) -> impl Future<Output = Result<Vec<Self::PublicKey>, Error>> + Send;
}
