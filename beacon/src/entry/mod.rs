//! Produce the next relay entry with a group's threshold key.
//!
//! Members sign the previous entry with their private share and exchange the
//! resulting signature shares. Any `honest_threshold` valid shares combine
//! into the same group signature, which becomes the new entry. The entry is
//! then submitted by the first eligible member, exactly as agreed DKG results
//! are (see [crate::submission]).

use crate::{
    chain::{self, BlockCounter, Relay},
    group::MemberIndex,
    p2p, signer,
    submission::{self, Outcome, Race},
};
use thiserror::Error;
use tracing::info;

pub mod states;

/// Namespace of signature shares over relay entries.
pub const NAMESPACE: &[u8] = b"_COMMONWARE_BEACON_RELAY_ENTRY";

/// Errors that can occur while producing a relay entry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not enough signature shares: {have} < {need}")]
    NotEnoughShares { have: usize, need: usize },
    #[error("sender {0} is not a valid member")]
    InvalidMember(MemberIndex),
    #[error("sender {0} is not operating")]
    NotOperating(MemberIndex),
    #[error("share of sender {0} has a mismatched index")]
    ShareIndexMismatch(MemberIndex),
    #[error("invalid signature share from {0}")]
    InvalidShare(MemberIndex),
    #[error("duplicate signature share from {0}")]
    DuplicateShare(MemberIndex),
    #[error("combined entry does not verify")]
    InvalidEntry,
    #[error("entry was not combined before submission")]
    NotCombined,
    #[error("unexpected message type")]
    UnexpectedMessage,
    #[error("signer: {0}")]
    Signer(#[from] signer::Error),
    #[error("chain: {0}")]
    Chain(#[from] chain::Error),
    #[error("channel: {0}")]
    Channel(#[from] p2p::Error),
}

/// Submits `entry` once `member` is eligible, unless another member gets an
/// entry accepted first.
pub async fn submit_relay_entry<R: Relay>(
    relay: &R,
    member: MemberIndex,
    entry: &[u8],
    start_block: u64,
) -> Result<Outcome, Error> {
    // Subscribe before checking so a concurrent acceptance is not missed
    let accepted = relay.on_relay_entry_submitted();
    if !relay.is_entry_in_progress().await? {
        info!(member, "relay entry already submitted");
        return Ok(Outcome::AlreadySubmitted);
    }

    let block_counter = relay.block_counter();
    let step = relay.config().relay_entry_submission_block_step;
    let eligible = submission::eligible_block(start_block, member, step);
    info!(
        member,
        eligible,
        current = block_counter.current_block(),
        "waiting to submit relay entry"
    );
    match submission::race(&block_counter, eligible, accepted, |_| true).await? {
        Race::Eligible(height) => {
            let accepted = relay.submit_relay_entry(entry).await?;
            info!(member, height, accepted, "submitted relay entry");
            Ok(Outcome::Submitted(accepted))
        }
        Race::Accepted(event) => {
            info!(member, height = event.block, "relay entry submitted by another member");
            Ok(Outcome::Preempted(event.block))
        }
    }
}
