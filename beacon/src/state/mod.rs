//! Drive a sequence of protocol phases in lock-step with the chain.
//!
//! # Overview
//!
//! A protocol run is a chain of [Phase]s. Members never coordinate phase
//! changes directly: every member derives the same schedule from the block
//! height it started at and from the delay and active windows of each phase.
//!
//! For every phase, the [Machine]:
//!
//! 1. Waits `delay_blocks` after the previous phase ended so slower members
//!    have reached the same boundary before anything is sent.
//! 2. Calls [Phase::initiate], which may broadcast the phase's messages.
//! 3. Delivers every inbound message to [Phase::receive] until the chain
//!    reaches `initiate + active_blocks`.
//! 4. Asks the phase for its successor with [Phase::next]. If there is none,
//!    the run ends in this phase.
//!
//! Messages received while waiting out a delay are queued and delivered once
//! the phase they arrive in has initiated. Failing to initiate a phase aborts
//! the run, while a message that cannot be decoded or is rejected by the
//! phase is only logged.

use crate::{chain, group::MemberIndex};
use commonware_codec::{Decode, Encode};
use commonware_cryptography::PublicKey;
use std::future::Future;
use thiserror::Error;

mod machine;
pub use machine::{Config, Machine};
mod metrics;

/// Errors that abort a [Machine] run.
#[derive(Debug, Error)]
pub enum Error<E: std::error::Error + 'static> {
    #[error("failed to initiate phase {phase}: {source}")]
    Initiate {
        phase: &'static str,
        #[source]
        source: E,
    },
    #[error("chain failure: {0}")]
    Chain(#[from] chain::Error),
    #[error("channel closed")]
    ChannelClosed,
}

/// A unit of protocol work bound to a window of blocks.
pub trait Phase: Sized + Send + 'static {
    /// Transport identity of the members.
    type PublicKey: PublicKey;

    /// Message exchanged while the phase is active.
    type Message: Encode + Decode<Cfg = ()> + Send;

    /// Error returned by [Phase::initiate] and [Phase::receive].
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name of the phase, for logging.
    fn name(&self) -> &'static str;

    /// Blocks to wait after the previous phase ended before initiating.
    fn delay_blocks(&self) -> u64;

    /// Blocks during which the phase accepts messages after initiating.
    fn active_blocks(&self) -> u64;

    /// Performs the phase's computation and sends its messages.
    fn initiate(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Folds one inbound message into the phase.
    ///
    /// Called once per delivered message, including the member's own.
    fn receive(&mut self, sender: &Self::PublicKey, message: Self::Message)
        -> Result<(), Self::Error>;

    /// Produces the successor phase, moving accumulated state forward.
    ///
    /// Returns `None` if the run terminates in this phase.
    fn next(&mut self) -> Option<Self>;

    /// Index of the member executing the phase.
    fn member_index(&self) -> MemberIndex;
}
