//! Timing of protocol phases.

/// Blocks a messaging phase waits before initiating, so every member has
/// entered the phase before the first message is sent.
pub const MESSAGING_DELAY_BLOCKS: u64 = 1;

/// Blocks a messaging phase accepts messages for.
pub const MESSAGING_ACTIVE_BLOCKS: u64 = 5;

/// Blocks a compute-only phase waits before initiating.
pub const SILENT_DELAY_BLOCKS: u64 = 0;

/// Blocks a compute-only phase stays active.
pub const SILENT_ACTIVE_BLOCKS: u64 = 0;

/// Default number of blocks between the end of key generation and the start
/// of result publication.
///
/// Gives the background computation of public key shares time to finish
/// without delaying the submission race.
pub const DEFAULT_PUBLICATION_DELAY_BLOCKS: u64 = 3;
