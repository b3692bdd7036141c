//! Produce publicly verifiable randomness with threshold groups coordinated by a chain.
//!
//! # Overview
//!
//! Operators are selected into groups by the chain. Each group runs key
//! generation to obtain a shared BLS public key ([dkg]), agrees on the outcome
//! of key generation and publishes it ([result]), and then answers relay
//! requests by combining threshold signature shares over the previous entry
//! into the next one ([entry]).
//!
//! Members never coordinate through a leader. Instead, every protocol is a
//! sequence of phases run by a [state::Machine] in lock-step with block height:
//! all members observe the same chain, so they all move to the next phase at
//! the same block. Publishing to the chain uses an eligibility order
//! ([submission]) so that, in the common case, only one member pays for the
//! submission while any surviving member eventually submits if others fail.
//!
//! Each member tracks which members misbehaved in a [group::Group]: a member
//! that sends invalid data is disqualified, a member that sends nothing is
//! inactive. A group with too many faulty members is not used.
//!
//! # Status
//!
//! `commonware-beacon` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

pub mod chain;
pub mod config;
pub mod dkg;
pub mod entry;
pub mod group;
pub mod membership;
pub mod node;
pub mod p2p;
pub mod registry;
pub mod result;
pub mod signer;
pub mod state;
pub mod submission;
pub mod wire;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
