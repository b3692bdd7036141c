//! Agree on the outcome of key generation and publish it.
//!
//! Every member hashes the [DkgResult] it computed, signs the hash with its
//! operator key, and broadcasts the signature. Members that computed the same
//! result end up with matching hashes, so collecting valid signatures over
//! one's own hash is how agreement is established: no explicit vote is held.
//! The collected signatures are then submitted to the chain by the first
//! eligible member (see [crate::submission]).
//!
//! The protocol is run by a [crate::state::Machine] over three phases:
//!
//! 1. [states::Signing]: sign and exchange result hashes.
//! 2. [states::Verification]: filter the exchanged signatures.
//! 3. [states::Submission]: publish the result once eligible.

use crate::{chain, group::Group, group::MemberIndex, p2p};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, Read, ReadRangeExt, Write};
use commonware_cryptography::{sha256::Digest, Hasher, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;

pub mod signing;
pub mod states;
pub mod submission;

/// Namespace of operator signatures over result hashes.
pub const NAMESPACE: &[u8] = b"_COMMONWARE_BEACON_DKG_RESULT";

/// Maximum length of an encoded group public key.
pub const MAX_GROUP_PUBLIC_KEY_LENGTH: usize = 256;

/// Maximum number of members in a group.
pub const MAX_GROUP_SIZE: usize = MemberIndex::MAX as usize;

/// Errors that can occur while agreeing on or publishing a result.
#[derive(Debug, Error)]
pub enum Error {
    #[error("result was not signed before verification")]
    NotSigned,
    #[error("not enough signatures: {have} < {need}")]
    NotEnoughSignatures { have: usize, need: usize },
    #[error("sender {0} is not a valid member")]
    InvalidMember(MemberIndex),
    #[error("public key of sender {0} does not match the transport identity")]
    PublicKeyMismatch(MemberIndex),
    #[error("sender {0} is not operating")]
    NotOperating(MemberIndex),
    #[error("unexpected message type")]
    UnexpectedMessage,
    #[error("chain: {0}")]
    Chain(#[from] chain::Error),
    #[error("channel: {0}")]
    Channel(#[from] p2p::Error),
}

/// Outcome of key generation as published on chain.
///
/// `disqualified` and `inactive` hold one byte per member: position `i`
/// (0-based) describes member `i + 1` and is `0x01` if the member was flagged
/// and `0x00` otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkgResult {
    pub group_public_key: Vec<u8>,
    pub disqualified: Vec<u8>,
    pub inactive: Vec<u8>,
}

impl DkgResult {
    /// Build the result of a run from the final group view.
    ///
    /// `group_public_key` is empty if key generation failed.
    pub fn new(group_public_key: Vec<u8>, group: &Group) -> Self {
        let size = group.member_ids().iter().copied().max().unwrap_or(0);
        let flags = |flagged: &BTreeSet<MemberIndex>| -> Vec<u8> {
            (1..=size)
                .map(|index| u8::from(flagged.contains(&index)))
                .collect()
        };
        Self {
            group_public_key,
            disqualified: flags(group.disqualified_member_ids()),
            inactive: flags(group.inactive_member_ids()),
        }
    }

    /// Returns the disqualified members.
    pub fn disqualified_members(&self) -> BTreeSet<MemberIndex> {
        Self::flagged(&self.disqualified)
    }

    /// Returns the inactive members.
    pub fn inactive_members(&self) -> BTreeSet<MemberIndex> {
        Self::flagged(&self.inactive)
    }

    fn flagged(flags: &[u8]) -> BTreeSet<MemberIndex> {
        flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| **flag == 1)
            .filter_map(|(position, _)| MemberIndex::try_from(position + 1).ok())
            .collect()
    }

    /// Returns the hash members sign to express agreement on this result.
    pub fn digest(&self) -> Digest {
        let mut encoded = Vec::with_capacity(self.encode_size());
        self.write(&mut encoded);
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        hasher.finalize()
    }
}

impl Write for DkgResult {
    fn write(&self, buf: &mut impl BufMut) {
        self.group_public_key.write(buf);
        self.disqualified.write(buf);
        self.inactive.write(buf);
    }
}

impl Read for DkgResult {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let group_public_key = Vec::<u8>::read_range(buf, ..=MAX_GROUP_PUBLIC_KEY_LENGTH)?;
        let disqualified = Vec::<u8>::read_range(buf, ..=MAX_GROUP_SIZE)?;
        let inactive = Vec::<u8>::read_range(buf, ..=MAX_GROUP_SIZE)?;
        if disqualified.len() != inactive.len() {
            return Err(CodecError::Invalid(
                "DkgResult",
                "flag arrays differ in length",
            ));
        }
        if disqualified.iter().chain(inactive.iter()).any(|flag| *flag > 1) {
            return Err(CodecError::Invalid("DkgResult", "invalid flag"));
        }
        Ok(Self {
            group_public_key,
            disqualified,
            inactive,
        })
    }
}

impl EncodeSize for DkgResult {
    fn encode_size(&self) -> usize {
        self.group_public_key.encode_size()
            + self.disqualified.encode_size()
            + self.inactive.encode_size()
    }
}
