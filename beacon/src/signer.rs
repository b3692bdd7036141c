//! Produce and combine threshold signature shares for a group.

use crate::group::MemberIndex;
use bytes::BufMut;
use commonware_codec::{Encode, EncodeSize, Write};
use commonware_cryptography::bls12381::{
    dkg::ops::evaluate_all,
    primitives::{
        group::Share,
        ops,
        poly::{self, PartialSignature},
        variant::Variant,
    },
};
use std::{fmt, sync::Arc, sync::OnceLock};
use thiserror::Error;

/// Errors that can occur when combining signature shares.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to recover threshold signature")]
    Recovery,
}

/// A member's key material for one group.
///
/// Created once key generation and result agreement succeed. The private
/// share never leaves the signer: it is not part of [fmt::Debug] output and is
/// only encoded by [ThresholdSigner::write_membership] for local persistence.
#[derive(Clone)]
pub struct ThresholdSigner<V: Variant> {
    member_index: MemberIndex,
    group_size: u32,
    public: poly::Public<V>,
    share: Share,
    public_key_shares: Arc<OnceLock<Vec<V::Public>>>,
}

impl<V: Variant> ThresholdSigner<V> {
    pub fn new(
        member_index: MemberIndex,
        group_size: u32,
        public: poly::Public<V>,
        share: Share,
    ) -> Self {
        Self {
            member_index,
            group_size,
            public,
            share,
            public_key_shares: Arc::new(OnceLock::new()),
        }
    }

    /// Seeds the public key shares with values computed elsewhere.
    ///
    /// Ignored if the shares were already populated.
    pub fn with_public_key_shares(self, shares: Vec<V::Public>) -> Self {
        let _ = self.public_key_shares.set(shares);
        self
    }

    pub fn member_index(&self) -> MemberIndex {
        self.member_index
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Returns the group public key.
    pub fn group_public_key(&self) -> &V::Public {
        self.public.constant()
    }

    /// Returns the encoded group public key, as published on chain.
    pub fn group_public_key_bytes(&self) -> Vec<u8> {
        self.group_public_key().encode().to_vec()
    }

    /// Returns the public key share of every member, computing them on first use.
    pub fn public_key_shares(&self) -> &[V::Public] {
        self.public_key_shares
            .get_or_init(|| evaluate_all::<V>(&self.public, self.group_size))
    }

    /// Signs `message` with the member's private share.
    pub fn sign_share(&self, namespace: &[u8], message: &[u8]) -> PartialSignature<V> {
        ops::partial_sign_message::<V>(&self.share, Some(namespace), message)
    }

    /// Returns true if `partial` is a valid share over `message`.
    pub fn verify_share(
        &self,
        namespace: &[u8],
        message: &[u8],
        partial: &PartialSignature<V>,
    ) -> bool {
        let Some(public) = self.public_key_shares().get(partial.index as usize) else {
            return false;
        };
        ops::verify_message::<V>(public, Some(namespace), message, &partial.value).is_ok()
    }

    /// Combines at least `threshold` shares into the group signature.
    pub fn combine<'a>(
        &self,
        threshold: u32,
        partials: impl IntoIterator<Item = &'a PartialSignature<V>>,
    ) -> Result<V::Signature, Error> {
        ops::threshold_signature_recover::<V, _>(threshold, partials).map_err(|_| Error::Recovery)
    }

    /// Returns true if `signature` is a valid group signature over `message`.
    pub fn verify(&self, namespace: &[u8], message: &[u8], signature: &V::Signature) -> bool {
        ops::verify_message::<V>(self.group_public_key(), Some(namespace), message, signature)
            .is_ok()
    }

    /// Encodes the membership for local persistence, private share included.
    pub fn write_membership(&self, buf: &mut impl BufMut) {
        self.member_index.write(buf);
        self.group_size.write(buf);
        self.public.required().write(buf);
        self.public.write(buf);
        self.share.index.write(buf);
        self.share.private.write(buf);
    }

    /// Returns the length of [ThresholdSigner::write_membership]'s output.
    pub fn membership_size(&self) -> usize {
        self.member_index.encode_size()
            + self.group_size.encode_size()
            + self.public.required().encode_size()
            + self.public.encode_size()
            + self.share.index.encode_size()
            + self.share.private.encode_size()
    }
}

impl<V: Variant> fmt::Debug for ThresholdSigner<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdSigner")
            .field("member_index", &self.member_index)
            .field("group_size", &self.group_size)
            .field("group_public_key", self.group_public_key())
            .finish_non_exhaustive()
    }
}
