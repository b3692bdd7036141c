//! Keep track of the groups this node is a member of.

use crate::{group::Group, membership::Validator, signer::ThresholdSigner};
use commonware_cryptography::{bls12381::primitives::variant::Variant, PublicKey};
use commonware_utils::hex;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::info;

/// Errors that can occur while registering a group.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to persist membership: {0}")]
    Persistence(String),
}

/// Durable storage for memberships.
pub trait Persistence: Clone + Send + Sync + 'static {
    /// Stores `data` under `key`, replacing any previous value.
    fn save(&self, data: &[u8], key: &str) -> Result<(), Error>;
}

/// A membership of this node in a group.
#[derive(Clone, Debug)]
pub struct Membership<P: PublicKey, V: Variant> {
    pub signer: ThresholdSigner<V>,

    /// Operators of the group, in member order.
    pub validator: Validator<P>,

    /// Faults observed during key generation.
    pub group: Group,
}

impl<P: PublicKey, V: Variant> Membership<P, V> {
    /// Encodes the membership for persistence.
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.signer.membership_size());
        self.signer.write_membership(&mut buf);
        buf
    }
}

type Groups<P, V> = BTreeMap<Vec<u8>, Vec<Membership<P, V>>>;

/// Memberships of this node, by group public key.
#[derive(Clone)]
pub struct Registry<P: PublicKey, V: Variant, S: Persistence> {
    storage: S,
    groups: Arc<Mutex<Groups<P, V>>>,
}

impl<P: PublicKey, V: Variant, S: Persistence> Registry<P, V, S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            groups: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Persists and registers a membership.
    pub fn register_group(&self, membership: Membership<P, V>) -> Result<(), Error> {
        let group_public_key = membership.signer.group_public_key_bytes();
        let key = format!(
            "{}_{}",
            hex(&group_public_key),
            membership.signer.member_index()
        );
        self.storage.save(&membership.encode(), &key)?;
        info!(
            group = hex(&group_public_key),
            member = membership.signer.member_index(),
            "registered membership"
        );
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(group_public_key)
            .or_default()
            .push(membership);
        Ok(())
    }

    /// Returns the memberships in the group with the given public key.
    pub fn get_group(&self, group_public_key: &[u8]) -> Vec<Membership<P, V>> {
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(group_public_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the public keys of every group with a membership.
    pub fn group_public_keys(&self) -> Vec<Vec<u8>> {
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Forgets a group.
    pub fn unregister_group(&self, group_public_key: &[u8]) {
        self.groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(group_public_key);
        info!(group = hex(group_public_key), "unregistered group");
    }
}
