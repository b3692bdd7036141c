//! Broadcast channel shared by the members of a group.

use bytes::Bytes;
use commonware_cryptography::PublicKey;
use futures::channel::mpsc;
use std::future::Future;
use thiserror::Error;

/// Errors returned by a [Channel].
#[derive(Debug, Error)]
pub enum Error {
    #[error("channel closed")]
    Closed,
}

/// A broadcast channel over which group members exchange protocol messages.
///
/// Every message is delivered to every subscriber (including the sender)
/// alongside the public key the transport attests sent it.
pub trait Channel: Clone + Send + Sync + 'static {
    /// Transport identity of a peer.
    type PublicKey: PublicKey;

    /// Broadcasts `message` to all subscribers.
    fn send(&self, message: Bytes) -> impl Future<Output = Result<(), Error>> + Send;

    /// Registers a new subscriber.
    ///
    /// Each message broadcast after this call is delivered exactly once to the
    /// returned receiver. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<(Self::PublicKey, Bytes)>;
}

/// Opens named broadcast channels.
///
/// Members of the same group open the same name to reach each other.
pub trait Provider: Clone + Send + Sync + 'static {
    type Channel: Channel;

    /// Returns the channel with the given name.
    fn channel(&self, name: &str) -> Self::Channel;
}
