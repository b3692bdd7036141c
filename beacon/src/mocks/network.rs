use crate::p2p::{self, Provider};
use bytes::Bytes;
use commonware_cryptography::PublicKey;
use futures::channel::mpsc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

type Subscribers<P> = Vec<mpsc::UnboundedSender<(P, Bytes)>>;

/// In-memory network of named broadcast channels.
#[derive(Clone)]
pub struct Network<P: PublicKey> {
    hubs: Arc<Mutex<HashMap<String, Arc<Mutex<Subscribers<P>>>>>>,
}

impl<P: PublicKey> Default for Network<P> {
    fn default() -> Self {
        Self {
            hubs: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<P: PublicKey> Network<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the endpoint a peer opens channels with.
    pub fn register(&self, public_key: P) -> Endpoint<P> {
        Endpoint {
            network: self.clone(),
            public_key,
        }
    }

    fn hub(&self, name: &str) -> Arc<Mutex<Subscribers<P>>> {
        self.hubs
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// A peer's view of the [Network].
#[derive(Clone)]
pub struct Endpoint<P: PublicKey> {
    network: Network<P>,
    public_key: P,
}

impl<P: PublicKey> Provider for Endpoint<P> {
    type Channel = Channel<P>;

    fn channel(&self, name: &str) -> Channel<P> {
        Channel {
            hub: self.network.hub(name),
            public_key: self.public_key.clone(),
        }
    }
}

/// A named broadcast channel, attributed to one peer.
#[derive(Clone)]
pub struct Channel<P: PublicKey> {
    hub: Arc<Mutex<Subscribers<P>>>,
    public_key: P,
}

impl<P: PublicKey> p2p::Channel for Channel<P> {
    type PublicKey = P;

    async fn send(&self, message: Bytes) -> Result<(), p2p::Error> {
        let sender = self.public_key.clone();
        self.hub.lock().unwrap().retain(|subscriber| {
            subscriber
                .unbounded_send((sender.clone(), message.clone()))
                .is_ok()
        });
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<(P, Bytes)> {
        let (sender, receiver) = mpsc::unbounded();
        self.hub.lock().unwrap().push(sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::Channel as _;
    use commonware_cryptography::{ed25519, PrivateKeyExt as _, Signer as _};
    use futures::{executor::block_on, StreamExt};

    #[test]
    fn test_broadcast() {
        let network = Network::new();
        let alice = ed25519::PrivateKey::from_seed(0).public_key();
        let bob = ed25519::PrivateKey::from_seed(1).public_key();
        let a = network.register(alice.clone()).channel("group");
        let b = network.register(bob.clone()).channel("group");
        let other = network.register(bob).channel("other");

        let mut a_inbound = a.subscribe();
        let mut other_inbound = other.subscribe();
        block_on(b.send(Bytes::from_static(b"hello"))).unwrap();
        block_on(a.send(Bytes::from_static(b"echo"))).unwrap();

        // Delivered to every subscriber of the same name, sender included
        let (sender, message) = block_on(a_inbound.next()).unwrap();
        assert_ne!(sender, alice);
        assert_eq!(message, Bytes::from_static(b"hello"));
        let (sender, message) = block_on(a_inbound.next()).unwrap();
        assert_eq!(sender, alice);
        assert_eq!(message, Bytes::from_static(b"echo"));
        assert!(other_inbound.try_next().is_err());

        // Dropped subscribers are pruned
        drop(a_inbound);
        block_on(b.send(Bytes::from_static(b"again"))).unwrap();
        assert!(a.hub.lock().unwrap().is_empty());
    }
}
