//! In-memory collaborators for tests and local simulation.

mod chain;
mod keygen;
mod network;
mod storage;

pub use chain::{BlockCounter, Chain, Config as ChainConfig};
pub use keygen::Dealer;
pub use network::{Channel, Endpoint, Network};
pub use storage::Storage;
