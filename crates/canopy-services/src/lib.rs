//! Host services: transaction ingestion, dispatch, subscriptions and peer
//! address verification on top of an abstract transport and store.

pub mod error;
pub mod host;
pub mod seen;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod verify;

#[cfg(test)]
mod testing;

pub use error::HostError;
pub use host::Host;
pub use seen::SeenSet;
pub use store::{MemoryStore, Store};
pub use subscription::SubscriptionManager;
pub use transport::{InboundHandler, Peer, Transport};
pub use verify::AddressVerifier;
