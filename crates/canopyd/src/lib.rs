//! canopyd library: TCP transport, key files and node wiring, shared by the
//! daemon binary and the integration tests.

pub mod keys;
pub mod node;
pub mod transport;

pub use node::Node;
pub use transport::{TcpPeer, TcpTransport};
