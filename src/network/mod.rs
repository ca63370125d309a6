// Cluster Networking
//
// Message definitions and the transport abstraction. Protocol code sends
// `ClusterMessage`s through the `Transport` trait and never sees a socket;
// the in-memory bus and the TCP transport are interchangeable.

pub mod message;
pub mod tcp;
pub mod transport;

pub use message::{ClusterMessage, Envelope};
pub use tcp::TcpTransport;
pub use transport::{InMemoryHub, InMemoryTransport, MessageHandler, Transport};
