//! A replicated, in-memory key-value store. A fixed cluster of replicas
//! agrees on a linearizable sequence of writes through leader-based
//! consensus and serves reads from the current leader; clients may address
//! any replica and are redirected as needed.
//!
//! Each replica is a single-threaded event loop over a local datagram
//! endpoint. The protocol tolerates message loss, reordering, duplication,
//! and partitions that isolate a minority of the cluster.

pub mod config;
pub mod error;
pub mod message;
pub mod replica;
pub mod timer;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{Body, Envelope, LogEntry, BROADCAST};
pub use replica::Replica;
pub use transport::{DatagramTransport, Transport};
