//! neo4j-vault-graph: Neo4j connection management for the credential plugin.
//!
//! The driver boundary is a small set of traits ([`Driver`],
//! [`DriverHandle`], [`Session`]) implemented for `neo4rs` by [`BoltDriver`].
//! [`ConnectionProducer`] owns the single live handle and hands out sessions
//! under one lock.

pub mod bolt;
pub mod driver;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod producer;

pub use bolt::BoltDriver;
pub use driver::{BasicAuth, Driver, DriverError, DriverHandle, Session, SessionOptions};
pub use producer::{ConnectionProducer, GraphError, ProducerGuard, CLOSE_TIMEOUT};
