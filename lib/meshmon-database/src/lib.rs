//! The storage backend contract.
//!
//! A backend is anything that can persist periodic node, link, and network-wide
//! statistics: it implements [`Connection`], and registers an [`AdapterBuilder`] for
//! itself in the [`AdapterRegistry`] under the name operators select it by.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use meshmon_error::GenericError;
use snafu::Snafu;

mod registry;
pub mod stats;

pub use self::registry::{AdapterBuilder, AdapterRegistry, RegistryError};

use self::stats::{GlobalStats, LinkStats, NodeStats};

/// An error encountered while accepting a statistics value for storage.
///
/// Insert failures are recoverable from the process's perspective: the affected value
/// is not stored, and subsequent inserts proceed normally.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub))]
pub enum InsertError {
    /// The value produced a point with no fields.
    ///
    /// Every insert must carry at least one measured value. An empty field set is a bug
    /// in the caller, not a transient condition, and is surfaced rather than swallowed.
    #[snafu(display("point '{}' has no fields", measurement))]
    EmptyFields {
        /// Measurement the point was built for.
        measurement: &'static str,
    },

    /// The write queue stayed full past the enqueue deadline; the point was dropped.
    #[snafu(display("write queue full, dropped point '{}'", measurement))]
    QueueFull {
        /// Measurement of the dropped point.
        measurement: &'static str,
    },

    /// The connection is closing or closed and no longer accepts inserts.
    #[snafu(display("connection is closed"))]
    Closed,
}

/// An established connection to a statistics storage backend.
///
/// Insert methods are called concurrently from independent poller tasks; implementations
/// must tolerate concurrent invocation without losing points. Inserts are
/// fire-and-forget with respect to the network: a successful return means the value was
/// accepted for writing, not that it has been written.
#[async_trait]
pub trait Connection: Send + Sync + std::fmt::Debug {
    /// Stores statistics for a single node.
    async fn insert_node(&self, node: &NodeStats, time: SystemTime) -> Result<(), InsertError>;

    /// Stores statistics for a single link between two nodes.
    async fn insert_link(&self, link: &LinkStats, time: SystemTime) -> Result<(), InsertError>;

    /// Stores network-wide statistics for one site/domain pair.
    async fn insert_globals(
        &self, stats: &GlobalStats, time: SystemTime, site: &str, domain: &str,
    ) -> Result<(), InsertError>;

    /// Deletes historical per-node data older than `delete_after`.
    async fn prune_nodes(&self, delete_after: Duration) -> Result<(), GenericError>;

    /// Flushes pending writes and releases the underlying network client.
    ///
    /// Once a connection is closed it rejects further inserts. Closing an
    /// already-closed connection is a no-op.
    async fn close(&self) -> Result<(), GenericError>;
}
