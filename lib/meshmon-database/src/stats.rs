//! Statistics values produced by the collector.
//!
//! Only the slices of the domain schema that backends persist are modeled here; the
//! collector owns the full schema and feeds these from the wire.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Node counts keyed by a string property, such as a firmware release or hardware
/// model.
pub type CounterMap = BTreeMap<String, u32>;

/// Per-node statistics for one polling cycle.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeStats {
    /// Stable node identifier.
    pub node_id: String,

    /// Human-readable node name.
    pub hostname: String,

    /// Contact label, if the node publishes one.
    #[serde(default)]
    pub owner: Option<String>,

    /// One-minute load average.
    #[serde(default)]
    pub load: f64,

    /// Seconds since the node booted.
    #[serde(default)]
    pub uptime: f64,

    /// Fraction of memory in use, between 0 and 1.
    #[serde(default)]
    pub memory_usage: f64,

    /// Connected client counts.
    #[serde(default)]
    pub clients: Clients,

    /// Interface traffic counters.
    #[serde(default)]
    pub traffic: Traffic,
}

/// Connected-client counts, total and per radio band.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Clients {
    /// All connected clients.
    #[serde(default)]
    pub total: u32,

    /// Clients connected over any wifi band.
    #[serde(default)]
    pub wifi: u32,

    /// Clients on the 2.4 GHz band.
    #[serde(default)]
    pub wifi24: u32,

    /// Clients on the 5 GHz band.
    #[serde(default)]
    pub wifi5: u32,
}

/// Byte and packet counters for both traffic directions.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct Traffic {
    /// Received bytes.
    #[serde(default)]
    pub rx_bytes: u64,

    /// Received packets.
    #[serde(default)]
    pub rx_packets: u64,

    /// Transmitted bytes.
    #[serde(default)]
    pub tx_bytes: u64,

    /// Transmitted packets.
    #[serde(default)]
    pub tx_packets: u64,
}

/// Statistics for one link between two nodes.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LinkStats {
    /// Identifier of the node the link was measured from.
    pub source_id: String,

    /// Interface address on the source side.
    pub source_addr: String,

    /// Identifier of the node the link points at.
    pub target_id: String,

    /// Interface address on the target side.
    pub target_addr: String,

    /// Transmit quality as reported on the wire, 0-255.
    #[serde(default)]
    pub tq: u8,
}

/// Network-wide statistics for one site/domain pair.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GlobalStats {
    /// Number of nodes currently known.
    #[serde(default)]
    pub nodes: u32,

    /// Client counts aggregated over all nodes.
    #[serde(default)]
    pub clients: Clients,

    /// Node counts keyed by firmware release.
    #[serde(default)]
    pub firmwares: CounterMap,

    /// Node counts keyed by hardware model.
    #[serde(default)]
    pub models: CounterMap,
}
