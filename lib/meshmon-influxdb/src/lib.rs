//! InfluxDB storage backend.
//!
//! Translates node, link, and network-wide statistics into measurement points and
//! writes them to an InfluxDB v1 server. Inserts enqueue onto a bounded
//! per-connection queue and never wait for the network; a background dispatcher
//! flushes the queue as batched line-protocol writes. Closing the connection flushes
//! whatever is still queued before the client is released.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Mutex,
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use meshmon_config::GenericConfiguration;
use meshmon_database::{
    stats::{CounterMap, GlobalStats, LinkStats, NodeStats},
    AdapterBuilder, AdapterRegistry, Connection, InsertError, RegistryError,
};
use meshmon_error::{generic_error, ErrorContext as _, GenericError};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

mod client;
mod config;
mod dispatch;
mod point;

pub use self::config::{ConfigError, CredentialError, InfluxDbConfiguration};
pub use self::point::{sanitize_tag_value, FieldSet, FieldValue, MetricPoint, TagSet};

use self::client::InfluxHttpClient;
use self::dispatch::{run_dispatcher, ENQUEUE_TIMEOUT, QUEUE_CAPACITY};

/// Name the backend registers under.
pub const ADAPTER_NAME: &str = "influxdb";

const MEASUREMENT_NODE: &str = "node";
const MEASUREMENT_LINK: &str = "link";
const MEASUREMENT_GLOBAL: &str = "global";
const MEASUREMENT_FIRMWARE: &str = "firmware";
const MEASUREMENT_MODEL: &str = "model";

/// Registers the InfluxDB adapter with the given registry under [`ADAPTER_NAME`].
pub fn register(registry: &mut AdapterRegistry) -> Result<(), RegistryError> {
    registry.register(ADAPTER_NAME, Box::new(InfluxDbBuilder))
}

/// Builds InfluxDB connections from generic configuration.
pub struct InfluxDbBuilder;

#[async_trait]
impl AdapterBuilder for InfluxDbBuilder {
    async fn build(&self, config: &GenericConfiguration) -> Result<Box<dyn Connection>, GenericError> {
        let config = InfluxDbConfiguration::from_configuration(config)?;
        let connection = InfluxDbConnection::connect(config).await?;

        Ok(Box::new(connection))
    }
}

/// Connection lifecycle states.
///
/// `Disconnected` and `Connecting` only exist while [`InfluxDbConnection::connect`]
/// runs; a connection value observed from outside is `Ready`, `Closing`, or `Closed`.
/// Only `Ready` accepts inserts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
enum State {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
    Closing = 3,
    Closed = 4,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => State::Disconnected,
            1 => State::Connecting,
            2 => State::Ready,
            3 => State::Closing,
            _ => State::Closed,
        }
    }
}

/// A live connection to an InfluxDB server.
#[derive(Debug)]
pub struct InfluxDbConnection {
    config: InfluxDbConfiguration,
    client: InfluxHttpClient,
    tx: Mutex<Option<mpsc::Sender<MetricPoint>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU8,
}

impl InfluxDbConnection {
    /// Establishes a connection from an already-typed configuration.
    ///
    /// Validates the connection parameters, resolves the credential, probes the
    /// server, and starts the batch dispatcher. Any failure along the way is terminal
    /// for this attempt; a returned connection is ready for inserts.
    pub async fn connect(config: InfluxDbConfiguration) -> Result<Self, GenericError> {
        let state = AtomicU8::new(State::Connecting as u8);

        let address = config.validate()?;
        let password = config.resolve_password()?;
        let client = InfluxHttpClient::new(address, &config, password)?;
        client
            .ping()
            .await
            .error_context("InfluxDB server is not reachable")?;

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let dispatcher = tokio::spawn(run_dispatcher(client.clone(), rx));
        state.store(State::Ready as u8, Ordering::SeqCst);

        debug!(database = %config.database, "Connected to InfluxDB.");

        Ok(Self {
            config,
            client,
            tx: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            state,
        })
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Hands a point to the write queue.
    ///
    /// Blocks at most [`ENQUEUE_TIMEOUT`] when the queue is full, then drops the point
    /// rather than buffering without bound.
    async fn enqueue(&self, point: MetricPoint) -> Result<(), InsertError> {
        if self.state() != State::Ready {
            return Err(InsertError::Closed);
        }

        let tx = match &*self.tx.lock().unwrap() {
            Some(tx) => tx.clone(),
            None => return Err(InsertError::Closed),
        };

        let measurement = point.measurement();
        match tx.send_timeout(point, ENQUEUE_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(measurement, "Write queue full, dropping point.");
                Err(InsertError::QueueFull { measurement })
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(InsertError::Closed),
        }
    }

    async fn insert_counter_map(
        &self, measurement: &'static str, counters: &CounterMap, time: SystemTime, site: &str,
        domain: &str,
    ) -> Result<(), InsertError> {
        for (value, count) in counters {
            let mut tags = TagSet::new();
            tags.insert("value", value);
            tags.insert("site", site);
            tags.insert("domain", domain);

            let fields: FieldSet = vec![("count", (*count).into())];
            self.enqueue(MetricPoint::build(measurement, tags, fields, time, &self.config.tags)?)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Connection for InfluxDbConnection {
    async fn insert_node(&self, node: &NodeStats, time: SystemTime) -> Result<(), InsertError> {
        let mut tags = TagSet::new();
        tags.insert("nodeid", &node.node_id);
        tags.insert("hostname", &node.hostname);
        if let Some(owner) = &node.owner {
            tags.insert("owner", owner);
        }

        let fields: FieldSet = vec![
            ("time.up", node.uptime.into()),
            ("load", node.load.into()),
            ("memory.usage", node.memory_usage.into()),
            ("clients.total", node.clients.total.into()),
            ("clients.wifi", node.clients.wifi.into()),
            ("clients.wifi24", node.clients.wifi24.into()),
            ("clients.wifi5", node.clients.wifi5.into()),
            ("traffic.rx.bytes", node.traffic.rx_bytes.into()),
            ("traffic.rx.packets", node.traffic.rx_packets.into()),
            ("traffic.tx.bytes", node.traffic.tx_bytes.into()),
            ("traffic.tx.packets", node.traffic.tx_packets.into()),
        ];

        self.enqueue(MetricPoint::build(MEASUREMENT_NODE, tags, fields, time, &self.config.tags)?)
            .await
    }

    async fn insert_link(&self, link: &LinkStats, time: SystemTime) -> Result<(), InsertError> {
        let mut tags = TagSet::new();
        tags.insert("source.id", &link.source_id);
        tags.insert("source.addr", &link.source_addr);
        tags.insert("target.id", &link.target_id);
        tags.insert("target.addr", &link.target_addr);

        // Raw transmit quality is 0-255; stored as a percentage.
        let fields: FieldSet = vec![("tq", (f64::from(link.tq) / 2.55).into())];

        self.enqueue(MetricPoint::build(MEASUREMENT_LINK, tags, fields, time, &self.config.tags)?)
            .await
    }

    async fn insert_globals(
        &self, stats: &GlobalStats, time: SystemTime, site: &str, domain: &str,
    ) -> Result<(), InsertError> {
        let mut tags = TagSet::new();
        tags.insert("site", site);
        tags.insert("domain", domain);

        let fields: FieldSet = vec![
            ("nodes", stats.nodes.into()),
            ("clients.total", stats.clients.total.into()),
            ("clients.wifi", stats.clients.wifi.into()),
            ("clients.wifi24", stats.clients.wifi24.into()),
            ("clients.wifi5", stats.clients.wifi5.into()),
        ];

        self.enqueue(MetricPoint::build(MEASUREMENT_GLOBAL, tags, fields, time, &self.config.tags)?)
            .await?;

        self.insert_counter_map(MEASUREMENT_FIRMWARE, &stats.firmwares, time, site, domain)
            .await?;
        self.insert_counter_map(MEASUREMENT_MODEL, &stats.models, time, site, domain)
            .await
    }

    async fn prune_nodes(&self, delete_after: Duration) -> Result<(), GenericError> {
        let statement = format!(
            "DELETE FROM \"{}\" WHERE time < now() - {}s",
            MEASUREMENT_NODE,
            delete_after.as_secs()
        );

        self.client.query(&statement).await
    }

    async fn close(&self) -> Result<(), GenericError> {
        if self
            .state
            .compare_exchange(
                State::Ready as u8,
                State::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Already closing or closed.
            return Ok(());
        }

        // Dropping the sender lets the dispatcher drain the queue, write one final
        // batch, and exit.
        drop(self.tx.lock().unwrap().take());

        let dispatcher = self.dispatcher.lock().unwrap().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher
                .await
                .map_err(|e| generic_error!("batch dispatcher task failed: {}", e))?;
        }

        self.state.store(State::Closed as u8, Ordering::SeqCst);
        debug!("Closed InfluxDB connection.");

        Ok(())
    }
}
