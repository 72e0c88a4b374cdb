use std::collections::HashMap;

use async_trait::async_trait;
use meshmon_config::GenericConfiguration;
use meshmon_error::GenericError;
use snafu::Snafu;
use tracing::debug;

use crate::Connection;

/// An adapter registry error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RegistryError {
    /// No adapter is registered under the requested name.
    #[snafu(display("unknown database adapter '{}'", name))]
    UnknownAdapter {
        /// Requested adapter name.
        name: String,
    },

    /// An adapter is already registered under the given name.
    #[snafu(display("database adapter '{}' is already registered", name))]
    AdapterAlreadyRegistered {
        /// Rejected adapter name.
        name: String,
    },
}

/// Builds backend connections from configuration.
#[async_trait]
pub trait AdapterBuilder: Send + Sync {
    /// Validates the given configuration, establishes the network handle, and returns a
    /// ready-to-use connection.
    ///
    /// Configuration and credential problems are detected here and abort the connection
    /// attempt. A returned connection is always usable.
    async fn build(&self, config: &GenericConfiguration) -> Result<Box<dyn Connection>, GenericError>;
}

/// Maps backend names to the builders that create them.
///
/// A registry is created once at process start, populated with every compiled-in
/// backend, and passed by reference into the bootstrap path: it is an explicit object,
/// not process-global state.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn AdapterBuilder>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registers an adapter builder under the given name.
    ///
    /// Duplicate registrations are rejected: the builder registered first under a name
    /// stays, and `AdapterAlreadyRegistered` is returned for every later attempt.
    pub fn register<S>(&mut self, name: S, builder: Box<dyn AdapterBuilder>) -> Result<(), RegistryError>
    where
        S: Into<String>,
    {
        let name = name.into();
        if self.adapters.contains_key(&name) {
            return Err(RegistryError::AdapterAlreadyRegistered { name });
        }

        debug!(adapter = %name, "Registered database adapter.");
        self.adapters.insert(name, builder);
        Ok(())
    }

    /// Returns the builder registered under the given name.
    pub fn lookup(&self, name: &str) -> Result<&dyn AdapterBuilder, RegistryError> {
        self.adapters
            .get(name)
            .map(|builder| builder.as_ref())
            .ok_or_else(|| RegistryError::UnknownAdapter { name: name.to_string() })
    }

    /// Looks up the named adapter and builds a connection from the given configuration.
    pub async fn connect(
        &self, name: &str, config: &GenericConfiguration,
    ) -> Result<Box<dyn Connection>, GenericError> {
        let builder = self.lookup(name)?;
        builder.build(config).await
    }
}
