//! Primitives for working with typed and untyped configuration data.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{borrow::Cow, collections::HashSet, sync::Arc};

use figment::{
    error::Kind,
    providers::{Env, Serialized},
    Figment, Provider as _,
};
use meshmon_error::GenericError;
use serde::Deserialize;
use snafu::Snafu;

mod provider;

use self::provider::EagerFileProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text listing the spellings under which the field can be set, including
        /// the environment variable form when environment variables were loaded.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field's value had an unexpected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the invalid field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to query configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Generic { source: e.into() },
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum LookupSource {
    /// The key is settable through the process environment.
    Environment { prefix: String },
}

impl LookupSource {
    fn transform_key(&self, key: &str) -> String {
        match self {
            // The prefix is stored uppercased with its trailing underscore already
            // attached, so only the key itself needs transforming.
            LookupSource::Environment { prefix } => {
                format!("{}{}", prefix, key.replace('.', "_").to_uppercase())
            }
        }
    }
}

struct BoxedProvider(Box<dyn figment::Provider + Send + Sync>);

impl figment::Provider for BoxedProvider {
    fn metadata(&self) -> figment::Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        self.0.data()
    }
}

/// A configuration loader that can pull from multiple sources.
///
/// Wraps a lower-level library, `figment`, behind a small API for loading configuration
/// data and handing it out for querying. Sources added later take precedence over
/// sources added earlier.
///
/// # Supported sources
///
/// - YAML file
/// - environment variables (must be prefixed; see [`from_environment`][Self::from_environment])
#[derive(Default)]
pub struct ConfigurationLoader {
    lookup_sources: HashSet<LookupSource>,
    providers: Vec<BoxedProvider>,
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or is not valid YAML, an error is returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<std::path::Path>,
    {
        let resolved = EagerFileProvider::from_yaml(&path)?;
        self.providers.push(BoxedProvider(Box::new(resolved)));
        Ok(self)
    }

    /// Attempts to load the given YAML configuration file, ignoring any errors.
    ///
    /// Errors include the file not existing, not being readable, and not being valid
    /// YAML.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<std::path::Path>,
    {
        match EagerFileProvider::from_yaml(&path) {
            Ok(resolved) => {
                self.providers.push(BoxedProvider(Box::new(resolved)));
            }
            Err(e) => {
                tracing::debug!(error = %e, file_path = %path.as_ref().to_string_lossy(), "Unable to read YAML configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given has an underscore appended to it if it does not already end
    /// with one: with a prefix of `meshmon`, any environment variable starting with
    /// `MESHMON_` is matched. The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // `Env` itself is not `Send + Sync`, so its data is snapshotted into a
        // `Serialized` provider instead of storing the provider directly.
        let env = Env::prefixed(&prefix);
        let values = env
            .data()
            .map_err(|e| ConfigurationError::Generic { source: e.into() })?;
        if let Some(default_dict) = values.get(&figment::Profile::Default) {
            self.providers
                .push(BoxedProvider(Box::new(Serialized::defaults(default_dict.clone()))));
            self.lookup_sources.insert(LookupSource::Environment { prefix });
        }
        Ok(self)
    }

    /// Consumes the loader and wraps the merged configuration in a generic wrapper.
    pub fn into_generic(self) -> GenericConfiguration {
        let figment = self
            .providers
            .iter()
            .fold(Figment::new(), |figment, provider| figment.admerge(provider));

        GenericConfiguration {
            inner: Arc::new(Inner {
                figment,
                lookup_sources: self.lookup_sources,
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    figment: Figment,
    lookup_sources: HashSet<LookupSource>,
}

/// A generic configuration object.
///
/// The merged configuration derived from [`ConfigurationLoader`], in raw form. Values
/// can be queried by key, either typed or whole-configuration.
///
/// Keys are period-separated paths: querying `a.b.c` against `{"a": {"b": {"c": 5}}}`
/// returns `5`.
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.inner.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) => {
                if matches!(e.kind, Kind::MissingField(_)) {
                    // The key may only be present in its environment variable spelling,
                    // where nested key separators (`.`) flatten to underscores. Retry
                    // with that spelling before reporting the field missing.
                    let fallback_key = key.replace('.', "_");
                    self.inner
                        .figment
                        .extract_inner(&fallback_key)
                        .map_err(|fallback_e| from_figment_error(&self.inner.lookup_sources, fallback_e))
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Gets a configuration value by key.
    ///
    /// # Errors
    ///
    /// If the key does not exist in the configuration, or if the value could not be
    /// deserialized into `T`, an error is returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, or the default value if the key does not
    /// exist or could not be deserialized.
    ///
    /// Swallows all errors in favor of `T::default()`; use sparingly.
    pub fn get_typed_or_default<'a, T>(&self, key: &str) -> T
    where
        T: Default + Deserialize<'a>,
    {
        self.get(key).unwrap_or_default()
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// Returns `Ok(Some(value))` when the key exists and deserializes, and `Ok(None)`
    /// when the key does not exist.
    ///
    /// # Errors
    ///
    /// If the value could not be deserialized into `T`, an error is returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attempts to deserialize the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error is returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.lookup_sources, e))
    }
}

fn from_figment_error(lookup_sources: &HashSet<LookupSource>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = lookup_sources
                .iter()
                .map(|source| source.transform_key(&field))
                .collect::<Vec<_>>();

            // The plain key spelling is always worth suggesting.
            valid_keys.insert(0, field.to_string());

            let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));

            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct DatabaseSettings {
        address: String,
        database: String,
    }

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("should create temporary file");
        file.write_all(contents.as_bytes())
            .expect("should write configuration");
        file
    }

    #[test]
    fn typed_extraction_from_yaml() {
        let file = write_yaml("address: \"http://localhost:8086\"\ndatabase: ffhb\n");

        let config = ConfigurationLoader::default()
            .from_yaml(file.path())
            .expect("YAML file should load")
            .into_generic();

        let settings: DatabaseSettings = config.as_typed().expect("should extract typed settings");
        assert_eq!(settings.address, "http://localhost:8086");
        assert_eq!(settings.database, "ffhb");
    }

    #[test]
    fn later_sources_win() {
        let base = write_yaml("database: first\n");
        let overlay = write_yaml("database: second\n");

        let config = ConfigurationLoader::default()
            .from_yaml(base.path())
            .expect("base YAML file should load")
            .from_yaml(overlay.path())
            .expect("overlay YAML file should load")
            .into_generic();

        let database: String = config.get_typed("database").expect("key should exist");
        assert_eq!(database, "second");
    }

    #[test]
    fn missing_field_reported_with_key() {
        let file = write_yaml("database: ffhb\n");

        let config = ConfigurationLoader::default()
            .from_yaml(file.path())
            .expect("YAML file should load")
            .into_generic();

        match config.get_typed::<String>("address") {
            Err(ConfigurationError::MissingField { field, .. }) => assert_eq!(field, "address"),
            other => panic!("expected missing field error, got {:?}", other.map(|_| ())),
        }

        assert_eq!(
            config.try_get_typed::<String>("address").expect("missing key is not an error"),
            None
        );
    }

    #[test]
    fn environment_variables_take_precedence() {
        std::env::set_var("MESHMON_CFGTEST_DATABASE", "from-env");

        let file = write_yaml("database: from-file\n");

        let config = ConfigurationLoader::default()
            .from_yaml(file.path())
            .expect("YAML file should load")
            .from_environment("meshmon_cfgtest")
            .expect("prefix is non-empty")
            .into_generic();

        let database: String = config.get_typed("database").expect("key should exist");
        assert_eq!(database, "from-env");

        std::env::remove_var("MESHMON_CFGTEST_DATABASE");
    }

    #[test]
    fn empty_environment_prefix_rejected() {
        let result = ConfigurationLoader::default().from_environment("");
        assert!(matches!(result, Err(ConfigurationError::EmptyPrefix)));
    }
}
