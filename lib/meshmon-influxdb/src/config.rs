use std::collections::BTreeMap;

use meshmon_config::GenericConfiguration;
use meshmon_error::GenericError;
use serde::Deserialize;
use snafu::{ensure, ResultExt as _, Snafu};
use url::Url;

/// A connection parameter error, detected before any network activity.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// The server address was missing or empty.
    #[snafu(display("'address' must be set to the InfluxDB base URL"))]
    MissingAddress,

    /// The server address did not parse as a URL.
    #[snafu(display("'address' is not a valid URL: {}", source))]
    InvalidAddress {
        /// Error source.
        source: url::ParseError,
    },

    /// The database name was missing or empty.
    #[snafu(display("'database' must be set"))]
    MissingDatabase,
}

/// A credential resolution error, fatal to the connection attempt.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CredentialError {
    /// The credential file path referenced an environment variable that is not set.
    #[snafu(display("credential file path references unset environment variable '{}'", variable))]
    UnsetVariable {
        /// Name of the unset variable.
        variable: String,
    },

    /// The configured credential file could not be read.
    #[snafu(display("failed to read credential file '{}'", path))]
    UnreadableFile {
        /// Expanded path of the unreadable file.
        path: String,

        /// Error source.
        source: std::io::Error,
    },
}

/// Typed configuration for the InfluxDB backend.
///
/// Deserialized once from the loosely typed configuration when a connection is
/// established; nothing past this boundary inspects raw configuration again.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InfluxDbConfiguration {
    /// Base URL of the InfluxDB server.
    #[serde(default)]
    pub(crate) address: String,

    /// Database points are written into.
    #[serde(default)]
    pub(crate) database: String,

    /// Username for basic authentication; empty disables authentication.
    #[serde(default)]
    pub(crate) username: String,

    /// Password for basic authentication.
    #[serde(default)]
    pub(crate) password: String,

    /// Path to a file whose trimmed content replaces `password`.
    ///
    /// The path may reference environment variables (`${VAR}` or `$VAR`), so it can
    /// point into externally injected credential directories such as systemd's
    /// `$CREDENTIALS_DIRECTORY`. When set, the file content wins over `password`
    /// unconditionally.
    #[serde(default)]
    pub(crate) password_file: String,

    /// Disables server certificate validation on the transport.
    #[serde(default)]
    pub(crate) insecure_skip_verify: bool,

    /// Tags applied to every point that does not already carry the same key.
    #[serde(default)]
    pub(crate) tags: BTreeMap<String, String>,
}

impl InfluxDbConfiguration {
    /// Creates a new `InfluxDbConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Checks the connection parameters, returning the parsed server address.
    pub(crate) fn validate(&self) -> Result<Url, ConfigError> {
        ensure!(!self.address.is_empty(), MissingAddress);
        let address = Url::parse(&self.address).context(InvalidAddress)?;
        ensure!(!self.database.is_empty(), MissingDatabase);

        Ok(address)
    }

    /// Resolves the password to authenticate with.
    ///
    /// When `password_file` is set, environment references in the path are expanded,
    /// the file is read, and its whitespace-trimmed content is the password, even if
    /// `password` is also set. Otherwise the inline `password` is returned verbatim
    /// (the empty string when unset).
    pub(crate) fn resolve_password(&self) -> Result<String, CredentialError> {
        if self.password_file.is_empty() {
            return Ok(self.password.clone());
        }

        let path = expand_env_vars(&self.password_file)?;
        let contents = std::fs::read_to_string(&path).context(UnreadableFile { path: path.as_str() })?;

        Ok(contents.trim().to_string())
    }
}

/// Expands `${VAR}` and `$VAR` references in `raw` from the process environment.
///
/// A referenced variable that is not set is an error rather than an empty substitution:
/// a partially expanded path must never reach the filesystem. A `$` that does not start
/// a variable reference is passed through unchanged.
fn expand_env_vars(raw: &str) -> Result<String, CredentialError> {
    let mut expanded = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(idx) = rest.find('$') {
        expanded.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];

        let (variable, tail) = if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], &braced[end + 1..]),
                None => {
                    // Unterminated brace; keep the text as-is.
                    expanded.push_str("${");
                    rest = braced;
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        };

        if variable.is_empty() {
            expanded.push('$');
            continue;
        }

        match std::env::var(variable) {
            Ok(value) => expanded.push_str(&value),
            Err(_) => {
                return UnsetVariable { variable }.fail();
            }
        }
        rest = tail;
    }

    expanded.push_str(rest);
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn empty_address_rejected() {
        let config = InfluxDbConfiguration::default();

        assert!(matches!(config.validate(), Err(ConfigError::MissingAddress)));
    }

    #[test]
    fn invalid_address_rejected() {
        let config = InfluxDbConfiguration {
            address: "not a url".to_string(),
            database: "meshmon".to_string(),
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn empty_database_rejected() {
        let config = InfluxDbConfiguration {
            address: "http://localhost:8086".to_string(),
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::MissingDatabase)));
    }

    #[test]
    fn valid_parameters_accepted() {
        let config = InfluxDbConfiguration {
            address: "http://localhost:8086".to_string(),
            database: "meshmon".to_string(),
            ..Default::default()
        };

        let address = config.validate().expect("parameters are valid");
        assert_eq!(address.as_str(), "http://localhost:8086/");
    }

    fn credential_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("should create temporary file");
        file.write_all(contents.as_bytes()).expect("should write credential");
        file
    }

    #[test]
    fn inline_password_returned_verbatim() {
        let config = InfluxDbConfiguration {
            password: "testpassword".to_string(),
            ..Default::default()
        };

        assert_eq!(config.resolve_password().expect("inline password"), "testpassword");
    }

    #[test]
    fn no_password_resolves_to_empty_string() {
        let config = InfluxDbConfiguration::default();

        assert_eq!(config.resolve_password().expect("no password configured"), "");
    }

    #[test]
    fn file_password_trimmed() {
        let file = credential_file("\n  Extr3MePAssWORDfromFiLE \n\n");
        let config = InfluxDbConfiguration {
            password_file: file.path().to_string_lossy().to_string(),
            ..Default::default()
        };

        assert_eq!(
            config.resolve_password().expect("file password"),
            "Extr3MePAssWORDfromFiLE"
        );
    }

    #[test]
    fn file_password_wins_over_inline() {
        let file = credential_file("Extr3MePAssWORDfromFiLE");
        let config = InfluxDbConfiguration {
            password: "NotTheFilePassword".to_string(),
            password_file: file.path().to_string_lossy().to_string(),
            ..Default::default()
        };

        assert_eq!(
            config.resolve_password().expect("file password"),
            "Extr3MePAssWORDfromFiLE"
        );
    }

    #[test]
    fn file_path_expands_environment_variables() {
        let file = credential_file("Extr3MePAssWORDfromFiLE\n");
        let directory = file.path().parent().expect("temporary file has a parent");
        let file_name = file.path().file_name().expect("temporary file has a name");

        std::env::set_var("MESHMON_TEST_CREDENTIALS_DIRECTORY", directory);

        let config = InfluxDbConfiguration {
            password_file: format!(
                "${{MESHMON_TEST_CREDENTIALS_DIRECTORY}}/{}",
                file_name.to_string_lossy()
            ),
            ..Default::default()
        };

        assert_eq!(
            config.resolve_password().expect("file password"),
            "Extr3MePAssWORDfromFiLE"
        );

        std::env::remove_var("MESHMON_TEST_CREDENTIALS_DIRECTORY");
    }

    #[test]
    fn unset_environment_variable_is_fatal() {
        let config = InfluxDbConfiguration {
            password_file: "${MESHMON_TEST_NO_SUCH_VARIABLE}/password.txt".to_string(),
            ..Default::default()
        };

        match config.resolve_password() {
            Err(CredentialError::UnsetVariable { variable }) => {
                assert_eq!(variable, "MESHMON_TEST_NO_SUCH_VARIABLE");
            }
            other => panic!("expected unset variable error, got {:?}", other),
        }
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let config = InfluxDbConfiguration {
            password: "fallback-must-not-be-used".to_string(),
            password_file: "/nonexistent/password.txt".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            config.resolve_password(),
            Err(CredentialError::UnreadableFile { .. })
        ));
    }

    #[test]
    fn unbraced_variable_reference_expands() {
        let file = credential_file("secret");
        let directory = file.path().parent().expect("temporary file has a parent");
        let file_name = file.path().file_name().expect("temporary file has a name");

        std::env::set_var("MESHMON_TEST_PLAIN_DIR", directory);

        let config = InfluxDbConfiguration {
            password_file: format!("$MESHMON_TEST_PLAIN_DIR/{}", file_name.to_string_lossy()),
            ..Default::default()
        };

        assert_eq!(config.resolve_password().expect("file password"), "secret");

        std::env::remove_var("MESHMON_TEST_PLAIN_DIR");
    }
}
