use std::time::Duration;

use meshmon_error::{ErrorContext as _, GenericError};
use url::Url;

use crate::{config::InfluxDbConfiguration, point::MetricPoint};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the InfluxDB v1 API.
///
/// Wraps a `reqwest` client with the server's endpoint URLs and resolved credentials.
/// Cloning is cheap and clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub(crate) struct InfluxHttpClient {
    http: reqwest::Client,
    ping_url: Url,
    write_url: Url,
    query_url: Url,
    username: String,
    password: String,
}

impl InfluxHttpClient {
    /// Creates a client for the given server address and configuration.
    ///
    /// `password` is the already-resolved credential; the raw configuration fields are
    /// not consulted for it again.
    pub fn new(
        address: Url, config: &InfluxDbConfiguration, password: String,
    ) -> Result<Self, GenericError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .error_context("failed to build HTTP client")?;

        let ping_url = address.join("/ping")?;

        let mut write_url = address.join("/write")?;
        write_url.query_pairs_mut().append_pair("db", &config.database);

        let mut query_url = address.join("/query")?;
        query_url.query_pairs_mut().append_pair("db", &config.database);

        Ok(Self {
            http,
            ping_url,
            write_url,
            query_url,
            username: config.username.clone(),
            password,
        })
    }

    /// Probes the server, verifying it is reachable and responding.
    pub async fn ping(&self) -> Result<(), GenericError> {
        let response = self.authorized(self.http.get(self.ping_url.clone())).send().await?;
        response.error_for_status()?;

        Ok(())
    }

    /// Writes the given points as a single batched request.
    pub async fn write(&self, points: &[MetricPoint]) -> Result<(), GenericError> {
        let mut body = String::new();
        for point in points {
            point.encode_to(&mut body);
            body.push('\n');
        }

        let response = self
            .authorized(self.http.post(self.write_url.clone()))
            .body(body)
            .send()
            .await?;
        response.error_for_status()?;

        Ok(())
    }

    /// Runs an administrative query statement against the configured database.
    pub async fn query(&self, statement: &str) -> Result<(), GenericError> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut().append_pair("q", statement);

        let response = self.authorized(self.http.post(url)).send().await?;
        response.error_for_status()?;

        Ok(())
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.username, Some(&self.password))
        }
    }
}
