//! Where image archives come from.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::ResolveErrorKind;
use reqwest::{Client, StatusCode};
use wharf_common::{WharfError, WharfResult};
use wharf_runtime::ArchiveStream;

/// Image service port when the host has neither a port nor an SRV record.
pub const DEFAULT_IMAGE_SERVICE_PORT: u16 = 80;

/// Fetches image archives by id.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Open the archive of image `id` as a byte stream.
    async fn fetch(&self, id: &str) -> WharfResult<ArchiveStream>;
}

/// Configuration for [`HttpImageSource`].
#[derive(Debug, Clone)]
pub struct ImageServiceConfig {
    /// Image service `host[:port]`.
    pub host: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Overall request timeout, body included; `None` bounds only the connect.
    pub timeout: Option<Duration>,
}

impl Default for ImageServiceConfig {
    fn default() -> Self {
        Self {
            host: "images.service.lochness.local".to_string(),
            connect_timeout: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl ImageServiceConfig {
    /// Set the image service host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the overall request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Host and explicit port, if the configured host carries one.
    #[must_use]
    pub fn host_port(&self) -> (&str, Option<u16>) {
        let host = self.host.trim_end_matches('/');
        match host.rsplit_once(':') {
            Some((name, port)) => match port.parse::<u16>() {
                Ok(port) => (name, Some(port)),
                Err(_) => (host, None),
            },
            None => (host, None),
        }
    }

    /// `host:port`, defaulting the port.
    #[must_use]
    pub fn authority(&self) -> String {
        match self.host_port() {
            (host, Some(port)) => format!("{host}:{port}"),
            (host, None) => format!("{host}:{DEFAULT_IMAGE_SERVICE_PORT}"),
        }
    }

    /// Fill in a missing port from the host's DNS SRV record.
    ///
    /// A host without SRV records keeps the default port.
    ///
    /// # Errors
    ///
    /// Fails if the system resolver cannot be set up or the lookup itself fails.
    pub async fn resolve(self) -> WharfResult<Self> {
        if self.host_port().1.is_some() {
            return Ok(self);
        }
        let host = self.host_port().0.to_string();

        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            WharfError::Config {
                message: format!("Failed to set up DNS resolver: {e}"),
            }
        })?;
        let port = match resolver.srv_lookup(host.as_str()).await {
            Ok(lookup) => preferred_port(
                lookup
                    .iter()
                    .map(|srv| (srv.priority(), srv.weight(), srv.port())),
            ),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => None,
            Err(e) => {
                return Err(WharfError::Network {
                    message: format!("SRV lookup for {host} failed: {e}"),
                });
            }
        };

        match port {
            Some(port) => {
                tracing::debug!(host = %host, port, "Image service port from SRV record");
                Ok(self.with_host(format!("{host}:{port}")))
            }
            None => {
                tracing::debug!(host = %host, "No SRV record for image service, using default port");
                Ok(self)
            }
        }
    }
}

/// Port of the best SRV record: lowest priority, then highest weight.
fn preferred_port(records: impl IntoIterator<Item = (u16, u16, u16)>) -> Option<u16> {
    records
        .into_iter()
        .min_by_key(|&(priority, weight, _)| (priority, std::cmp::Reverse(weight)))
        .map(|(_, _, port)| port)
}

/// Downloads archives from the image service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
    authority: String,
}

impl HttpImageSource {
    /// Build a source from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: &ImageServiceConfig) -> WharfResult<Self> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| WharfError::Config {
            message: format!("Failed to build HTTP client: {e}"),
        })?;

        Ok(Self {
            client,
            authority: config.authority(),
        })
    }

    /// Download URL of image `id`.
    #[must_use]
    pub fn download_url(&self, id: &str) -> String {
        format!("http://{}/images/{}/download", self.authority, id)
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, id: &str) -> WharfResult<ArchiveStream> {
        let url = self.download_url(id);
        tracing::debug!(url = %url, image = id, "Downloading image");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WharfError::Network {
                message: format!("Failed to request {url}: {e}"),
            })?;

        if response.status() != StatusCode::OK {
            return Err(WharfError::HttpStatus {
                expected: StatusCode::OK.as_u16(),
                actual: response.status().as_u16(),
                url,
            });
        }

        Ok(response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed())
    }
}
