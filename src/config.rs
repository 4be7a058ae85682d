//! Configuration surface and the `ProducerBuilder` that validates it at
//! construction time: configuration errors always fail fast.
//!
//! A builder that accumulates overrides over sane defaults and produces the
//! runtime type (here, [`crate::producer::Producer`]) from a single
//! `build`/`start` call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::compression::Compression;
use crate::error::ConfigError;
use crate::partitioner::{DefaultPartitioner, Partitioner};
use crate::protocol::Acks;

/// `api_version` as accepted in configuration: either auto-detected at
/// `start()` or pinned to a specific broker protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiVersion {
    Auto,
    Fixed(u16, u16, u16),
}

impl ApiVersion {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        if s == "auto" {
            return Ok(ApiVersion::Auto);
        }
        let parts: Vec<&str> = s.split('.').collect();
        let nums: Option<Vec<u16>> = parts.iter().map(|p| p.parse().ok()).collect();
        match nums.as_deref() {
            Some([major, minor, patch]) => {
                let v = (*major, *minor, *patch);
                if matches!(v, (0, 8, 0) | (0, 8, 1) | (0, 8, 2) | (0, 9, 0)) {
                    Ok(ApiVersion::Fixed(*major, *minor, *patch))
                } else {
                    Err(ConfigError::InvalidApiVersion(s.to_owned()))
                }
            }
            _ => Err(ConfigError::InvalidApiVersion(s.to_owned())),
        }
    }

    pub fn at_least(&self, major: u16, minor: u16, patch: u16) -> bool {
        match self {
            ApiVersion::Auto => true,
            ApiVersion::Fixed(a, b, c) => (*a, *b, *c) >= (major, minor, patch),
        }
    }
}

/// Process-wide counter used to generate a default `client_id` when none is
/// configured.
static CLIENT_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn next_client_id() -> String {
    let n = CLIENT_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
    format!("producer-{n}")
}

/// The validated, immutable configuration a running [`crate::producer::Producer`]
/// carries. Constructed only via [`ProducerBuilder::build`], which is where
/// all the fail-fast checks live.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Initial contact list the `ClusterClient` implementation should dial
    /// during `bootstrap()`. This crate only validates and carries the
    /// value through; a `ClusterClient` supplied already wired to its
    /// brokers may simply ignore it.
    pub bootstrap_servers: Vec<String>,
    pub client_id: String,
    pub acks: Acks,
    pub compression: Compression,
    pub max_batch_size: usize,
    pub linger: Duration,
    pub max_request_size: usize,
    pub metadata_max_age: Duration,
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
    pub api_version: ApiVersion,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            client_id: next_client_id(),
            acks: Acks::Leader,
            compression: Compression::None,
            max_batch_size: 16_384,
            linger: Duration::ZERO,
            max_request_size: 1_048_576,
            metadata_max_age: Duration::from_millis(300_000),
            request_timeout: Duration::from_millis(30_000),
            retry_backoff: Duration::from_millis(100),
            api_version: ApiVersion::Auto,
        }
    }
}

/// Builds a [`crate::producer::Producer`] from a [`ProducerConfig`], a
/// `ClusterClient`, and the partitioner plug-in.
pub struct ProducerBuilder {
    config: ProducerConfig,
    partitioner: Arc<dyn Partitioner>,
}

impl Default for ProducerBuilder {
    fn default() -> Self {
        Self {
            config: ProducerConfig::default(),
            partitioner: Arc::new(DefaultPartitioner::new()),
        }
    }
}

impl ProducerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bootstrap_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.bootstrap_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    pub fn acks(mut self, acks: Acks) -> Self {
        self.config.acks = acks;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn max_batch_size(mut self, bytes: usize) -> Self {
        self.config.max_batch_size = bytes;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.config.linger = linger;
        self
    }

    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.config.max_request_size = bytes;
        self
    }

    pub fn metadata_max_age(mut self, age: Duration) -> Self {
        self.config.metadata_max_age = age;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn api_version(mut self, version: ApiVersion) -> Self {
        self.config.api_version = version;
        self
    }

    pub fn partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// Validates the accumulated configuration, failing fast.
    pub fn build(self) -> Result<(ProducerConfig, Arc<dyn Partitioner>), ConfigError> {
        validate(&self.config)?;
        Ok((self.config, self.partitioner))
    }
}

fn validate(config: &ProducerConfig) -> Result<(), ConfigError> {
    if config.bootstrap_servers.is_empty() {
        return Err(ConfigError::EmptyBootstrapServers);
    }
    if !matches!(config.acks.as_i16(), 0 | 1 | -1) {
        return Err(ConfigError::InvalidAcks(config.acks.as_i16()));
    }
    if let Some(required) = config.compression.min_api_version() {
        if !config.api_version.at_least(required.0, required.1, required.2) {
            return Err(ConfigError::CompressionRequiresNewerApi {
                compression: config.compression.name(),
                required: "0.8.2",
                configured: format!("{:?}", config.api_version),
            });
        }
    }
    Ok(())
}
