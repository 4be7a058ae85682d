//! Crate-wide error types.
//!
//! One `thiserror`-derived enum per failure family, with `#[from]`
//! conversions from the layers below, and a `Result<T, E = Error>` alias so
//! call sites rarely spell out `Error`.

use thiserror::Error;

use crate::protocol::ErrorCode;
use crate::record::TopicPartition;

/// Errors a caller of [`crate::producer::Producer::send`] can observe without
/// ever touching a live broker connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    #[error("record for topic {0:?} must have a key, a value, or both")]
    EmptyRecord(String),

    #[error("topic {0:?} is unknown to the cluster")]
    UnknownTopic(String),

    #[error("partition {partition} is not a known partition of topic {topic:?}")]
    UnknownPartition { topic: String, partition: i32 },

    #[error("serialized record of {size} bytes exceeds max_request_size of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("accumulator buffer for {0} is full and the append timed out")]
    BufferFull(TopicPartition),

    #[error("producer has been stopped")]
    ProducerClosed,
}

/// Errors surfaced once a batch has actually been handed to a broker, either
/// as a transport failure or as a coded per-partition response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProduceError {
    #[error("transport error talking to node {node_id}: {message}")]
    Transport { node_id: i32, message: String },

    #[error("broker returned {code:?} for {partition}")]
    Server {
        partition: TopicPartition,
        code: ErrorCode,
    },

    #[error("batch for {0} expired before it could be (re)sent")]
    Expired(TopicPartition),

    #[error("producer was stopped while this batch was still in flight")]
    ProducerClosed,
}

impl ProduceError {
    pub fn retriable(&self) -> bool {
        match self {
            ProduceError::Transport { .. } => true,
            ProduceError::Server { code, .. } => code.retriable(),
            ProduceError::Expired(_) => false,
            ProduceError::ProducerClosed => false,
        }
    }
}

/// Configuration errors, raised at [`crate::config::ProducerBuilder::build`]
/// time — these always fail fast, before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid acks value: {0} (expected 0, 1, or -1)")]
    InvalidAcks(i16),

    #[error("unsupported api_version: {0:?}")]
    InvalidApiVersion(String),

    #[error("invalid compression_type: {0:?} (expected gzip, snappy, lz4, or none)")]
    InvalidCompressionType(String),

    #[error("compression {compression} requires api_version >= {required}, have {configured}")]
    CompressionRequiresNewerApi {
        compression: &'static str,
        required: &'static str,
        configured: String,
    },

    #[error("bootstrap_servers must not be empty")]
    EmptyBootstrapServers,
}

/// Top-level error type for everything that isn't scoped to one of the more
/// specific enums above (cluster bootstrap, metadata refresh, ...).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Produce(#[from] ProduceError),

    #[error("cluster bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("metadata refresh failed: {0}")]
    MetadataRefresh(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
