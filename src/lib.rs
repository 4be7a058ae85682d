#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::private_intra_doc_links,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::disallowed_method
)]

pub mod cluster;
pub mod compression;
pub mod config;
pub mod error;
pub mod partitioner;
pub mod producer;
pub mod protocol;
pub mod record;
pub mod serializer;

pub use cluster::{ClusterClient, ClusterError, MetadataView, NodeId};
pub use compression::Compression;
pub use config::{ApiVersion, ProducerBuilder, ProducerConfig};
pub use error::{ConfigError, Error, ProduceError, Result, SendError};
pub use partitioner::{DefaultPartitioner, Partitioner};
pub use producer::{Completion, Producer, RecordAccumulator};
pub use protocol::{Acks, ErrorCode, ProduceRequest, ProduceResponse};
pub use record::{Record, RecordMetadata, TopicPartition};
pub use serializer::ToBytes;
