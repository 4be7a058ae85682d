//! The Producer Facade: lifecycle, public `send`, serialization,
//! partition selection, and size enforcement sit here — everything below is
//! an implementation detail a caller never touches directly.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::cluster::ClusterClient;
use crate::config::ProducerConfig;
use crate::error::{ConfigError, Error, SendError};
use crate::partitioner::Partitioner;
use crate::producer::accumulator::{Completion, RecordAccumulator};
use crate::producer::sender::{self, SenderHandle};
use crate::protocol::Acks;
use crate::record::{Record, TopicPartition};
use crate::serializer::ToBytes;

/// A running producer for one cluster, generic over the [`ClusterClient`]
/// implementation that owns the actual network connections.
pub struct Producer<C: ClusterClient> {
    config: ProducerConfig,
    partitioner: Arc<dyn Partitioner>,
    cluster: Arc<C>,
    accumulator: Arc<RecordAccumulator>,
    sender: Mutex<Option<SenderHandle>>,
    stopped: AtomicBool,
}

impl<C: ClusterClient + 'static> Producer<C> {
    /// Builds an unstarted producer. Call [`Producer::start`] before
    /// sending; `start` is where cluster bootstrap and compression/api
    /// compatibility checks happen.
    pub fn new(cluster: C, config: ProducerConfig, partitioner: Arc<dyn Partitioner>) -> Self {
        let accumulator = Arc::new(RecordAccumulator::new(
            config.max_batch_size,
            config.linger,
            config.request_timeout,
            config.compression,
        ));
        Self {
            config,
            partitioner,
            cluster: Arc::new(cluster),
            accumulator,
            sender: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Bootstraps the cluster client, resolves `api_version` if set to
    /// `"auto"`, re-validates the compression/api-version pairing against
    /// the resolved version, and launches the sender loop.
    pub async fn start(&self) -> Result<(), Error> {
        self.cluster
            .bootstrap()
            .await
            .map_err(|e| Error::Bootstrap(e.to_string()))?;

        if matches!(self.config.api_version, crate::config::ApiVersion::Auto) {
            let detected = self
                .cluster
                .check_version()
                .await
                .map_err(|e| Error::Bootstrap(e.to_string()))?;
            info!(api_version = %detected, "auto-detected broker api version");
            let resolved = crate::config::ApiVersion::parse(&detected)
                .unwrap_or(crate::config::ApiVersion::Auto);
            if let Some(required) = self.config.compression.min_api_version() {
                if !resolved.at_least(required.0, required.1, required.2) {
                    return Err(Error::Config(ConfigError::CompressionRequiresNewerApi {
                        compression: self.config.compression.name(),
                        required: "0.8.2",
                        configured: detected,
                    }));
                }
            }
        }

        let handle = sender::spawn(
            Arc::clone(&self.accumulator),
            Arc::clone(&self.cluster),
            self.config.acks,
            self.config.request_timeout,
            self.config.retry_backoff,
            self.config.linger,
        );
        *self.sender.lock().await = Some(handle);
        info!(client_id = %self.config.client_id, "producer started");
        Ok(())
    }

    /// Returns a completion handle the caller awaits for the
    /// assigned offset (or the terminal error).
    pub async fn send<K, V>(
        &self,
        topic: &str,
        value: Option<V>,
        key: Option<K>,
        partition: Option<i32>,
    ) -> Result<Completion, Error>
    where
        K: ToBytes,
        V: ToBytes,
    {
        if value.is_none() && key.is_none() {
            return Err(Error::Send(SendError::EmptyRecord(topic.to_owned())));
        }

        let all_partitions = self.ensure_topic_metadata(topic).await?;

        let key_bytes = key.map(ToBytes::to_bytes);
        let value_bytes = value.map(ToBytes::to_bytes);
        let record = Record::new(key_bytes, value_bytes);

        let serialized_size = record.wire_size();
        if serialized_size > self.config.max_request_size {
            return Err(Error::Send(SendError::MessageTooLarge {
                size: serialized_size,
                max: self.config.max_request_size,
            }));
        }

        let chosen_partition = match partition {
            Some(p) => {
                if !all_partitions.contains(&p) {
                    return Err(Error::Send(SendError::UnknownPartition {
                        topic: topic.to_owned(),
                        partition: p,
                    }));
                }
                p
            }
            None => {
                let available = self.cluster.cluster().available_partitions_for_topic(topic);
                let mut all_sorted: Vec<i32> = all_partitions.iter().copied().collect();
                all_sorted.sort_unstable();
                let mut available_sorted: Vec<i32> = available.into_iter().collect();
                available_sorted.sort_unstable();
                self.partitioner
                    .partition(record.key.as_deref(), &all_sorted, &available_sorted)
            }
        };

        let tp = TopicPartition::new(topic.to_owned(), chosen_partition);
        self.accumulator
            .append(tp, record, self.config.request_timeout)
            .await
            .map_err(Error::Send)
    }

    /// Blocks until metadata is available.
    pub async fn partitions_for(&self, topic: &str) -> Result<HashSet<i32>, Error> {
        self.ensure_topic_metadata(topic).await
    }

    async fn ensure_topic_metadata(&self, topic: &str) -> Result<HashSet<i32>, Error> {
        if let Some(partitions) = self.cluster.cluster().partitions_for_topic(topic) {
            return Ok(partitions);
        }
        self.cluster.add_topic(topic);
        self.cluster
            .force_metadata_update()
            .await
            .map_err(|e| Error::MetadataRefresh(e.to_string()))?;
        self.cluster
            .cluster()
            .partitions_for_topic(topic)
            .ok_or_else(|| Error::Send(SendError::UnknownTopic(topic.to_owned())))
    }

    /// Closes the accumulator (draining it), joins the sender
    /// task, then closes the cluster client. Idempotent: a second call is a
    /// no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.accumulator.close().await;
        if let Some(handle) = self.sender.lock().await.take() {
            handle.stop().await;
        }
        self.cluster.close().await;
        info!(client_id = %self.config.client_id, "producer stopped");
    }
}
