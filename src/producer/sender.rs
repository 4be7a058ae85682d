//! The Sender Loop: drains ready batches grouped by broker, keeps at most
//! one produce request in flight per node, retries retriable partitions,
//! and spaces requests to the same broker by `linger`.
//!
//! N per-node tasks are raced against a data-ready signal via
//! `FuturesUnordered`, rather than a single in-flight future.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, NodeId};
use crate::producer::accumulator::{Batch, RecordAccumulator};
use crate::producer::builder::build_request;
use crate::protocol::{Acks, ErrorCode, ProduceRequest};
use crate::record::TopicPartition;
use crate::error::ProduceError;

/// Handle to the background sender task, returned by [`spawn`].
///
/// Dropping this without calling [`SenderHandle::stop`] leaves the task
/// running; `Producer::stop` is the only intended caller of `stop`.
pub struct SenderHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SenderHandle {
    /// Cooperative shutdown: flips the flag, wakes the loop, and waits for
    /// it to drain every task it was holding. Safe to call more than once.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_one();
        if let Err(err) = self.join.await {
            if err.is_panic() {
                warn!("sender task panicked during shutdown: {err}");
            }
        }
    }
}

/// Spawns the sender loop as a background task.
pub fn spawn<C>(
    accumulator: Arc<RecordAccumulator>,
    cluster: Arc<C>,
    acks: Acks,
    request_timeout: Duration,
    retry_backoff: Duration,
    linger: Duration,
) -> SenderHandle
where
    C: ClusterClient + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());

    let join = tokio::spawn(run(
        accumulator,
        cluster,
        acks,
        request_timeout,
        retry_backoff,
        linger,
        Arc::clone(&shutdown),
        Arc::clone(&notify),
    ));

    SenderHandle {
        shutdown,
        notify,
        join,
    }
}

async fn run<C>(
    accumulator: Arc<RecordAccumulator>,
    cluster: Arc<C>,
    acks: Acks,
    request_timeout: Duration,
    retry_backoff: Duration,
    linger: Duration,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
) where
    C: ClusterClient + 'static,
{
    let mut in_flight_nodes: HashSet<NodeId> = HashSet::new();
    let mut tasks: FuturesUnordered<_> = FuturesUnordered::new();

    info!("sender loop started");

    loop {
        let stopping = shutdown.load(Ordering::Acquire);
        if stopping && tasks.is_empty() && accumulator.is_drained().await {
            break;
        }

        let drained = accumulator
            .drain_by_nodes(cluster.cluster(), &in_flight_nodes)
            .await;

        for (node_id, batches) in drained.by_node {
            in_flight_nodes.insert(node_id);
            debug!(node_id, batches = batches.len(), "dispatching per-node send task");
            let request = build_request(&batches, acks, request_timeout);
            let join = tokio::spawn(run_node_task(
                node_id,
                request,
                batches,
                Arc::clone(&cluster),
                acks,
                request_timeout,
                retry_backoff,
                linger,
                Arc::clone(&shutdown),
            ));
            tasks.push(async move {
                match join.await {
                    Ok(returned) => returned,
                    Err(err) => {
                        warn!(node_id, "node send task panicked: {err}");
                        node_id
                    }
                }
            });
        }

        if drained.unknown_leaders_exist {
            debug!("unknown partition leaders, forcing metadata refresh");
            let refresh_cluster = Arc::clone(&cluster);
            tokio::spawn(async move {
                if let Err(err) = refresh_cluster.force_metadata_update().await {
                    warn!("metadata refresh failed: {err}");
                }
            });
        }

        let retry_timer = async {
            if drained.unknown_leaders_exist {
                tokio::time::sleep(retry_backoff).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            Some(node_id) = tasks.next(), if !tasks.is_empty() => {
                in_flight_nodes.remove(&node_id);
            }
            _ = accumulator.data_waiter() => {}
            _ = retry_timer => {}
            _ = shutdown_notify.notified() => {}
        }
    }

    while let Some(node_id) = tasks.next().await {
        in_flight_nodes.remove(&node_id);
    }

    info!("sender loop stopped");
}

/// The per-node send task's state machine: Issuing → AwaitingResponse →
/// (Success-all | Partial-retry | Fatal); Partial-retry → Sleeping →
/// Issuing.
#[allow(clippy::too_many_arguments)]
async fn run_node_task<C>(
    node_id: NodeId,
    first_request: ProduceRequest,
    mut batches: HashMap<TopicPartition, Batch>,
    cluster: Arc<C>,
    acks: Acks,
    request_timeout: Duration,
    retry_backoff: Duration,
    linger: Duration,
    shutdown: Arc<AtomicBool>,
) -> NodeId
where
    C: ClusterClient + 'static,
{
    let t0 = Instant::now();
    let mut next_request = Some(first_request);

    while !batches.is_empty() {
        if shutdown.load(Ordering::Acquire) {
            for (_, batch) in batches.drain() {
                batch.done_error(ProduceError::ProducerClosed);
            }
            break;
        }

        let request = next_request
            .take()
            .unwrap_or_else(|| build_request(&batches, acks, request_timeout));

        match cluster.send(node_id, request).await {
            Err(err) => {
                let retriable = err.retriable();
                let message = err.to_string();
                warn!(node_id, retriable, "produce request failed: {message}");
                let now = Instant::now();
                let mut still_pending = HashMap::new();
                for (tp, batch) in batches.drain() {
                    if !retriable || batch.is_expired(now) {
                        batch.done_error(ProduceError::Transport {
                            node_id,
                            message: message.clone(),
                        });
                    } else {
                        still_pending.insert(tp, batch);
                    }
                }
                batches = still_pending;
                if !retriable {
                    break;
                }
            }
            Ok(_response) if acks == Acks::None => {
                for (_, batch) in batches.drain() {
                    batch.done_success(-1);
                }
                break;
            }
            Ok(response) => {
                let now = Instant::now();
                for (tp, code, base_offset) in response.into_flat() {
                    let Some(batch) = batches.remove(&tp) else {
                        continue;
                    };
                    if code == ErrorCode::NoError {
                        batch.done_success(base_offset);
                    } else if !code.retriable() || batch.is_expired(now) {
                        batch.done_error(ProduceError::Server { partition: tp, code });
                    } else {
                        batches.insert(tp, batch);
                    }
                }
            }
        }

        if !batches.is_empty() {
            tokio::time::sleep(retry_backoff).await;
        }
    }

    let elapsed = t0.elapsed();
    if elapsed < linger {
        tokio::time::sleep(linger - elapsed).await;
    }

    node_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterError, MetadataView};
    use crate::compression::Compression;
    use crate::protocol::{PartitionResponse, ProduceResponse};
    use crate::record::Record;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone)]
    struct FakeError(String);

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl ClusterError for FakeError {
        fn retriable(&self) -> bool {
            true
        }
    }

    struct FakeMetadata {
        leader: Option<NodeId>,
    }
    impl MetadataView for FakeMetadata {
        fn topics(&self) -> HashSet<String> {
            Default::default()
        }
        fn partitions_for_topic(&self, _: &str) -> Option<HashSet<i32>> {
            None
        }
        fn available_partitions_for_topic(&self, _: &str) -> HashSet<i32> {
            Default::default()
        }
        fn leader_for_partition(&self, _: &TopicPartition) -> Option<NodeId> {
            self.leader
        }
    }

    struct FakeCluster {
        metadata: FakeMetadata,
        responses: StdMutex<Vec<Result<ProduceResponse, FakeError>>>,
        calls: StdMutex<usize>,
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        type Error = FakeError;

        async fn bootstrap(&self) -> Result<(), Self::Error> {
            Ok(())
        }
        async fn check_version(&self) -> Result<String, Self::Error> {
            Ok("0.9".into())
        }
        async fn force_metadata_update(&self) -> Result<bool, Self::Error> {
            Ok(true)
        }
        fn add_topic(&self, _topic: &str) {}
        async fn send(
            &self,
            _node_id: NodeId,
            _request: ProduceRequest,
        ) -> Result<ProduceResponse, Self::Error> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("no more scripted responses");
            }
            responses.remove(0)
        }
        async fn close(&self) {}
        fn cluster(&self) -> &dyn MetadataView {
            &self.metadata
        }
    }

    fn tp() -> TopicPartition {
        TopicPartition::new("orders", 0)
    }

    #[tokio::test]
    async fn successful_response_resolves_completion_with_offset() {
        let acc = Arc::new(RecordAccumulator::new(
            16_384,
            Duration::ZERO,
            Duration::from_secs(30),
            Compression::None,
        ));
        let rx = acc
            .append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();
        acc.close().await;

        let cluster = Arc::new(FakeCluster {
            metadata: FakeMetadata { leader: Some(1) },
            responses: StdMutex::new(vec![Ok(ProduceResponse {
                topics: vec![(
                    "orders".into(),
                    vec![PartitionResponse {
                        partition: 0,
                        error_code: ErrorCode::NoError,
                        base_offset: 42,
                    }],
                )],
            })]),
            calls: StdMutex::new(0),
        });

        let handle = spawn(
            Arc::clone(&acc),
            Arc::clone(&cluster),
            Acks::Leader,
            Duration::from_secs(30),
            Duration::from_millis(10),
            Duration::ZERO,
        );

        let meta = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("resolved before timeout")
            .unwrap()
            .unwrap();
        assert_eq!(meta.offset, 42);

        handle.stop().await;
    }

    #[tokio::test]
    async fn retriable_error_is_retried_then_succeeds() {
        let acc = Arc::new(RecordAccumulator::new(
            16_384,
            Duration::ZERO,
            Duration::from_secs(30),
            Compression::None,
        ));
        let rx = acc
            .append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();
        acc.close().await;

        let cluster = Arc::new(FakeCluster {
            metadata: FakeMetadata { leader: Some(1) },
            responses: StdMutex::new(vec![
                Ok(ProduceResponse {
                    topics: vec![(
                        "orders".into(),
                        vec![PartitionResponse {
                            partition: 0,
                            error_code: ErrorCode::LeaderNotAvailable,
                            base_offset: -1,
                        }],
                    )],
                }),
                Ok(ProduceResponse {
                    topics: vec![(
                        "orders".into(),
                        vec![PartitionResponse {
                            partition: 0,
                            error_code: ErrorCode::NoError,
                            base_offset: 7,
                        }],
                    )],
                }),
            ]),
            calls: StdMutex::new(0),
        });

        let handle = spawn(
            Arc::clone(&acc),
            Arc::clone(&cluster),
            Acks::Leader,
            Duration::from_secs(30),
            Duration::from_millis(5),
            Duration::ZERO,
        );

        let meta = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("resolved before timeout")
            .unwrap()
            .unwrap();
        assert_eq!(meta.offset, 7);
        assert_eq!(*cluster.calls.lock().unwrap(), 2);

        handle.stop().await;
    }

    #[tokio::test]
    async fn non_retriable_error_fails_the_handle_immediately() {
        let acc = Arc::new(RecordAccumulator::new(
            16_384,
            Duration::ZERO,
            Duration::from_secs(30),
            Compression::None,
        ));
        let rx = acc
            .append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();
        acc.close().await;

        let cluster = Arc::new(FakeCluster {
            metadata: FakeMetadata { leader: Some(1) },
            responses: StdMutex::new(vec![Ok(ProduceResponse {
                topics: vec![(
                    "orders".into(),
                    vec![PartitionResponse {
                        partition: 0,
                        error_code: ErrorCode::MessageSizeTooLarge,
                        base_offset: -1,
                    }],
                )],
            })]),
            calls: StdMutex::new(0),
        });

        let handle = spawn(
            Arc::clone(&acc),
            Arc::clone(&cluster),
            Acks::Leader,
            Duration::from_secs(30),
            Duration::from_millis(5),
            Duration::ZERO,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("resolved before timeout")
            .unwrap();
        assert!(outcome.is_err());

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_task_to_resolve_its_batch() {
        let acc = Arc::new(RecordAccumulator::new(
            16_384,
            Duration::ZERO,
            Duration::from_secs(30),
            Compression::None,
        ));
        let rx = acc
            .append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();
        acc.close().await;

        let cluster = Arc::new(FakeCluster {
            metadata: FakeMetadata { leader: Some(1) },
            responses: StdMutex::new(vec![Ok(ProduceResponse {
                topics: vec![(
                    "orders".into(),
                    vec![PartitionResponse {
                        partition: 0,
                        error_code: ErrorCode::NoError,
                        base_offset: 3,
                    }],
                )],
            })]),
            calls: StdMutex::new(0),
        });

        let handle = spawn(
            Arc::clone(&acc),
            Arc::clone(&cluster),
            Acks::Leader,
            Duration::from_secs(30),
            Duration::from_millis(5),
            Duration::ZERO,
        );

        let meta = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("resolved before timeout")
            .unwrap()
            .unwrap();
        assert_eq!(meta.offset, 3);

        handle.stop().await;
    }
}
