//! The Message Accumulator: buffers, coalesces, and releases per-partition
//! record batches with bounded memory and bounded latency.
//!
//! One queue per topic-partition, guarded by a single mutex, drained by
//! node rather than flushed eagerly on a per-partition timer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, trace};

use crate::cluster::{MetadataView, NodeId};
use crate::compression::Compression;
use crate::error::{ProduceError, SendError};
use crate::record::{Record, RecordMetadata, TopicPartition};

/// What a completion handle eventually resolves with.
pub type ProduceOutcome = std::result::Result<RecordMetadata, ProduceError>;

/// A single-assignment cell delivered to the caller of `send`
/// "Completion Handle"). Resolution is handled entirely by `tokio::oneshot`:
/// dropping the receiver makes sending a no-op, which is exactly "cancelling
/// the handle does not abort transmission".
pub type Completion = oneshot::Receiver<ProduceOutcome>;

/// A batch's position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Sealed,
    InFlight,
    Done,
}

/// A mutable, append-only container for one topic-partition's in-flight
/// worth of records.
pub struct Batch {
    pub partition: TopicPartition,
    raw: Vec<u8>,
    record_count: usize,
    completions: Vec<oneshot::Sender<ProduceOutcome>>,
    state: BatchState,
    created_at: Instant,
    expires_at: Instant,
    compression: Compression,
}

impl Batch {
    fn new(partition: TopicPartition, compression: Compression, request_timeout: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            partition,
            raw: Vec::new(),
            record_count: 0,
            completions: Vec::new(),
            state: BatchState::Open,
            created_at,
            expires_at: created_at + request_timeout,
            compression,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn byte_size(&self) -> usize {
        self.raw.len()
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn would_fit(&self, record_size: usize, max_batch_size: usize) -> bool {
        self.raw.len() + record_size <= max_batch_size
    }

    fn is_full(&self, max_batch_size: usize) -> bool {
        self.raw.len() >= max_batch_size
    }

    /// Appends one record's wire encoding and registers a fresh completion
    /// handle for it, in append order.
    fn push(&mut self, record: Record) -> Completion {
        encode_record(&mut self.raw, &record, self.record_count as i64);
        self.record_count += 1;
        let (tx, rx) = oneshot::channel();
        self.completions.push(tx);
        rx
    }

    fn seal(&mut self) {
        debug_assert_eq!(self.state, BatchState::Open);
        self.state = BatchState::Sealed;
    }

    fn mark_in_flight(&mut self) {
        debug_assert_eq!(self.state, BatchState::Sealed);
        self.state = BatchState::InFlight;
    }

    /// The batch's sealed wire bytes, compressed per its configured codec.
    /// Called once, by the [`crate::producer::builder`] when grouping
    /// drained batches into a produce request.
    pub fn encoded_bytes(&self) -> Vec<u8> {
        self.compression.compress(&self.raw)
    }

    /// Resolves every completion handle with a successful offset, applying
    /// `base_offset + index_in_batch` in append order.
    pub fn done_success(mut self, base_offset: i64) {
        self.state = BatchState::Done;
        let topic = self.partition.topic.clone();
        let partition = self.partition.partition;
        for (i, tx) in self.completions.drain(..).enumerate() {
            let _ = tx.send(Ok(RecordMetadata {
                topic: topic.clone(),
                partition,
                offset: base_offset + i as i64,
            }));
        }
    }

    /// Resolves every completion handle with the same terminal error.
    pub fn done_error(mut self, error: ProduceError) {
        self.state = BatchState::Done;
        for tx in self.completions.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

/// Broker message-set v0 framing: 8-byte relative offset + 4-byte message
/// size, followed by a message of magic(1) + attributes(1) + key + value,
/// prefixed with a crc32c checksum.
///
/// The real wire codec (out of scope here, see [`crate::cluster`]) may
/// re-validate or re-frame this; what matters to the accumulator is that
/// [`crate::record::Record::wire_size`] and this encoder agree on the byte
/// count, so `max_batch_size` accounting is exact.
fn encode_record(buf: &mut Vec<u8>, record: &Record, relative_offset: i64) {
    let mut message = Vec::new();
    message.push(0u8); // magic
    message.push(0u8); // attributes; per-message compression is unused, batches compress as a whole
    match &record.key {
        Some(k) => {
            message.extend_from_slice(&(k.len() as i32).to_be_bytes());
            message.extend_from_slice(k);
        }
        None => message.extend_from_slice(&(-1i32).to_be_bytes()),
    }
    match &record.value {
        Some(v) => {
            message.extend_from_slice(&(v.len() as i32).to_be_bytes());
            message.extend_from_slice(v);
        }
        None => message.extend_from_slice(&(-1i32).to_be_bytes()),
    }
    let crc = crc32c::crc32c(&message);

    buf.extend_from_slice(&relative_offset.to_be_bytes());
    buf.extend_from_slice(&((message.len() + 4) as i32).to_be_bytes());
    buf.extend_from_slice(&crc.to_be_bytes());
    buf.extend_from_slice(&message);
}

#[derive(Default)]
struct AccumulatorState {
    batches: HashMap<TopicPartition, VecDeque<Batch>>,
}

/// Result of [`RecordAccumulator::drain_by_nodes`]: batches ready to ship,
/// grouped by the leader node that should receive them, plus whether any
/// partition with data has an unresolved leader.
pub struct Drained {
    pub by_node: HashMap<NodeId, HashMap<TopicPartition, Batch>>,
    pub unknown_leaders_exist: bool,
}

/// Buffers per-partition batches with bounded memory and bounded latency
///
pub struct RecordAccumulator {
    max_batch_size: usize,
    linger: Duration,
    request_timeout: Duration,
    compression: Compression,
    state: Mutex<AccumulatorState>,
    notify: Notify,
    closed: AtomicBool,
}

impl RecordAccumulator {
    pub fn new(
        max_batch_size: usize,
        linger: Duration,
        request_timeout: Duration,
        compression: Compression,
    ) -> Self {
        Self {
            max_batch_size,
            linger,
            request_timeout,
            compression,
            state: Mutex::new(AccumulatorState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Finds or creates the tail batch for `tp`; blocks on a full tail
    /// (at most one sealed batch plus the open tail per partition) until
    /// it is drained or `timeout` elapses.
    pub async fn append(
        &self,
        tp: TopicPartition,
        record: Record,
        timeout: Duration,
    ) -> Result<Completion, SendError> {
        let record_size = record.wire_size();
        if record_size > self.max_batch_size {
            return Err(SendError::MessageTooLarge {
                size: record_size,
                max: self.max_batch_size,
            });
        }

        let deadline = Instant::now() + timeout;

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(SendError::ProducerClosed);
            }

            let mut state = self.state.lock().await;
            let queue = state.batches.entry(tp.clone()).or_default();

            // Captured before this call might seal the tail below, so it
            // reflects batches that were *already* waiting, not the one
            // we're about to seal ourselves.
            let sealed_waiting = queue.iter().any(|b| b.state() == BatchState::Sealed);

            if let Some(tail) = queue.back_mut() {
                if tail.state() == BatchState::Open {
                    if tail.would_fit(record_size, self.max_batch_size) {
                        let rx = tail.push(record);
                        drop(state);
                        self.notify.notify_one();
                        return Ok(rx);
                    }
                    tail.seal();
                    trace!(partition = %tp, "sealed tail batch: next record would overflow it");
                }
            }

            if !sealed_waiting {
                let mut fresh = Batch::new(tp.clone(), self.compression, self.request_timeout);
                let rx = fresh.push(record);
                queue.push_back(fresh);
                drop(state);
                self.notify.notify_one();
                return Ok(rx);
            }

            // Subscribe before releasing the lock so a drain that happens
            // between our check and the wait below is not missed.
            let notified = self.notify.notified();
            drop(state);

            if Instant::now() >= deadline {
                return Err(SendError::BufferFull(tp));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Err(SendError::BufferFull(tp));
            }
        }
    }

    /// Drains at most one ready batch per partition,
    /// grouped by leader node.
    pub async fn drain_by_nodes(
        &self,
        metadata: &dyn MetadataView,
        ignore_nodes: &HashSet<NodeId>,
    ) -> Drained {
        let now = Instant::now();
        let closing = self.closed.load(Ordering::Acquire);
        let mut by_node: HashMap<NodeId, HashMap<TopicPartition, Batch>> = HashMap::new();
        let mut unknown_leaders_exist = false;

        let mut state = self.state.lock().await;
        let mut now_empty = Vec::new();

        for (tp, queue) in state.batches.iter_mut() {
            if queue.is_empty() {
                now_empty.push(tp.clone());
                continue;
            }

            if let Some(tail) = queue.back_mut() {
                if tail.state() == BatchState::Open
                    && (tail.is_full(self.max_batch_size)
                        || tail.age(now) >= self.linger
                        || closing)
                {
                    tail.seal();
                }
            }

            let front_ready = matches!(queue.front().map(Batch::state), Some(BatchState::Sealed));
            if !front_ready {
                continue;
            }

            match metadata.leader_for_partition(tp) {
                None | Some(-1) => {
                    unknown_leaders_exist = true;
                }
                Some(node_id) if ignore_nodes.contains(&node_id) => {}
                Some(node_id) => {
                    let mut batch = queue.pop_front().expect("front checked Sealed above");
                    batch.mark_in_flight();
                    by_node.entry(node_id).or_default().insert(tp.clone(), batch);
                    if queue.is_empty() {
                        now_empty.push(tp.clone());
                    }
                }
            }
        }

        for tp in now_empty {
            if state
                .batches
                .get(&tp)
                .map(VecDeque::is_empty)
                .unwrap_or(false)
            {
                state.batches.remove(&tp);
            }
        }

        Drained {
            by_node,
            unknown_leaders_exist,
        }
    }

    /// Resolves the next time a partition becomes
    /// drainable.
    pub async fn data_waiter(&self) {
        self.notify.notified().await;
    }

    /// Whether every partition's queue is currently empty.
    pub async fn is_drained(&self) -> bool {
        self.state.lock().await.batches.values().all(VecDeque::is_empty)
    }

    /// Seals all open tails and stops accepting appends.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut state = self.state.lock().await;
        for queue in state.batches.values_mut() {
            if let Some(tail) = queue.back_mut() {
                if tail.state() == BatchState::Open {
                    tail.seal();
                }
            }
        }
        drop(state);
        debug!("accumulator closed, all open tails sealed");
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct FixedMetadata {
        leaders: StdHashMap<TopicPartition, Option<NodeId>>,
    }

    impl MetadataView for FixedMetadata {
        fn topics(&self) -> HashSet<String> {
            HashSet::new()
        }
        fn partitions_for_topic(&self, _topic: &str) -> Option<HashSet<i32>> {
            None
        }
        fn available_partitions_for_topic(&self, _topic: &str) -> HashSet<i32> {
            HashSet::new()
        }
        fn leader_for_partition(&self, tp: &TopicPartition) -> Option<NodeId> {
            self.leaders.get(tp).copied().flatten()
        }
    }

    fn tp() -> TopicPartition {
        TopicPartition::new("t", 0)
    }

    #[tokio::test]
    async fn append_then_drain_resolves_in_order_offsets() {
        let acc = RecordAccumulator::new(16_384, Duration::ZERO, Duration::from_secs(30), Compression::None);
        let mut rxs = Vec::new();
        for i in 0..3 {
            let rx = acc
                .append(
                    tp(),
                    Record::new(None, Some(format!("v{i}").into_bytes())),
                    Duration::from_secs(1),
                )
                .await
                .unwrap();
            rxs.push(rx);
        }

        let metadata = FixedMetadata {
            leaders: StdHashMap::from([(tp(), Some(7))]),
        };
        let drained = acc.drain_by_nodes(&metadata, &HashSet::new()).await;
        assert!(!drained.unknown_leaders_exist);
        let mut by_node = drained.by_node;
        let batch = by_node
            .remove(&7)
            .and_then(|mut m| m.remove(&tp()))
            .expect("batch drained to node 7");
        assert_eq!(batch.record_count(), 3);

        batch.done_success(100);
        for (i, rx) in rxs.into_iter().enumerate() {
            let meta = rx.await.unwrap().unwrap();
            assert_eq!(meta.offset, 100 + i as i64);
        }
    }

    #[tokio::test]
    async fn unknown_leader_is_reported_and_batch_stays_queued() {
        let acc = RecordAccumulator::new(16_384, Duration::ZERO, Duration::from_secs(30), Compression::None);
        acc.append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();

        let metadata = FixedMetadata {
            leaders: StdHashMap::from([(tp(), None)]),
        };
        let drained = acc.drain_by_nodes(&metadata, &HashSet::new()).await;
        assert!(drained.unknown_leaders_exist);
        assert!(drained.by_node.is_empty());
        assert!(!acc.is_drained().await);
    }

    #[tokio::test]
    async fn ignored_node_keeps_batch_queued_for_ordering() {
        let acc = RecordAccumulator::new(16_384, Duration::ZERO, Duration::from_secs(30), Compression::None);
        acc.append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();

        let metadata = FixedMetadata {
            leaders: StdHashMap::from([(tp(), Some(7))]),
        };
        let ignore = HashSet::from([7]);
        let drained = acc.drain_by_nodes(&metadata, &ignore).await;
        assert!(drained.by_node.is_empty());
        assert!(!drained.unknown_leaders_exist);
    }

    #[tokio::test]
    async fn oversized_record_is_rejected_before_buffering() {
        let acc = RecordAccumulator::new(32, Duration::ZERO, Duration::from_secs(30), Compression::None);
        let err = acc
            .append(
                tp(),
                Record::new(None, Some(vec![0u8; 64])),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn append_after_close_fails_with_producer_closed() {
        let acc = RecordAccumulator::new(16_384, Duration::ZERO, Duration::from_secs(30), Compression::None);
        acc.close().await;
        let err = acc
            .append(tp(), Record::new(None, Some(b"v".to_vec())), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::ProducerClosed));
    }

    #[tokio::test]
    async fn second_overflow_opens_a_fresh_tail_instead_of_blocking() {
        // max_batch_size small enough that one record nearly fills it.
        let acc = RecordAccumulator::new(40, Duration::from_secs(10), Duration::from_secs(30), Compression::None);
        let _rx1 = acc
            .append(tp(), Record::new(None, Some(b"first".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();

        // This record doesn't fit in the first tail, sealing it — but since
        // no *other* sealed batch was already waiting, a fresh tail opens
        // immediately rather than blocking.
        let _rx2 = acc
            .append(tp(), Record::new(None, Some(b"second".to_vec())), Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn third_overflow_blocks_until_drained_then_times_out_if_never_drained() {
        let acc = RecordAccumulator::new(40, Duration::from_secs(10), Duration::from_secs(30), Compression::None);
        let _rx1 = acc
            .append(tp(), Record::new(None, Some(b"first".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();
        // Seals the first tail and opens a second.
        let _rx2 = acc
            .append(tp(), Record::new(None, Some(b"second".to_vec())), Duration::from_secs(1))
            .await
            .unwrap();

        // Now one sealed batch is already waiting (undrained) and this
        // record would overflow the open second tail too, so the queue is
        // at its bound: this call blocks until a drain, then times out
        // since nothing ever drains it.
        let err = acc
            .append(
                tp(),
                Record::new(None, Some(b"third!".to_vec())),
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::BufferFull(_)));
    }
}
