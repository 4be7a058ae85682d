//! The produced/consumed wire-level shapes.
//!
//! The actual byte-level framing and the socket plumbing are the *Cluster
//! Client*'s job (out of scope here, see [`crate::cluster`]); this module
//! only carries the request/response data the producer core builds and
//! interprets, plus the broker error-code taxonomy.

use std::time::Duration;

use crate::record::TopicPartition;

/// Acknowledgement level requested for a produce call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    /// Fire-and-forget: the client never learns the real offset.
    None,
    /// Leader-only acknowledgement.
    Leader,
    /// Full in-sync-replica set acknowledgement (`"all"`/`-1`).
    All,
}

impl Acks {
    pub fn as_i16(self) -> i16 {
        match self {
            Acks::None => 0,
            Acks::Leader => 1,
            Acks::All => -1,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Acks::None),
            1 => Some(Acks::Leader),
            -1 => Some(Acks::All),
            _ => None,
        }
    }
}

/// One already-encoded, already-sealed batch of records, ready to be placed
/// into a [`ProduceRequest`].
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub partition: i32,
    pub bytes: Vec<u8>,
}

/// A produce request grouped by topic, as sent to a single broker node.
///
/// Mirrors `kafka.protocol.produce.ProduceRequest`: `required_acks`,
/// `timeout`, and a nested `topics: [(topic, [(partition, bytes)])]` shape.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub required_acks: Acks,
    pub timeout: Duration,
    pub topics: Vec<(String, Vec<EncodedBatch>)>,
}

impl ProduceRequest {
    /// Builds a request from a fully-formed `topic -> [(partition, bytes)]`
    /// table. Insertion order is the iteration order of `topics`.
    pub fn new(
        required_acks: Acks,
        timeout: Duration,
        topics: Vec<(String, Vec<EncodedBatch>)>,
    ) -> Self {
        Self {
            required_acks,
            timeout,
            topics,
        }
    }
}

/// A single partition's outcome inside a [`ProduceResponse`].
#[derive(Debug, Clone)]
pub struct PartitionResponse {
    pub partition: i32,
    pub error_code: ErrorCode,
    pub base_offset: i64,
}

/// The per-topic, per-partition `(error_code, base_offset)` triples a broker
/// returns for a produce request issued with `acks != 0`.
#[derive(Debug, Clone, Default)]
pub struct ProduceResponse {
    pub topics: Vec<(String, Vec<PartitionResponse>)>,
}

impl ProduceResponse {
    /// Flattens the response into `(TopicPartition, error_code, base_offset)`
    /// triples, the shape the sender's per-node task actually consumes.
    pub fn into_flat(self) -> Vec<(TopicPartition, ErrorCode, i64)> {
        self.topics
            .into_iter()
            .flat_map(|(topic, partitions)| {
                partitions.into_iter().map(move |p| {
                    (
                        TopicPartition::new(topic.clone(), p.partition),
                        p.error_code,
                        p.base_offset,
                    )
                })
            })
            .collect()
    }
}

/// Broker-declared error codes for a produce response, with the
/// `retriable` predicate the sender's retry logic keys off of.
///
/// Numeric values match the Kafka wire protocol so a real `ClusterClient`
/// implementation can convert directly from the bytes it reads off the
/// socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    NoError,
    Unknown,
    OffsetOutOfRange,
    CorruptMessage,
    UnknownTopicOrPartition,
    InvalidFetchSize,
    LeaderNotAvailable,
    NotLeaderForPartition,
    RequestTimedOut,
    MessageSizeTooLarge,
    NotEnoughReplicas,
    NotEnoughReplicasAfterAppend,
    InvalidTopicException,
    RecordListTooLarge,
    NotController,
}

impl ErrorCode {
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => ErrorCode::NoError,
            1 => ErrorCode::OffsetOutOfRange,
            2 => ErrorCode::CorruptMessage,
            3 => ErrorCode::UnknownTopicOrPartition,
            4 => ErrorCode::InvalidFetchSize,
            5 => ErrorCode::LeaderNotAvailable,
            6 => ErrorCode::NotLeaderForPartition,
            7 => ErrorCode::RequestTimedOut,
            10 => ErrorCode::MessageSizeTooLarge,
            17 => ErrorCode::InvalidTopicException,
            18 => ErrorCode::RecordListTooLarge,
            19 => ErrorCode::NotEnoughReplicas,
            20 => ErrorCode::NotEnoughReplicasAfterAppend,
            41 => ErrorCode::NotController,
            _ => ErrorCode::Unknown,
        }
    }

    /// Whether a subsequent attempt may succeed without application
    /// intervention. Leadership-in-flux and transient timeout/replica codes
    /// are retriable; malformed-request and size-limit codes are not.
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderForPartition
                | ErrorCode::RequestTimedOut
                | ErrorCode::NotEnoughReplicas
                | ErrorCode::NotEnoughReplicasAfterAppend
                | ErrorCode::NotController
                | ErrorCode::Unknown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_roundtrip_retriability() {
        assert!(ErrorCode::from_code(5).retriable());
        assert!(ErrorCode::from_code(7).retriable());
        assert!(!ErrorCode::from_code(10).retriable());
        assert!(!ErrorCode::from_code(17).retriable());
        assert_eq!(ErrorCode::from_code(0), ErrorCode::NoError);
    }

    #[test]
    fn acks_i16_roundtrip() {
        for acks in [Acks::None, Acks::Leader, Acks::All] {
            assert_eq!(Acks::from_i16(acks.as_i16()), Some(acks));
        }
        assert_eq!(Acks::from_i16(2), None);
    }
}
