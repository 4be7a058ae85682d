//! The external collaborators this crate consumes but does not implement:
//! the wire codec / connection pool (a [`ClusterClient`]) and the
//! cluster-metadata cache (a [`MetadataView`]).
//!
//! Only their interfaces matter here: these are plain `async_trait` traits so
//! a real wire-protocol implementation can be dropped in without this crate
//! depending on it.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::protocol::{ProduceRequest, ProduceResponse};
use crate::record::TopicPartition;

/// The broker id type used throughout the producer core.
pub type NodeId = i32;

/// A read-only view over the cluster's current topic/partition/leader
/// layout, as cached and refreshed by the [`ClusterClient`].
pub trait MetadataView: Send + Sync {
    /// All topics currently known to the cache.
    fn topics(&self) -> HashSet<String>;

    /// Partitions known for `topic`, or `None` if the topic itself is
    /// unknown.
    fn partitions_for_topic(&self, topic: &str) -> Option<HashSet<i32>>;

    /// The subset of `partitions_for_topic` whose leader is currently known
    /// and available. Used by the default partitioner to avoid routing to a
    /// partition with no reachable leader.
    fn available_partitions_for_topic(&self, topic: &str) -> HashSet<i32>;

    /// `None` means the leader is unknown (a metadata refresh is needed);
    /// `Some(-1)` means the broker reported the partition as leaderless.
    fn leader_for_partition(&self, tp: &TopicPartition) -> Option<NodeId>;
}

/// Errors a [`ClusterClient`] can report back from `send`.
///
/// Transport-level failures are always retriable from the sender's point of
/// view; this trait only needs to say so.
pub trait ClusterError: std::fmt::Display + std::fmt::Debug + Send + Sync {
    fn retriable(&self) -> bool;
}

/// The connection pool + wire codec the producer core sends requests
/// through. Implementations own the actual TCP sockets and the Kafka binary
/// protocol encode/decode; this crate only calls the methods below.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    type Error: ClusterError;

    /// Establish initial contact with the cluster.
    async fn bootstrap(&self) -> Result<(), Self::Error>;

    /// Probe the cluster and report its effective API version, e.g. `"0.9"`.
    async fn check_version(&self) -> Result<String, Self::Error>;

    /// Force an out-of-band metadata refresh. Returns whether the refresh
    /// found anything new.
    async fn force_metadata_update(&self) -> Result<bool, Self::Error>;

    /// Add `topic` to the set of topics the metadata cache tracks.
    fn add_topic(&self, topic: &str);

    /// Send a produce request to `node_id` and await its response.
    async fn send(
        &self,
        node_id: NodeId,
        request: ProduceRequest,
    ) -> Result<ProduceResponse, Self::Error>;

    /// Tear down all connections.
    async fn close(&self);

    /// The metadata cache this client maintains.
    fn cluster(&self) -> &dyn MetadataView;
}
