//! The Produce Request Builder: groups one node's batches by topic into the
//! per-topic `(partition, bytes)` shape a [`ProduceRequest`] carries.

use std::collections::HashMap;
use std::time::Duration;

use crate::producer::accumulator::Batch;
use crate::protocol::{Acks, EncodedBatch, ProduceRequest};
use crate::record::TopicPartition;

/// Groups a node's batches by topic, the per-topic `(partition, bytes)` shape
/// a [`ProduceRequest`] carries. Borrows rather than consumes so the sender's
/// retry loop — which keeps retrying a shrinking `batches` map — can rebuild
/// a request each pass without giving up ownership of the batches.
pub fn group_by_topic(batches: &HashMap<TopicPartition, Batch>) -> Vec<(String, Vec<EncodedBatch>)> {
    let mut by_topic: HashMap<String, Vec<EncodedBatch>> = HashMap::new();
    for (tp, batch) in batches {
        by_topic
            .entry(tp.topic.clone())
            .or_default()
            .push(EncodedBatch {
                partition: tp.partition,
                bytes: batch.encoded_bytes(),
            });
    }
    by_topic.into_iter().collect()
}

pub fn build_request(batches: &HashMap<TopicPartition, Batch>, acks: Acks, timeout: Duration) -> ProduceRequest {
    ProduceRequest::new(acks, timeout, group_by_topic(batches))
}
