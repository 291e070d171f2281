// Event bus — ordered, at-least-once delivery of feed events to consumers.
//
// Messages are partitioned by key (the event type), so same-type events are
// consumed in relative order by a single worker. Consumers acknowledge by
// committing an offset per (group, partition); anything past the committed
// offset is redelivered after a restart.

pub mod consumer;

use anyhow::Result;
use async_trait::async_trait;

pub use consumer::{spawn_consumers, MessageHandler, PartitionConsumer};

/// A message as handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub offset: i64,
    pub partition: u32,
    pub key: String,
    pub payload: String,
}

/// Where a published message landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusReceipt {
    pub partition: u32,
    pub offset: i64,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Number of partitions messages are spread across.
    fn partitions(&self) -> u32;

    /// Append a message to the partition chosen by `key`.
    async fn publish(&self, key: &str, payload: &str) -> Result<BusReceipt>;

    /// Up to `max` messages past the group's committed offset, in order.
    async fn fetch(&self, group: &str, partition: u32, max: usize) -> Result<Vec<BusMessage>>;

    /// Acknowledge everything up to and including `offset`.
    async fn commit(&self, group: &str, partition: u32, offset: i64) -> Result<()>;

    /// Messages in the partition not yet acknowledged by the group.
    async fn lag(&self, group: &str, partition: u32) -> Result<i64>;
}

/// Stable key → partition mapping (FNV-1a), identical across processes.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let partitions = partitions.max(1);
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for key in ["article_published", "article_liked", "user_followed"] {
            let first = partition_for(key, 4);
            assert!(first < 4);
            assert_eq!(first, partition_for(key, 4));
        }
    }

    #[test]
    fn test_single_partition_takes_everything() {
        assert_eq!(partition_for("article_published", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }
}
