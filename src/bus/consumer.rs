// Consume loop — one worker per partition, fetch → handle → commit.
//
// Handlers never fail per message: anything wrong with an individual event
// is their business to log. Only bus-level failures (fetch or commit) reach
// this loop, and those back off for a fixed delay before the whole loop
// retries. Because the commit follows the handler, a crash between the two
// redelivers the message; handlers must be idempotent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BusMessage, EventBus};
use crate::config::BusSettings;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. Returning means the message may be acknowledged.
    async fn handle(&self, message: &BusMessage);
}

pub struct PartitionConsumer {
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn MessageHandler>,
    partition: u32,
    settings: BusSettings,
}

impl PartitionConsumer {
    pub fn new(
        bus: Arc<dyn EventBus>,
        handler: Arc<dyn MessageHandler>,
        partition: u32,
        settings: BusSettings,
    ) -> Self {
        Self {
            bus,
            handler,
            partition,
            settings,
        }
    }

    /// Fetch one batch, hand each message to the handler, and commit it.
    /// Returns how many messages were processed.
    pub async fn poll_once(&self) -> Result<usize> {
        let messages = self
            .bus
            .fetch(&self.settings.group, self.partition, self.settings.fetch_batch)
            .await?;

        for message in &messages {
            self.handler.handle(message).await;
            self.bus
                .commit(&self.settings.group, self.partition, message.offset)
                .await?;
        }

        Ok(messages.len())
    }

    /// Keep polling until `shutdown` flips to true (or its sender goes away).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            partition = self.partition,
            group = %self.settings.group,
            "Feed consumer started"
        );

        while !*shutdown.borrow() {
            let delay = match self.poll_once().await {
                Ok(0) => self.settings.poll_interval,
                Ok(count) => {
                    debug!(partition = self.partition, count, "Consumed batch");
                    continue;
                }
                Err(e) => {
                    warn!(
                        partition = self.partition,
                        error = %e,
                        retry_in_ms = self.settings.retry_delay.as_millis() as u64,
                        "Feed consume error, backing off"
                    );
                    self.settings.retry_delay
                }
            };

            if !pause(delay, &mut shutdown).await {
                break;
            }
        }

        info!(partition = self.partition, "Feed consumer stopped");
    }
}

/// Sleep for `delay` unless shutdown is signalled first.
/// Returns false when the consumer should stop.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let changed = tokio::select! {
        _ = tokio::time::sleep(delay) => None,
        result = shutdown.changed() => Some(result.is_ok()),
    };

    match changed {
        None => true,
        Some(false) => false,
        Some(true) => !*shutdown.borrow(),
    }
}

/// Start one consumer task per bus partition.
pub fn spawn_consumers(
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn MessageHandler>,
    settings: &BusSettings,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..bus.partitions())
        .map(|partition| {
            let consumer =
                PartitionConsumer::new(bus.clone(), handler.clone(), partition, settings.clone());
            tokio::spawn(consumer.run(shutdown.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusReceipt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Bus with one queued message whose fetch fails the first `failures` times.
    struct FlakyBus {
        failures: AtomicUsize,
        committed: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl EventBus for FlakyBus {
        fn partitions(&self) -> u32 {
            1
        }

        async fn publish(&self, _key: &str, _payload: &str) -> Result<BusReceipt> {
            anyhow::bail!("read-only")
        }

        async fn fetch(&self, _group: &str, partition: u32, _max: usize) -> Result<Vec<BusMessage>> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connection lost");
            }
            if !self.committed.lock().unwrap().is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![BusMessage {
                offset: 1,
                partition,
                key: "article_published".to_string(),
                payload: "{}".to_string(),
            }])
        }

        async fn commit(&self, _group: &str, _partition: u32, offset: i64) -> Result<()> {
            self.committed.lock().unwrap().push(offset);
            Ok(())
        }

        async fn lag(&self, _group: &str, _partition: u32) -> Result<i64> {
            Ok(0)
        }
    }

    struct CountingHandler(AtomicUsize);

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: &BusMessage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_settings() -> BusSettings {
        BusSettings {
            retry_delay: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            ..BusSettings::default()
        }
    }

    #[tokio::test]
    async fn test_consumer_retries_after_bus_error() {
        let bus = Arc::new(FlakyBus {
            failures: AtomicUsize::new(2),
            committed: Mutex::new(Vec::new()),
        });
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let (tx, rx) = watch::channel(false);

        let consumer = PartitionConsumer::new(bus.clone(), handler.clone(), 0, fast_settings());
        let task = tokio::spawn(consumer.run(rx));

        for _ in 0..100 {
            if !bus.committed.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
        assert_eq!(*bus.committed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_consumer_stops_when_sender_dropped() {
        let bus = Arc::new(FlakyBus {
            failures: AtomicUsize::new(0),
            committed: Mutex::new(vec![1]),
        });
        let handler = Arc::new(CountingHandler(AtomicUsize::new(0)));
        let (tx, rx) = watch::channel(false);
        let consumer = PartitionConsumer::new(bus, handler, 0, fast_settings());
        let task = tokio::spawn(consumer.run(rx));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("consumer should exit")
            .unwrap();
    }
}
