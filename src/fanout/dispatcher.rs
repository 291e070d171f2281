// Fan-out Dispatcher — the bus consumer's per-message state machine.
//
// received → classified → (pushed | recorded-as-pull-source) → acknowledged
//
// Feedback (likes, comments, collects) skips classification: it is a point
// delivery to the content owner only, whatever the actor's reach.
//
// Nothing here fails a message. Malformed input is dropped, and each
// individual store write is best-effort with its own deadline. The event is
// already in the durable log, so anything lost here is recoverable by a
// rebuild.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::classify::{classify, Reach};
use super::plan::{plan, DeliveryPlan};
use crate::bus::{BusMessage, MessageHandler};
use crate::collab::FollowGraph;
use crate::config::FanoutSettings;
use crate::events::FeedEvent;
use crate::feed::{FeedStore, Mailbox};
use crate::timeout::bounded;

/// What processing one message amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Undecodable payload; dropped without side effects.
    Malformed,
    /// Feedback: outbox plus the owner's inbox, never the actor's followers.
    PointOnly { notified: bool },
    /// The follower count lookup failed, so nothing was pushed.
    Unclassified { notified: bool },
    /// Copied into followers' inboxes.
    Pushed {
        followers: usize,
        delivered: usize,
        failed: usize,
        notified: bool,
    },
    /// Big-V actor: outbox only, no inbox writes.
    PullSource { followers: i64, notified: bool },
}

pub struct Dispatcher {
    store: Arc<dyn FeedStore>,
    graph: Arc<dyn FollowGraph>,
    settings: FanoutSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn FeedStore>,
        graph: Arc<dyn FollowGraph>,
        settings: FanoutSettings,
    ) -> Self {
        Self {
            store,
            graph,
            settings,
        }
    }

    /// Decode a bus payload and dispatch it.
    pub async fn dispatch_raw(&self, raw: &str) -> DispatchOutcome {
        match FeedEvent::from_json(raw) {
            Ok(event) => self.dispatch(&event).await,
            Err(e) => {
                warn!(error = %e, "Dropping malformed feed event");
                DispatchOutcome::Malformed
            }
        }
    }

    pub async fn dispatch(&self, event: &FeedEvent) -> DispatchOutcome {
        let plan = match plan(event) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(event_id = event.id, error = %e, "Dropping undeliverable feed event");
                return DispatchOutcome::Malformed;
            }
        };

        self.write_outbox(event.id, &plan).await;
        let notified = self.notify(event.id, &plan).await;
        if !plan.fan_out {
            return DispatchOutcome::PointOnly { notified };
        }

        let followers = match bounded(
            self.settings.io_timeout,
            "follower count",
            self.graph.follower_count(plan.actor_id),
        )
        .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    event_id = event.id,
                    actor = plan.actor_id,
                    error = %e,
                    "Could not classify actor, skipping fan-out"
                );
                return DispatchOutcome::Unclassified { notified };
            }
        };

        match classify(followers, self.settings.big_v_threshold) {
            Reach::Pull => {
                debug!(
                    event_id = event.id,
                    actor = plan.actor_id,
                    followers,
                    "Big-V actor, serving by pull"
                );
                DispatchOutcome::PullSource {
                    followers,
                    notified,
                }
            }
            Reach::Push => {
                let (followers, delivered, failed) = self.push_to_followers(event.id, &plan).await;
                info!(
                    event_id = event.id,
                    item_id = %plan.item.item_id,
                    delivered,
                    failed,
                    "Fan-out complete"
                );
                DispatchOutcome::Pushed {
                    followers,
                    delivered,
                    failed,
                    notified,
                }
            }
        }
    }

    async fn write_outbox(&self, event_id: i64, plan: &DeliveryPlan) {
        let result = bounded(
            self.settings.io_timeout,
            "outbox write",
            self.store.push(Mailbox::Outbox, plan.actor_id, &plan.item),
        )
        .await;
        if let Err(e) = result {
            warn!(event_id, actor = plan.actor_id, error = %e, "Outbox write failed");
        }
    }

    /// Point delivery to the owner of the content reacted to.
    async fn notify(&self, event_id: i64, plan: &DeliveryPlan) -> bool {
        let Some(target) = plan.notify else {
            return false;
        };
        match bounded(
            self.settings.io_timeout,
            "notification write",
            self.store.push(Mailbox::Inbox, target, &plan.item),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(event_id, target, error = %e, "Notification write failed");
                false
            }
        }
    }

    /// Page through followers and push the item into each inbox.
    /// Returns (followers seen, delivered, failed).
    async fn push_to_followers(&self, event_id: i64, plan: &DeliveryPlan) -> (usize, usize, usize) {
        let batch_size = self.settings.batch_size.max(1);
        let concurrency = self.settings.concurrency.max(1);
        let io_timeout = self.settings.io_timeout;
        let store = self.store.as_ref();
        let item = &plan.item;

        let mut seen = 0;
        let mut delivered = 0;
        let mut failed = 0;
        let mut offset = 0;

        loop {
            let batch = match bounded(
                io_timeout,
                "follower list",
                self.graph.list_followers(plan.actor_id, offset, batch_size),
            )
            .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        event_id,
                        actor = plan.actor_id,
                        offset,
                        error = %e,
                        "Follower page failed, stopping fan-out"
                    );
                    break;
                }
            };
            let fetched = batch.len();
            seen += fetched;

            let results: Vec<bool> = stream::iter(
                batch
                    .into_iter()
                    .filter(|follower| *follower != plan.actor_id),
            )
            .map(move |follower| async move {
                match bounded(
                    io_timeout,
                    "inbox write",
                    store.push(Mailbox::Inbox, follower, item),
                )
                .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(event_id, follower, error = %e, "Inbox write failed, skipping");
                        false
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

            for ok in results {
                if ok {
                    delivered += 1;
                } else {
                    failed += 1;
                }
            }

            if fetched < batch_size {
                break;
            }
            offset += fetched;
        }

        (seen, delivered, failed)
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, message: &BusMessage) {
        let outcome = self.dispatch_raw(&message.payload).await;
        debug!(
            partition = message.partition,
            offset = message.offset,
            ?outcome,
            "Handled bus message"
        );
    }
}
