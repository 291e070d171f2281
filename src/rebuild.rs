// Rebuild Procedure — recover one user's inbox and outbox from the event log.
//
// The log is replayed once over the requested window. The user's own events
// go to their outbox; fanned-out events from followees served by push, and
// feedback aimed at the user, go to their inbox. Big-V followees are not replayed:
// their current outbox head is copied instead, so the cost stays bounded by
// the user's own neighbourhood rather than by any big-V's total volume.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::collab::FollowGraph;
use crate::config::RebuildSettings;
use crate::events::EventLog;
use crate::fanout::{classify, plan, Reach};
use crate::feed::{FeedStore, Mailbox, UserFeedItem};
use crate::timeout::bounded;

/// Window used when the caller asks for zero or fewer days.
pub const DEFAULT_SINCE_DAYS: i64 = 30;
/// Longest window a rebuild will replay.
pub const MAX_SINCE_DAYS: i64 = 90;

pub fn clamp_since_days(since_days: i64) -> i64 {
    if since_days <= 0 {
        DEFAULT_SINCE_DAYS
    } else {
        since_days.min(MAX_SINCE_DAYS)
    }
}

/// What a rebuild did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub user_id: i64,
    pub since_days: i64,
    pub events_scanned: usize,
    pub outbox_written: usize,
    pub inbox_written: usize,
    /// Followees replayed from the log.
    pub push_followees: usize,
    /// Followees whose outbox head was copied instead.
    pub big_v_sources: usize,
    /// Followees left out because their follower count couldn't be read.
    pub unclassified: usize,
    /// Events or writes that failed and were passed over.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Rebuilder {
    log: Arc<dyn EventLog>,
    store: Arc<dyn FeedStore>,
    graph: Arc<dyn FollowGraph>,
    settings: RebuildSettings,
}

impl Rebuilder {
    pub fn new(
        log: Arc<dyn EventLog>,
        store: Arc<dyn FeedStore>,
        graph: Arc<dyn FollowGraph>,
        settings: RebuildSettings,
    ) -> Self {
        Self {
            log,
            store,
            graph,
            settings,
        }
    }

    /// Rebuild `user_id`'s feed from the last `since_days` of events.
    pub async fn rebuild_user_feed(&self, user_id: i64, since_days: i64) -> Result<RebuildReport> {
        let since_days = clamp_since_days(since_days);
        let mut report = RebuildReport {
            user_id,
            since_days,
            ..RebuildReport::default()
        };

        // Classify first: if the follow graph is down, leave the feed alone.
        let followees = bounded(
            self.settings.io_timeout,
            "followee list",
            self.graph
                .list_followees(user_id, 0, self.settings.max_followees),
        )
        .await
        .with_context(|| format!("Failed to list followees of user {user_id}"))?;

        let (push, pull) = self.classify_followees(followees, &mut report).await;
        report.push_followees = push.len();
        report.big_v_sources = pull.len();

        for mailbox in [Mailbox::Inbox, Mailbox::Outbox] {
            bounded(
                self.settings.io_timeout,
                "feed clear",
                self.store.clear(mailbox, user_id),
            )
            .await
            .with_context(|| format!("Failed to clear {mailbox} of user {user_id}"))?;
        }

        self.replay(user_id, since_days, &push, &mut report).await?;
        self.copy_big_v_heads(user_id, &pull, &mut report).await;

        Ok(report)
    }

    /// Run a rebuild on a background task bounded by the overall rebuild
    /// deadline. The outcome is only logged.
    pub fn launch(&self, user_id: i64, since_days: i64) -> JoinHandle<()> {
        let rebuilder = self.clone();
        tokio::spawn(async move {
            let result = bounded(
                rebuilder.settings.timeout,
                "feed rebuild",
                rebuilder.rebuild_user_feed(user_id, since_days),
            )
            .await;
            match result {
                Ok(report) => info!(
                    user_id,
                    events = report.events_scanned,
                    inbox = report.inbox_written,
                    outbox = report.outbox_written,
                    skipped = report.skipped,
                    "Feed rebuild complete"
                ),
                Err(e) => error!(user_id, error = %e, "Background feed rebuild failed"),
            }
        })
    }

    /// Split followees into (push, pull) sets.
    async fn classify_followees(
        &self,
        followees: Vec<i64>,
        report: &mut RebuildReport,
    ) -> (HashSet<i64>, Vec<i64>) {
        let io_timeout = self.settings.io_timeout;
        let graph = self.graph.as_ref();

        let counts: Vec<(i64, Result<i64>)> = stream::iter(followees)
            .map(move |followee| async move {
                let count =
                    bounded(io_timeout, "follower count", graph.follower_count(followee)).await;
                (followee, count)
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut push = HashSet::new();
        let mut pull = Vec::new();
        for (followee, count) in counts {
            match count {
                Ok(count) => match classify(count, self.settings.big_v_threshold) {
                    Reach::Push => {
                        push.insert(followee);
                    }
                    Reach::Pull => pull.push(followee),
                },
                Err(e) => {
                    warn!(followee, error = %e, "Could not classify followee, leaving out of rebuild");
                    report.unclassified += 1;
                }
            }
        }
        (push, pull)
    }

    async fn replay(
        &self,
        user_id: i64,
        since_days: i64,
        push: &HashSet<i64>,
        report: &mut RebuildReport,
    ) -> Result<()> {
        let since = Utc::now() - ChronoDuration::days(since_days);
        let page_size = self.settings.page_size.max(1);
        let mut processed = HashSet::new();
        let mut offset = 0;

        loop {
            let events = bounded(
                self.settings.io_timeout,
                "event log read",
                self.log.list_since(since, offset, page_size),
            )
            .await
            .context("Failed to read event log")?;
            let fetched = events.len();
            report.events_scanned += fetched;

            for event in &events {
                if !processed.insert(event.id) {
                    continue;
                }
                let plan = match plan(event) {
                    Ok(plan) => plan,
                    Err(e) => {
                        warn!(event_id = event.id, error = %e, "Skipping event during rebuild");
                        report.skipped += 1;
                        continue;
                    }
                };

                let mailbox = if event.user_id == user_id {
                    Mailbox::Outbox
                } else if (plan.fan_out && push.contains(&event.user_id))
                    || plan.notifies(user_id)
                {
                    Mailbox::Inbox
                } else {
                    continue;
                };

                if self.write(mailbox, user_id, &plan.item).await {
                    match mailbox {
                        Mailbox::Inbox => report.inbox_written += 1,
                        Mailbox::Outbox => report.outbox_written += 1,
                    }
                } else {
                    report.skipped += 1;
                }
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        Ok(())
    }

    async fn copy_big_v_heads(&self, user_id: i64, sources: &[i64], report: &mut RebuildReport) {
        for &source in sources {
            let items = match bounded(
                self.settings.io_timeout,
                "outbox read",
                self.store
                    .page(Mailbox::Outbox, source, 0, self.settings.pull_per_source),
            )
            .await
            {
                Ok(items) => items,
                Err(e) => {
                    warn!(source, error = %e, "Could not read big-V outbox, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            for item in &items {
                if self.write(Mailbox::Inbox, user_id, item).await {
                    report.inbox_written += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }
    }

    async fn write(&self, mailbox: Mailbox, owner: i64, item: &UserFeedItem) -> bool {
        match bounded(
            self.settings.io_timeout,
            "rebuild write",
            self.store.push(mailbox, owner, item),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(owner, %mailbox, item_id = %item.item_id, error = %e, "Rebuild write failed");
                false
            }
        }
    }
}
