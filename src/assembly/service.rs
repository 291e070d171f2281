// Feed Assembly Service — the read path.
//
// A page is the reader's inbox page (everything pushed to them) plus the
// latest outbox items of each big-V they follow, merged newest first and
// rendered. Nothing about one followee or one item can fail the page; only
// an unreadable inbox does.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::render::{RenderedFeedItem, Renderer};
use super::trim::TrimQueue;
use crate::collab::{ArticleDirectory, CachedUserDirectory, FollowGraph, UserDirectory};
use crate::config::FeedSettings;
use crate::fanout::{classify, Reach};
use crate::feed::{FeedStore, Mailbox, UserFeedItem};
use crate::timeout::bounded;

/// Largest page a single read may ask for.
pub const MAX_PAGE_SIZE: usize = 100;

const USER_CACHE_TTL: Duration = Duration::from_secs(60);
const USER_CACHE_CAPACITY: usize = 10_000;

pub struct FeedService {
    store: Arc<dyn FeedStore>,
    graph: Arc<dyn FollowGraph>,
    renderer: Renderer,
    trims: TrimQueue,
    settings: FeedSettings,
}

impl FeedService {
    /// Build the service and start its trim workers. Must be called from
    /// inside a tokio runtime.
    pub fn new(
        store: Arc<dyn FeedStore>,
        graph: Arc<dyn FollowGraph>,
        articles: Arc<dyn ArticleDirectory>,
        users: Arc<dyn UserDirectory>,
        settings: FeedSettings,
    ) -> Self {
        let users: Arc<dyn UserDirectory> = Arc::new(CachedUserDirectory::new(
            users,
            USER_CACHE_TTL,
            USER_CACHE_CAPACITY,
        ));
        let renderer = Renderer::new(articles, users, settings.io_timeout);
        let trims = TrimQueue::spawn(store.clone(), &settings);

        Self {
            store,
            graph,
            renderer,
            trims,
            settings,
        }
    }

    /// What `user_id` should see for this page, rendered.
    ///
    /// `limit` is clamped to 1..=[`MAX_PAGE_SIZE`] and applies to the inbox
    /// page; big-V items are added on top.
    pub async fn get_user_feed(
        &self,
        user_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RenderedFeedItem>> {
        let items = self.collect_items(user_id, offset, limit).await?;
        let total = items.len();

        let rendered: Vec<RenderedFeedItem> = stream::iter(items)
            .map(move |item| async move {
                match self.renderer.render(user_id, &item).await {
                    Ok(rendered) => Some(rendered),
                    Err(e) => {
                        warn!(user_id, item_id = %item.item_id, error = %e, "Dropping unrenderable feed item");
                        None
                    }
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .filter_map(|rendered| async move { rendered })
            .collect()
            .await;

        debug!(
            user_id,
            offset,
            rendered = rendered.len(),
            dropped = total - rendered.len(),
            "Assembled feed page"
        );

        self.trims.schedule(user_id);
        Ok(rendered)
    }

    /// The merged, unrendered items behind a feed page.
    pub async fn collect_items(
        &self,
        user_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserFeedItem>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let inbox = bounded(
            self.settings.io_timeout,
            "inbox read",
            self.store.page(Mailbox::Inbox, user_id, offset, limit),
        )
        .await
        .with_context(|| format!("Failed to read inbox for user {user_id}"))?;

        let sources = self.pull_sources(user_id).await;
        let pulled = self.pull_outboxes(&sources).await;

        Ok(merge_by_recency(inbox, pulled))
    }

    /// Followees of `user_id` served by pull (big-V). Followees whose
    /// follower count can't be read are left out of this pass.
    pub async fn pull_sources(&self, user_id: i64) -> Vec<i64> {
        let followees = match bounded(
            self.settings.io_timeout,
            "followee list",
            self.graph
                .list_followees(user_id, 0, self.settings.max_followees),
        )
        .await
        {
            Ok(followees) => followees,
            Err(e) => {
                warn!(user_id, error = %e, "Followee list unavailable, serving inbox only");
                return Vec::new();
            }
        };

        let io_timeout = self.settings.io_timeout;
        let threshold = self.settings.big_v_threshold;
        let graph = self.graph.as_ref();

        stream::iter(followees)
            .map(move |followee| async move {
                let count =
                    bounded(io_timeout, "follower count", graph.follower_count(followee)).await;
                (followee, count)
            })
            .buffered(self.settings.concurrency.max(1))
            .filter_map(move |(followee, count)| async move {
                match count {
                    Ok(count) if classify(count, threshold) == Reach::Pull => Some(followee),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(followee, error = %e, "Could not classify followee, skipping");
                        None
                    }
                }
            })
            .collect()
            .await
    }

    async fn pull_outboxes(&self, sources: &[i64]) -> Vec<UserFeedItem> {
        let io_timeout = self.settings.io_timeout;
        let per_source = self.settings.pull_per_source;
        let store = self.store.as_ref();

        let pages: Vec<Vec<UserFeedItem>> = stream::iter(sources.iter().copied())
            .map(move |source| async move {
                match bounded(
                    io_timeout,
                    "outbox read",
                    store.page(Mailbox::Outbox, source, 0, per_source),
                )
                .await
                {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(source, error = %e, "Outbox read failed, skipping source");
                        Vec::new()
                    }
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        pages.into_iter().flatten().collect()
    }

    /// Stop the trim workers after draining queued trims.
    pub async fn shutdown(self) {
        self.trims.close().await;
    }
}

/// Newest first (ties broken by item ID, descending), keeping only the
/// newest copy of any item ID.
pub fn merge_by_recency(
    inbox: Vec<UserFeedItem>,
    pulled: Vec<UserFeedItem>,
) -> Vec<UserFeedItem> {
    let mut items: Vec<UserFeedItem> = inbox.into_iter().chain(pulled).collect();
    items.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.item_id.cmp(&a.item_id))
    });

    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.item_id.clone()));
    items
}
