// Delivery planning — what an event turns into, before any I/O.
//
// Both the live dispatcher and the rebuild replay derive their writes from
// the same plan, so a rebuilt feed matches what live delivery produced.

use anyhow::Result;

use crate::events::{EventPayload, FeedEvent};
use crate::feed::UserFeedItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    /// The item written to the actor's outbox and pushed to followers.
    pub item: UserFeedItem,
    pub actor_id: i64,
    /// Owner of the content reacted to, for point delivery. Never the actor.
    pub notify: Option<i64>,
    /// Whether followers of the actor receive the item. Feedback (likes,
    /// comments, collects) is point-delivered only.
    pub fan_out: bool,
}

impl DeliveryPlan {
    /// Does this plan put the item into `user_id`'s inbox regardless of
    /// follow relationships?
    pub fn notifies(&self, user_id: i64) -> bool {
        self.notify == Some(user_id)
    }
}

pub fn plan(event: &FeedEvent) -> Result<DeliveryPlan> {
    let item = UserFeedItem::from_event(event)?;
    let notify = event
        .payload
        .notify_target()
        .filter(|target| *target != event.user_id);
    let fan_out = !matches!(
        event.payload,
        EventPayload::Liked { .. } | EventPayload::Commented { .. } | EventPayload::Collected { .. }
    );

    Ok(DeliveryPlan {
        item,
        actor_id: event.user_id,
        notify,
        fan_out,
    })
}
