// Request-coalescing user cache.
//
// Rendering a page looks up the same few actors over and over. Each user ID
// gets its own slot: concurrent misses on one ID share a single upstream
// lookup, while misses on different IDs proceed independently. Found users
// are kept until `ttl` passes; "not found" and errors are never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{UserDirectory, UserProfile};

struct Slot {
    cell: OnceCell<Option<UserProfile>>,
    created: Instant,
}

pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    slots: Mutex<HashMap<i64, Arc<Slot>>>,
    ttl: Duration,
    capacity: usize,
}

impl CachedUserDirectory {
    pub fn new(inner: Arc<dyn UserDirectory>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            slots: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// The live slot for `id`, creating a fresh one if missing or expired.
    fn slot(&self, id: i64) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = slots.get(&id) {
            if slot.created.elapsed() < self.ttl {
                return slot.clone();
            }
        }

        if slots.len() >= self.capacity {
            let ttl = self.ttl;
            slots.retain(|_, slot| slot.created.elapsed() < ttl);
            if slots.len() >= self.capacity {
                slots.clear();
            }
        }

        let slot = Arc::new(Slot {
            cell: OnceCell::new(),
            created: Instant::now(),
        });
        slots.insert(id, slot.clone());
        slot
    }

    /// Drop `slot` if it is still the one registered for `id`.
    fn evict(&self, id: i64, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(&id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(&id);
        }
    }
}

#[async_trait]
impl UserDirectory for CachedUserDirectory {
    async fn get_user(&self, id: i64) -> Result<Option<UserProfile>> {
        let slot = self.slot(id);
        let result = slot
            .cell
            .get_or_try_init(|| async { self.inner.get_user(id).await })
            .await;

        match result {
            Ok(Some(profile)) => Ok(Some(profile.clone())),
            Ok(None) => {
                self.evict(id, &slot);
                Ok(None)
            }
            Err(e) => {
                self.evict(id, &slot);
                Err(e)
            }
        }
    }
}
