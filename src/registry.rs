use crate::lifecycle::ShutdownSubscription;
use crate::model::{Ring, Subscriber};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

const PRUNE_INTERVAL: Duration = Duration::from_secs(10);
const SUBSCRIBER_TTL: ChronoDuration = ChronoDuration::seconds(60);

/// In-memory subscriber set, keyed by id, with heartbeat-driven TTL.
/// Reads and writes are serialized per-shard by the underlying `DashMap`;
/// the registry never hands out a mutable reference across an await
/// point, only owned snapshots.
#[derive(Clone)]
pub struct SubscriberRegistry {
    subscribers: Arc<DashMap<String, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// Insert or refresh a subscriber. `registered_at` is preserved across
    /// re-registrations of the same id; `last_seen` is always bumped to
    /// now.
    pub fn upsert(
        &self,
        id: String,
        webhook_base_url: String,
        ring: Ring,
        kinds: HashSet<crate::model::EventKind>,
    ) {
        let now = Utc::now();
        self.subscribers
            .entry(id.clone())
            .and_modify(|existing| {
                existing.webhook_base_url = webhook_base_url.clone();
                existing.ring = ring;
                existing.kinds = kinds.clone();
                existing.last_seen = now;
            })
            .or_insert_with(|| Subscriber {
                id,
                webhook_base_url,
                ring,
                kinds,
                registered_at: now,
                last_seen: now,
            });
    }

    pub fn get(&self, id: &str) -> Option<Subscriber> {
        self.subscribers.get(id).map(|e| e.clone())
    }

    /// Snapshot of every currently-registered subscriber. Fan-out takes
    /// this snapshot once per inbound event and is not affected by
    /// concurrent registrations or prunes for the remainder of that event.
    pub fn list(&self) -> Vec<Subscriber> {
        self.subscribers.iter().map(|e| e.value().clone()).collect()
    }

    fn prune_once(&self) -> usize {
        let cutoff = Utc::now() - SUBSCRIBER_TTL;
        let stale: Vec<String> = self
            .subscribers
            .iter()
            .filter(|e| e.value().last_seen < cutoff)
            .map(|e| e.key().clone())
            .collect();
        for id in &stale {
            self.subscribers.remove(id);
        }
        stale.len()
    }

    /// Spawn the cooperatively cancellable pruner. Removes any subscriber
    /// whose `last_seen` is older than 60s, every 10s, until `shutdown`
    /// fires.
    pub fn spawn_pruner(&self, mut shutdown: ShutdownSubscription) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = registry.prune_once();
                        if pruned > 0 {
                            tracing::info!("pruned {pruned} stale subscriber(s)");
                        }
                    }
                    _ = shutdown.shutting_down() => {
                        tracing::debug!("subscriber pruner stopping");
                        return;
                    }
                }
            }
        })
    }
}

pub fn last_seen_within_ttl(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_seen <= SUBSCRIBER_TTL
}
