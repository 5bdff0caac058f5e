use crate::lifecycle::ShutdownSubscription;
use crate::model::EventKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// How long a `(event_kind, message_id)` pair is remembered. Must exceed
/// the gateway's observed webhook retry window.
pub const DEDUP_TTL: Duration = Duration::from_secs(10 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn dedup_key(kind: EventKind, message_id: &str) -> String {
    format!("{}-{}", kind.short(), message_id)
}

/// Short-lived set of seen `(event_kind, message_id)` keys. Used to
/// suppress the gateway's occasional redelivery of the same event within
/// a short window, without conflating the legitimate reuse of the same
/// `message_id` across distinct kinds (sent -> delivered -> failed).
#[derive(Clone)]
pub struct DedupCache {
    seen: Arc<RwLock<HashMap<String, Instant>>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Atomically checks and marks `key` as seen. Returns `true` if the
    /// key was already present (a duplicate), `false` if this is the
    /// first sighting.
    pub fn seen_and_mark(&self, key: &str) -> bool {
        let mut seen = self.seen.write();
        if seen.contains_key(key) {
            true
        } else {
            seen.insert(key.to_string(), Instant::now());
            false
        }
    }

    pub fn sweep(&self, ttl: Duration) {
        let now = Instant::now();
        self.seen.write().retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
    }

    pub fn spawn_sweeper(&self, ttl: Duration, mut shutdown: ShutdownSubscription) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep(ttl);
                    }
                    _ = shutdown.shutting_down() => {
                        tracing::debug!("dedup sweeper stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let cache = DedupCache::new();
        assert!(!cache.seen_and_mark("delivered-m3"));
        assert!(cache.seen_and_mark("delivered-m3"));
    }

    #[test]
    fn distinct_kinds_do_not_collide() {
        let cache = DedupCache::new();
        let sent = dedup_key(EventKind::Sent, "m3");
        let delivered = dedup_key(EventKind::Delivered, "m3");
        assert_ne!(sent, delivered);
        assert!(!cache.seen_and_mark(&sent));
        assert!(!cache.seen_and_mark(&delivered));
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        let cache = DedupCache::new();
        cache.seen_and_mark("k1");
        std::thread::sleep(Duration::from_millis(20));
        cache.sweep(Duration::from_millis(5));
        assert!(!cache.seen_and_mark("k1"));
    }
}
