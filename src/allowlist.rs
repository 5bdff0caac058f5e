use crate::error::AllowlistError;
use crate::model::Ring;
use anyhow::Context;
use parking_lot::RwLock;
use regex::Regex;
use sqlite::{Connection, ConnectionThreadSafe};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::task::spawn_blocking;

const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

static PHONE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\d{10,14}$").unwrap());

pub fn validate_phone_number(number: &str) -> Result<(), AllowlistError> {
    if PHONE_NUMBER_RE.is_match(number) {
        Ok(())
    } else {
        Err(AllowlistError::InvalidNumber(number.to_string()))
    }
}

/// Durable phone-number -> ring mapping, backed by a local SQLite file with
/// an in-memory mirror for hot reads. A single reader/writer lock guards
/// both; writes persist to SQLite first and only then land in the mirror,
/// so a failed write never leaves the mirror ahead of durable state.
#[derive(Clone)]
pub struct AllowlistStore {
    db: Arc<ConnectionThreadSafe>,
    mirror: Arc<RwLock<HashMap<String, Ring>>>,
}

impl AllowlistStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let path_str = path.to_string_lossy().to_string();
        let mut db = Connection::open_thread_safe(&path_str)
            .with_context(|| format!("failed to open allowlist database {path_str}"))?;

        db.set_busy_timeout(
            BUSY_TIMEOUT
                .as_millis()
                .try_into()
                .expect("timeout to be in range"),
        )?;

        db.execute(
            r#"
CREATE TABLE IF NOT EXISTS allowlist (
    phone_number TEXT PRIMARY KEY,
    ring         TEXT NOT NULL
);
"#,
        )?;

        let mirror = load_mirror(&db)?;

        Ok(Self {
            db: Arc::new(db),
            mirror: Arc::new(RwLock::new(mirror)),
        })
    }

    async fn perform<T: Send + 'static>(
        &self,
        reason: &'static str,
        func: impl FnOnce(&ConnectionThreadSafe) -> anyhow::Result<T> + Send + 'static,
    ) -> anyhow::Result<T> {
        let db = self.db.clone();
        let start = Instant::now();
        let result = spawn_blocking(move || func(&db)).await?;
        let took = start.elapsed();
        if took > Duration::from_secs(1) {
            tracing::warn!("AllowlistStore::perform({reason}) took {took:?}");
        }
        result
    }

    /// Adds `number -> ring`. Fails with `AlreadyAssigned` if the number
    /// already has an entry, regardless of whether the target ring
    /// matches: reassignment is never silent.
    ///
    /// The INSERT itself (protected by the `phone_number` primary key) is
    /// what decides uniqueness, not a mirror read taken before the await
    /// point: two concurrent `add()` calls for the same number can only
    /// have one INSERT succeed, so there is nothing left for a second,
    /// independently-ordered mirror check to race against.
    pub async fn add(&self, number: &str, ring: Ring) -> Result<(), AllowlistError> {
        validate_phone_number(number)?;

        let number_owned = number.to_string();
        let ring_owned = ring.to_string();
        let result = self
            .perform("add", move |db| {
                let mut stmt =
                    db.prepare("INSERT INTO allowlist (phone_number, ring) VALUES (?, ?)")?;
                stmt.bind((1, number_owned.as_str()))?;
                stmt.bind((2, ring_owned.as_str()))?;
                stmt.next()?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                self.mirror.write().insert(number.to_string(), ring);
                Ok(())
            }
            Err(err) => {
                if let Some(s) = err.root_cause().downcast_ref::<sqlite::Error>() {
                    if s.code == Some(sqlite::ffi::SQLITE_CONSTRAINT as isize) {
                        return Err(AllowlistError::AlreadyAssigned(number.to_string()));
                    }
                }
                Err(AllowlistError::Storage(err))
            }
        }
    }

    /// Idempotent removal from both the durable store and the mirror.
    pub async fn remove(&self, number: &str) -> Result<(), AllowlistError> {
        let number_owned = number.to_string();
        self.perform("remove", move |db| {
            let mut stmt = db.prepare("DELETE FROM allowlist WHERE phone_number = ?")?;
            stmt.bind((1, number_owned.as_str()))?;
            stmt.next()?;
            Ok(())
        })
        .await
        .map_err(AllowlistError::Storage)?;

        self.mirror.write().remove(number);
        Ok(())
    }

    /// Returns the ring assigned to `number`, or `None` if it is not in
    /// the allowlist.
    pub fn ring_of(&self, number: &str) -> Option<Ring> {
        self.mirror.read().get(number).copied()
    }

    /// Snapshot copy of the full mapping.
    pub fn all(&self) -> HashMap<String, Ring> {
        self.mirror.read().clone()
    }

    /// Snapshot of the numbers assigned to `ring`.
    pub fn numbers_in(&self, ring: Ring) -> Vec<String> {
        self.mirror
            .read()
            .iter()
            .filter(|(_, r)| **r == ring)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

fn load_mirror(db: &ConnectionThreadSafe) -> anyhow::Result<HashMap<String, Ring>> {
    let mut mirror = HashMap::new();
    let mut stmt = db.prepare("SELECT phone_number, ring FROM allowlist")?;
    while let Ok(sqlite::State::Row) = stmt.next() {
        let number: String = stmt.read(0)?;
        let ring_str: String = stmt.read(1)?;
        if let Some(ring) = Ring::from_str_loose(&ring_str) {
            mirror.insert(number, ring);
        }
    }
    Ok(mirror)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (AllowlistStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = AllowlistStore::open(&dir.path().join("allowlist.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn add_then_lookup() {
        let (store, _dir) = temp_store();
        store.add("+15551112222", Ring::Prod).await.unwrap();
        assert_eq!(store.ring_of("+15551112222"), Some(Ring::Prod));
        assert_eq!(store.ring_of("+19998887777"), None);
    }

    #[tokio::test]
    async fn reassignment_is_rejected() {
        let (store, _dir) = temp_store();
        store.add("+15551112222", Ring::Prod).await.unwrap();
        let err = store.add("+15551112222", Ring::Ppe).await.unwrap_err();
        assert!(matches!(err, AllowlistError::AlreadyAssigned(_)));
        // Same-ring re-add is equally rejected: immutability is strict.
        let err = store.add("+15551112222", Ring::Prod).await.unwrap_err();
        assert!(matches!(err, AllowlistError::AlreadyAssigned(_)));
    }

    #[tokio::test]
    async fn invalid_numbers_are_rejected() {
        let (store, _dir) = temp_store();
        assert!(matches!(
            store.add("not-a-number", Ring::Prod).await,
            Err(AllowlistError::InvalidNumber(_))
        ));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _dir) = temp_store();
        store.add("+15551112222", Ring::Prod).await.unwrap();
        store.remove("+15551112222").await.unwrap();
        assert_eq!(store.ring_of("+15551112222"), None);
        // Removing again does not error.
        store.remove("+15551112222").await.unwrap();
    }

    #[tokio::test]
    async fn numbers_in_filters_by_ring() {
        let (store, _dir) = temp_store();
        store.add("+15551112222", Ring::Prod).await.unwrap();
        store.add("+15553334444", Ring::Ppe).await.unwrap();
        let prod = store.numbers_in(Ring::Prod);
        assert_eq!(prod, vec!["+15551112222".to_string()]);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowlist.db");
        {
            let store = AllowlistStore::open(&path).unwrap();
            store.add("+15551112222", Ring::Prod).await.unwrap();
        }
        let store = AllowlistStore::open(&path).unwrap();
        assert_eq!(store.ring_of("+15551112222"), Some(Ring::Prod));
    }
}
