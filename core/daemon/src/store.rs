//! In-memory session table owned by the daemon.
//!
//! Records are keyed website URL → session id → record. The outer table lock
//! is only held to find or insert a record slot; each record has its own mutex,
//! so read-modify-write cycles on one session serialize while other sessions
//! proceed independently.

use chrono::{DateTime, Utc};
use formtrace_protocol::{Dimension, SessionKey};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::StoreError;

/// Aggregated telemetry for one (website, session) pair.
///
/// Identity fields are private: they are fixed when the store creates the
/// record and a mutator passed to [`SessionStore::update`] cannot change them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(rename = "websiteURL")]
    website_url: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    pub resize_from: Dimension,
    pub resize_to: Dimension,
    #[serde(rename = "copyAndPaste")]
    pub copy_paste_events: BTreeMap<String, bool>,
    #[serde(rename = "formCompletionTime")]
    pub form_completion_secs: u64,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new(key: &SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            website_url: key.website_url.clone(),
            session_id: key.session_id.clone(),
            resize_from: Dimension::default(),
            resize_to: Dimension::default(),
            copy_paste_events: BTreeMap::new(),
            form_completion_secs: 0,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn website_url(&self) -> &str {
        &self.website_url
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.website_url.clone(), self.session_id.clone())
    }
}

type RecordSlot = Arc<Mutex<SessionRecord>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    websites: RwLock<HashMap<String, HashMap<String, RecordSlot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `key`, creating an empty one if needed.
    /// Reopening never resets data collected since the first open.
    pub fn open(&self, key: &SessionKey) -> SessionRecord {
        self.open_with_status(key).0
    }

    /// Like [`open`](Self::open), also reporting whether the record was created.
    pub fn open_with_status(&self, key: &SessionKey) -> (SessionRecord, bool) {
        self.open_then(key, |_| {})
    }

    /// Opens `key`, calling `on_create` only if a new record was inserted.
    /// `on_create` runs before any update can see the record.
    pub fn open_then<C>(&self, key: &SessionKey, on_create: C) -> (SessionRecord, bool)
    where
        C: FnOnce(&SessionRecord),
    {
        if let Ok(slot) = self.slot(key) {
            let existing = lock_record(&slot).clone();
            return (existing, false);
        }

        let mut websites = self
            .websites
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let sessions = websites.entry(key.website_url.clone()).or_default();
        // Another caller may have inserted between the read and write locks.
        if let Some(slot) = sessions.get(&key.session_id) {
            let existing = lock_record(slot).clone();
            return (existing, false);
        }

        let record = SessionRecord::new(key, Utc::now());
        sessions.insert(
            key.session_id.clone(),
            Arc::new(Mutex::new(record.clone())),
        );
        on_create(&record);
        (record, true)
    }

    pub fn get(&self, key: &SessionKey) -> Result<SessionRecord, StoreError> {
        let slot = self.slot(key)?;
        let record = lock_record(&slot).clone();
        Ok(record)
    }

    /// Applies `mutator` to a copy of the stored record and swaps the copy in.
    ///
    /// The record mutex is held for the whole read-modify-write, so concurrent
    /// updates to the same session never interleave.
    pub fn update<F>(&self, key: &SessionKey, mutator: F) -> Result<SessionRecord, StoreError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        self.update_then(key, mutator, |_| {})
    }

    /// Like [`update`](Self::update), calling `on_commit` with the new value
    /// while the record mutex is still held. Commit callbacks for one session
    /// therefore run in the order the updates were applied.
    pub fn update_then<F, C>(
        &self,
        key: &SessionKey,
        mutator: F,
        on_commit: C,
    ) -> Result<SessionRecord, StoreError>
    where
        F: FnOnce(&mut SessionRecord),
        C: FnOnce(&SessionRecord),
    {
        let slot = self.slot(key)?;
        let mut current = lock_record(&slot);

        let mut next = current.clone();
        mutator(&mut next);
        next.website_url.clone_from(&current.website_url);
        next.session_id.clone_from(&current.session_id);
        next.opened_at = current.opened_at;
        next.updated_at = Utc::now();

        *current = next.clone();
        on_commit(&next);
        Ok(next)
    }

    pub fn website_count(&self) -> usize {
        self.websites
            .read()
            .map(|websites| websites.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn session_count(&self) -> usize {
        let websites = self
            .websites
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        websites.values().map(HashMap::len).sum()
    }

    fn slot(&self, key: &SessionKey) -> Result<RecordSlot, StoreError> {
        let websites = self
            .websites
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        websites
            .get(&key.website_url)
            .and_then(|sessions| sessions.get(&key.session_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                website_url: key.website_url.clone(),
                session_id: key.session_id.clone(),
            })
    }
}

// Records are only ever replaced whole, so a poisoned lock still guards a
// consistent value.
fn lock_record(slot: &RecordSlot) -> MutexGuard<'_, SessionRecord> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(website: &str, session: &str) -> SessionKey {
        SessionKey::new(website, session)
    }

    #[test]
    fn open_creates_empty_record() {
        let store = SessionStore::new();
        let record = store.open(&key("site.com", "abc"));

        assert_eq!(record.website_url(), "site.com");
        assert_eq!(record.session_id(), "abc");
        assert_eq!(record.resize_from, Dimension::default());
        assert!(record.copy_paste_events.is_empty());
        assert_eq!(record.form_completion_secs, 0);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn reopen_preserves_existing_data() {
        let store = SessionStore::new();
        let session = key("site.com", "abc");
        store.open(&session);
        store
            .update(&session, |record| record.form_completion_secs = 42)
            .expect("update");

        let (reopened, created) = store.open_with_status(&session);
        assert!(!created);
        assert_eq!(reopened.form_completion_secs, 42);
        assert_eq!(store.get(&session).expect("get"), reopened);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn get_unknown_website_or_session_is_not_found() {
        let store = SessionStore::new();
        store.open(&key("site.com", "abc"));

        assert!(matches!(
            store.get(&key("other.com", "abc")),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.get(&key("site.com", "xyz")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn update_unknown_session_does_not_create() {
        let store = SessionStore::new();
        let result = store.update(&key("site.com", "xyz"), |record| {
            record.form_completion_secs = 1;
        });

        assert!(result.is_err());
        assert_eq!(store.session_count(), 0);
        assert_eq!(store.website_count(), 0);
    }

    #[test]
    fn update_cannot_rewrite_identity() {
        let store = SessionStore::new();
        let session = key("site.com", "abc");
        let opened = store.open(&session);

        let updated = store
            .update(&session, |record| {
                record.website_url = "evil.com".to_string();
                record.session_id = "other".to_string();
                record.resize_to = Dimension::new("300", "400");
            })
            .expect("update");

        assert_eq!(updated.key(), session);
        assert_eq!(updated.opened_at(), opened.opened_at());
        assert_eq!(updated.resize_to, Dimension::new("300", "400"));
        assert!(updated.updated_at() >= opened.updated_at());
    }

    #[test]
    fn panicking_mutator_leaves_record_intact() {
        let store = Arc::new(SessionStore::new());
        let session = key("site.com", "abc");
        store.open(&session);
        store
            .update(&session, |record| record.form_completion_secs = 7)
            .expect("update");

        let worker = {
            let store = Arc::clone(&store);
            let session = session.clone();
            thread::spawn(move || {
                let _ = store.update(&session, |record| {
                    record.form_completion_secs = 99;
                    panic!("mutator failed");
                });
            })
        };
        assert!(worker.join().is_err());

        let record = store.get(&session).expect("get after poison");
        assert_eq!(record.form_completion_secs, 7);
    }

    #[test]
    fn concurrent_resizes_leave_one_complete_dimension() {
        let store = Arc::new(SessionStore::new());
        let session = key("site.com", "abc");
        store.open(&session);

        let candidates: Vec<Dimension> = (0..32)
            .map(|i| Dimension::new(format!("{}", 1000 + i), format!("{}", 2000 + i)))
            .collect();

        let handles: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|to| {
                let store = Arc::clone(&store);
                let session = session.clone();
                thread::spawn(move || {
                    store
                        .update(&session, |record| {
                            record.resize_to.width = to.width.clone();
                            thread::yield_now();
                            record.resize_to.height = to.height.clone();
                        })
                        .expect("update");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let record = store.get(&session).expect("get");
        assert!(candidates.contains(&record.resize_to));
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(SessionStore::new());
        let session = key("site.com", "abc");
        store.open(&session);

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                let session = session.clone();
                thread::spawn(move || {
                    store
                        .update(&session, |record| {
                            record.copy_paste_events.insert(format!("field-{i}"), true);
                        })
                        .expect("update");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let record = store.get(&session).expect("get");
        assert_eq!(record.copy_paste_events.len(), 64);
    }

    #[test]
    fn commit_callbacks_follow_update_order() {
        let store = Arc::new(SessionStore::new());
        let session = key("site.com", "abc");
        let mut created = Vec::new();
        store.open_then(&session, |record| created.push(record.key()));
        store.open_then(&session, |record| created.push(record.key()));
        assert_eq!(created, vec![session.clone()]);

        let committed = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                let session = session.clone();
                let committed = Arc::clone(&committed);
                thread::spawn(move || {
                    store
                        .update_then(
                            &session,
                            |record| {
                                record.copy_paste_events.insert(format!("field-{i}"), true);
                            },
                            |record| {
                                committed
                                    .lock()
                                    .unwrap()
                                    .push(record.copy_paste_events.len());
                            },
                        )
                        .expect("update");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let committed = committed.lock().unwrap().clone();
        assert_eq!(committed, (1..=32).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_opens_create_one_record() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.open_with_status(&key("site.com", "abc")).1)
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|created| *created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(store.session_count(), 1);
    }
}
