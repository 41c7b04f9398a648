//! Event ingestion: validated client events applied to the session store.
//!
//! Each operation either opens a record or mutates one that already exists;
//! nothing except session-open may create a record. Successful mutations are
//! published on the [`ChangeFeed`] for the reporter.

use std::sync::Arc;

use formtrace_protocol::{parse_event, Dimension, Event, EventKind, SessionKey};
use serde::Deserialize;
use tracing::{debug, info};

use crate::digest::djb;
use crate::error::IngestError;
use crate::report::{ChangeFeed, ChangeKind};
use crate::store::{SessionRecord, SessionStore};

/// How a paste report combines with the copy/paste events already recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PastePolicy {
    /// Each report replaces the whole map, so only the latest field survives.
    #[default]
    Replace,
    /// Each report sets its own field and keeps the others.
    Accumulate,
}

impl PastePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PastePolicy::Replace => "replace",
            PastePolicy::Accumulate => "accumulate",
        }
    }
}

pub struct Ingestor {
    store: Arc<SessionStore>,
    feed: ChangeFeed,
    paste_policy: PastePolicy,
}

impl Ingestor {
    pub fn new(store: Arc<SessionStore>, feed: ChangeFeed, paste_policy: PastePolicy) -> Self {
        Self {
            store,
            feed,
            paste_policy,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn paste_policy(&self) -> PastePolicy {
        self.paste_policy
    }

    /// Parses a raw body posted to the `kind` endpoint and applies it.
    pub fn handle(&self, kind: EventKind, body: &[u8]) -> Result<SessionRecord, IngestError> {
        let event = parse_event(kind, body)?;
        self.apply(event)
    }

    pub fn apply(&self, event: Event) -> Result<SessionRecord, IngestError> {
        debug!(
            event = event.kind().as_str(),
            website_url = %event.key().website_url,
            session_id = %event.key().session_id,
            "Applying event"
        );
        match event {
            Event::Open { key } => Ok(self.session_open(&key)),
            Event::Resize { key, from, to } => self.resize_report(&key, from, to),
            Event::Paste {
                key,
                form_id,
                paste,
            } => self.paste_report(&key, form_id, paste),
            Event::Complete { key, elapsed_secs } => self.completion_report(&key, elapsed_secs),
        }
    }

    pub fn session_open(&self, key: &SessionKey) -> SessionRecord {
        let (record, created) = self
            .store
            .open_then(key, |record| self.feed.publish(ChangeKind::Opened, record));
        if created {
            info!(
                website_url = %key.website_url,
                session_id = %key.session_id,
                "Session opened"
            );
        } else {
            debug!(
                website_url = %key.website_url,
                session_id = %key.session_id,
                "Session already open"
            );
        }
        record
    }

    pub fn resize_report(
        &self,
        key: &SessionKey,
        from: Dimension,
        to: Dimension,
    ) -> Result<SessionRecord, IngestError> {
        let record = self.store.update_then(
            key,
            |record| {
                record.resize_from = from;
                record.resize_to = to;
            },
            |record| self.feed.publish(ChangeKind::Resized, record),
        )?;
        debug!(
            website_url = %key.website_url,
            session_id = %key.session_id,
            width = %record.resize_to.width,
            height = %record.resize_to.height,
            "Session resized"
        );
        Ok(record)
    }

    pub fn paste_report(
        &self,
        key: &SessionKey,
        form_id: String,
        paste: bool,
    ) -> Result<SessionRecord, IngestError> {
        let policy = self.paste_policy;
        let record = self.store.update_then(
            key,
            |record| {
                if policy == PastePolicy::Replace {
                    record.copy_paste_events.clear();
                }
                record.copy_paste_events.insert(form_id, paste);
            },
            |record| self.feed.publish(ChangeKind::PasteUpdated, record),
        )?;
        debug!(
            website_url = %key.website_url,
            session_id = %key.session_id,
            fields = record.copy_paste_events.len(),
            policy = policy.as_str(),
            "Copy/paste event recorded"
        );
        Ok(record)
    }

    pub fn completion_report(
        &self,
        key: &SessionKey,
        elapsed_secs: u64,
    ) -> Result<SessionRecord, IngestError> {
        let url_digest = djb(&key.website_url);
        let record = self.store.update_then(
            key,
            |record| record.form_completion_secs = elapsed_secs,
            |record| {
                self.feed
                    .publish(ChangeKind::Completed { url_digest }, record)
            },
        )?;
        info!(
            website_url = %key.website_url,
            session_id = %key.session_id,
            elapsed_secs,
            url_digest,
            "Form completed"
        );
        Ok(record)
    }
}
