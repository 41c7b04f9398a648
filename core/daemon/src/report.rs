//! Record-change feed and the human-readable session reporter.
//!
//! Ingestion publishes a [`RecordChange`] after every successful mutation and
//! never waits on the reporter. The reporter renders each change to a
//! line-oriented async sink (`tokio::io::stdout` in the daemon, which does its
//! blocking writes off the worker threads); a failed write is logged and
//! skipped.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::SessionRecord;

pub const DEFAULT_CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Opened,
    Resized,
    PasteUpdated,
    Completed { url_digest: usize },
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Opened => "opened",
            ChangeKind::Resized => "resized",
            ChangeKind::PasteUpdated => "paste_updated",
            ChangeKind::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordChange {
    pub kind: ChangeKind,
    pub record: SessionRecord,
}

/// Fan-out of record changes. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<RecordChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, kind: ChangeKind, record: &SessionRecord) {
        let change = RecordChange {
            kind,
            record: record.clone(),
        };
        if self.tx.send(change).is_err() {
            debug!("No change subscribers; dropping record change");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_BUFFER)
    }
}

/// One-line rendering emitted for every change.
pub fn render_line(record: &SessionRecord) -> String {
    let mut line = format!(
        "session={} website={} resize_from={}x{} resize_to={}x{}",
        record.session_id(),
        record.website_url(),
        record.resize_from.width,
        record.resize_from.height,
        record.resize_to.width,
        record.resize_to.height,
    );
    for (form_id, paste) in &record.copy_paste_events {
        line.push_str(&format!(" copy_paste[{}]={}", form_id, paste));
    }
    line.push_str(&format!(" completion_secs={}", record.form_completion_secs));
    line
}

/// Full multi-line summary written when a form is submitted.
pub fn render_summary(record: &SessionRecord) -> String {
    let mut lines = vec![
        format!(
            "User Session {} from {}",
            record.session_id(),
            record.website_url()
        ),
        format!("  WebsiteURL: {}", record.website_url()),
        format!(
            "  ResizeFrom: Width: {}, Height: {}",
            record.resize_from.width, record.resize_from.height
        ),
        format!(
            "  ResizeTo: Width: {}, Height: {}",
            record.resize_to.width, record.resize_to.height
        ),
    ];
    for (form_id, paste) in &record.copy_paste_events {
        lines.push(format!("  CopyAndPaste: FormId: {}, Paste: {}", form_id, paste));
    }
    lines.push(format!(
        "  FormCompletionTime: {}",
        record.form_completion_secs
    ));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Drains `rx` until every sender is gone, writing each change to `out`.
pub async fn run_reporter<W>(mut rx: broadcast::Receiver<RecordChange>, mut out: W)
where
    W: AsyncWrite + Unpin,
{
    loop {
        match rx.recv().await {
            Ok(change) => {
                if let Err(err) = write_change(&mut out, &change).await {
                    warn!(error = %err, "Failed to write session report");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session reporter lagged; changes were skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_change<W>(out: &mut W, change: &RecordChange) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let record = &change.record;
    info!(
        change = change.kind.as_str(),
        website_url = %record.website_url(),
        session_id = %record.session_id(),
        "Session record changed"
    );

    let mut text = render_line(record);
    text.push('\n');
    if let ChangeKind::Completed { url_digest } = change.kind {
        info!(
            website_url = %record.website_url(),
            url_digest,
            "Hashed website URL (djb)"
        );
        text.push_str(&render_summary(record));
        text.push_str(&format!("  WebsiteDigest (djb): {}\n", url_digest));
    }
    out.write_all(text.as_bytes()).await?;
    out.flush().await
}
