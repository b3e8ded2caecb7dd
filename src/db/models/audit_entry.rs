use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::audit::AuditEntry;
use crate::db::schema::audit_logs;
use crate::db::DbConn;
use crate::error::{EmptyResult, MapResult};

/// Durable half of the audit sink (§4.9): one row per flushed
/// `AuditEntry`. Grounded on the teacher's `src/db/models/event.rs`
/// append-only event-log table, generalized from a fixed enum of vault
/// event kinds to a free-text event name plus a JSON detail blob so new
/// event kinds never require a migration.
#[derive(Debug, Clone, Identifiable, Queryable, Insertable)]
#[diesel(table_name = audit_logs)]
#[diesel(treat_none_as_null = true)]
#[diesel(primary_key(id))]
pub struct AuditLogRow {
    pub id: String,
    pub principal_id: Option<String>,
    pub event: String,
    pub ip: Option<String>,
    pub detail: String,
    pub occurred_at: NaiveDateTime,
}

impl From<&AuditEntry> for AuditLogRow {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            id: entry.id.clone(),
            principal_id: entry.principal_id.clone(),
            event: entry.event.clone(),
            ip: entry.ip.clone(),
            detail: entry.detail.to_string(),
            occurred_at: entry.occurred_at,
        }
    }
}

impl AuditLogRow {
    pub async fn insert(entry: &AuditEntry, conn: &DbConn) -> EmptyResult {
        let row = AuditLogRow::from(entry);
        db_run! {conn: {
            diesel::insert_into(audit_logs::table)
                .values(row)
                .execute(conn)
                .map_res("Error persisting audit entry")
        }}
    }

    pub async fn find_for_principal(principal_id: &str, limit: i64, conn: &DbConn) -> Vec<Self> {
        let principal_id = principal_id.to_string();
        db_run! {conn: {
            audit_logs::table
                .filter(audit_logs::principal_id.eq(principal_id))
                .order(audit_logs::occurred_at.desc())
                .limit(limit)
                .load::<Self>(conn)
                .unwrap_or_default()
        }}
    }
}
