use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::crypto;
use crate::db::schema::sessions;
use crate::db::DbConn;
use crate::error::{EmptyResult, MapResult};
use crate::CONFIG;

/// The Session ledger (§3 Session): one row per refresh-token lineage.
/// Grounded on the teacher's `src/db/models/device.rs`, which is the
/// closest existing analog (one row per device holding a long-lived
/// refresh token) — generalized here to carry the previous-generation
/// hash/expiry pair needed for rotation-with-grace-period replay detection
/// (Open Question resolution: always rotate on refresh, detect replay via
/// this grace state rather than by skipping rotation).
#[derive(Debug, Clone, Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sessions)]
#[diesel(treat_none_as_null = true)]
#[diesel(primary_key(id))]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub device_name: Option<String>,
    pub device_identifier: String,
    pub refresh_token_hash: String,
    pub refresh_token_expires_at: NaiveDateTime,
    pub previous_refresh_token_hash: Option<String>,
    pub previous_refresh_token_expires_at: Option<NaiveDateTime>,
    pub revoked: bool,
}

impl Session {
    pub fn new(user_id: String, device_identifier: String, device_name: Option<String>, refresh_token: &str) -> Self {
        let now = Utc::now().naive_utc();
        Self {
            id: crate::util::get_uuid(),
            user_id,
            created_at: now,
            updated_at: now,
            device_name,
            device_identifier,
            refresh_token_hash: crypto::sha256_hex(refresh_token.as_bytes()),
            refresh_token_expires_at: now + chrono::Duration::seconds(CONFIG.refresh_token_ttl_secs()),
            previous_refresh_token_hash: None,
            previous_refresh_token_expires_at: None,
            revoked: false,
        }
    }

    /// Rotates the refresh token: the current hash becomes the "previous"
    /// grace-state entry (still acceptable until `refresh_grace_secs`
    /// elapses, to absorb a client retrying a dropped response) and a new
    /// hash takes its place. A presented token matching `previous_*` after
    /// its grace window, or matching it a second time, indicates replay.
    pub fn rotate(&mut self, new_refresh_token: &str) {
        let now = Utc::now().naive_utc();
        self.previous_refresh_token_hash = Some(self.refresh_token_hash.clone());
        self.previous_refresh_token_expires_at = Some(now + chrono::Duration::seconds(CONFIG.refresh_grace_secs()));
        self.refresh_token_hash = crypto::sha256_hex(new_refresh_token.as_bytes());
        self.refresh_token_expires_at = now + chrono::Duration::seconds(CONFIG.refresh_token_ttl_secs());
        self.updated_at = now;
    }

    /// Classifies a presented refresh token against this session's current
    /// and grace-state hashes.
    pub fn classify(&self, presented: &str) -> RefreshTokenMatch {
        let hash = crypto::sha256_hex(presented.as_bytes());
        let now = Utc::now().naive_utc();

        if crypto::ct_eq(&hash, &self.refresh_token_hash) {
            if self.refresh_token_expires_at < now {
                return RefreshTokenMatch::Expired;
            }
            return RefreshTokenMatch::Current;
        }
        if let Some(prev) = &self.previous_refresh_token_hash {
            if crypto::ct_eq(&hash, prev) {
                let still_in_grace = self.previous_refresh_token_expires_at.is_some_and(|exp| exp >= now);
                return if still_in_grace { RefreshTokenMatch::Grace } else { RefreshTokenMatch::Replay };
            }
        }
        RefreshTokenMatch::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenMatch {
    Current,
    Grace,
    Expired,
    Replay,
    Unknown,
}

impl Session {
    pub async fn save(&mut self, conn: &DbConn) -> EmptyResult {
        self.updated_at = Utc::now().naive_utc();
        db_run! {conn:
            sqlite, mysql {
                diesel::replace_into(sessions::table)
                    .values(self.clone())
                    .execute(conn)
                    .map_res("Error saving session")
            }
            postgresql {
                diesel::insert_into(sessions::table)
                    .values(self.clone())
                    .on_conflict(sessions::id)
                    .do_update()
                    .set(self.clone())
                    .execute(conn)
                    .map_res("Error saving session")
            }
        }
    }

    pub async fn find_by_id(id: &str, conn: &DbConn) -> Option<Self> {
        let id = id.to_string();
        db_run! {conn: {
            sessions::table.filter(sessions::id.eq(id)).first::<Self>(conn).ok()
        }}
    }

    /// Looks up the session owning a presented refresh token, matching
    /// either its current or grace-state hash — the lookup a caller must do
    /// before `classify` can judge current/grace/replay/expired.
    pub async fn find_by_presented_refresh_token(token: &str, conn: &DbConn) -> Option<Self> {
        let hash = crypto::sha256_hex(token.as_bytes());
        db_run! {conn: {
            sessions::table
                .filter(sessions::refresh_token_hash.eq(hash.clone()).or(sessions::previous_refresh_token_hash.eq(hash)))
                .first::<Self>(conn)
                .ok()
        }}
    }

    pub async fn find_all_for_user(user_id: &str, conn: &DbConn) -> Vec<Self> {
        let user_id = user_id.to_string();
        db_run! {conn: {
            sessions::table.filter(sessions::user_id.eq(user_id)).load::<Self>(conn).unwrap_or_default()
        }}
    }

    pub async fn revoke(id: &str, conn: &DbConn) -> EmptyResult {
        let id = id.to_string();
        db_run! {conn: {
            diesel::update(sessions::table.filter(sessions::id.eq(id)))
                .set(sessions::revoked.eq(true))
                .execute(conn)
                .map_res("Error revoking session")
        }}
    }

    pub async fn revoke_all_for_user(user_id: &str, conn: &DbConn) -> EmptyResult {
        let user_id = user_id.to_string();
        db_run! {conn: {
            diesel::update(sessions::table.filter(sessions::user_id.eq(user_id)))
                .set(sessions::revoked.eq(true))
                .execute(conn)
                .map_res("Error revoking sessions")
        }}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_plaintext_refresh_token_is_never_persisted_on_the_row() {
        let secret = "super-secret-refresh-token-value";
        let mut session = Session::new("user-1".into(), "device-1".into(), None, secret);
        session.rotate("another-super-secret-value");
        let debug_repr = format!("{session:?}");
        assert!(!debug_repr.contains(secret));
        assert!(!debug_repr.contains("another-super-secret-value"));
    }

    #[test]
    fn rotation_moves_current_to_grace() {
        let mut session = Session::new("user-1".into(), "device-1".into(), None, "tok-a");
        assert_eq!(session.classify("tok-a"), RefreshTokenMatch::Current);
        session.rotate("tok-b");
        assert_eq!(session.classify("tok-b"), RefreshTokenMatch::Current);
        assert_eq!(session.classify("tok-a"), RefreshTokenMatch::Grace);
        assert_eq!(session.classify("tok-unknown"), RefreshTokenMatch::Unknown);
    }
}
