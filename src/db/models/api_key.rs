use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::crypto;
use crate::db::schema::api_keys;
use crate::db::DbConn;
use crate::error::{EmptyResult, MapResult};

/// The API-key credential kind (§3 Api key, §4.6). Grounded on the
/// teacher's `src/db/models/device.rs` long-lived-token storage pattern,
/// but the presented secret is opaque (never a JWT) and only its hash is
/// ever stored, matching the teacher's `ApiKey` records under
/// `src/db/models/organization.rs` (`master_password_hash`-adjacent
/// hash-at-rest convention applied to a bearer token instead).
#[derive(Debug, Clone, Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = api_keys)]
#[diesel(treat_none_as_null = true)]
#[diesel(primary_key(id))]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub created_at: NaiveDateTime,
    pub name: String,
    pub key_hash: String,
    /// Space-separated scope list (§4.6 scope-check invariant).
    pub scopes: String,
    pub expires_at: Option<NaiveDateTime>,
    pub last_used_at: Option<NaiveDateTime>,
    pub revoked: bool,
}

impl ApiKey {
    /// Builds a new key record and returns it paired with the one-time
    /// plaintext secret the caller must hand back to the user now — it is
    /// never recoverable again.
    pub fn generate(user_id: String, name: String, scopes: &[String], expires_at: Option<NaiveDateTime>) -> (Self, String) {
        let secret = format!("agw_{}", crypto::generate_opaque_token());
        let key = Self {
            id: crate::util::get_uuid(),
            user_id,
            created_at: Utc::now().naive_utc(),
            name,
            key_hash: crypto::sha256_hex(secret.as_bytes()),
            scopes: scopes.join(" "),
            expires_at,
            last_used_at: None,
            revoked: false,
        };
        (key, secret)
    }

    pub fn scope_list(&self) -> Vec<&str> {
        self.scopes.split(' ').filter(|s| !s.is_empty()).collect()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope_list().contains(&scope)
    }

    pub fn is_live(&self) -> bool {
        !self.revoked && self.expires_at.is_none_or(|exp| exp > Utc::now().naive_utc())
    }
}

impl ApiKey {
    pub async fn save(&self, conn: &DbConn) -> EmptyResult {
        db_run! {conn:
            sqlite, mysql {
                diesel::replace_into(api_keys::table)
                    .values(self.clone())
                    .execute(conn)
                    .map_res("Error saving api key")
            }
            postgresql {
                diesel::insert_into(api_keys::table)
                    .values(self.clone())
                    .on_conflict(api_keys::id)
                    .do_update()
                    .set(self.clone())
                    .execute(conn)
                    .map_res("Error saving api key")
            }
        }
    }

    /// Looks up a key by the *hash* of the presented secret, never by id,
    /// so a caller must actually possess the bearer token to resolve one.
    pub async fn find_by_secret(secret: &str, conn: &DbConn) -> Option<Self> {
        let hash = crypto::sha256_hex(secret.as_bytes());
        db_run! {conn: {
            api_keys::table.filter(api_keys::key_hash.eq(hash)).first::<Self>(conn).ok()
        }}
    }

    pub async fn touch_last_used(id: &str, conn: &DbConn) -> EmptyResult {
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        db_run! {conn: {
            diesel::update(api_keys::table.filter(api_keys::id.eq(id)))
                .set(api_keys::last_used_at.eq(now))
                .execute(conn)
                .map_res("Error touching api key")
        }}
    }

    pub async fn revoke(id: &str, user_id: &str, conn: &DbConn) -> EmptyResult {
        let id = id.to_string();
        let user_id = user_id.to_string();
        db_run! {conn: {
            diesel::update(api_keys::table.filter(api_keys::id.eq(id)).filter(api_keys::user_id.eq(user_id)))
                .set(api_keys::revoked.eq(true))
                .execute(conn)
                .map_res("Error revoking api key")
        }}
    }

    pub async fn find_all_for_user(user_id: &str, conn: &DbConn) -> Vec<Self> {
        let user_id = user_id.to_string();
        db_run! {conn: {
            api_keys::table.filter(api_keys::user_id.eq(user_id)).load::<Self>(conn).unwrap_or_default()
        }}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_hashes_to_stored_value() {
        let (key, secret) = ApiKey::generate("user-1".into(), "ci".into(), &["read".to_string()], None);
        assert_eq!(key.key_hash, crypto::sha256_hex(secret.as_bytes()));
        assert!(key.has_scope("read"));
        assert!(!key.has_scope("write"));
        assert!(key.is_live());
    }

    #[test]
    fn expired_key_is_not_live() {
        let (mut key, _) = ApiKey::generate("user-1".into(), "ci".into(), &["read".to_string()], None);
        key.expires_at = Some(Utc::now().naive_utc() - chrono::Duration::seconds(1));
        assert!(!key.is_live());
    }
}
