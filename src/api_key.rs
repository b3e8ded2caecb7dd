//! API-key engine (§4.7): the orchestration wrapped around
//! `db::models::ApiKey` — creation, revocation, and the scope-check
//! authorization gate route handlers call before honoring a key-bound
//! request. No direct teacher analogue (vaultwarden's organization API
//! keys are an OAuth client-credentials pair, not an opaque bearer
//! secret); grounded on the crypto module's opaque-token convention and
//! the principal store's hash-at-rest pattern (`user.rs`'s
//! `set_password`/`check_valid_password`) applied to a bearer secret
//! instead of a login password.

use chrono::NaiveDateTime;

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::Principal;
use crate::db::models::ApiKey;
use crate::db::DbConn;
use crate::error::Error;

pub struct Created {
    pub key: ApiKey,
    pub plaintext: String,
}

pub async fn create(
    user_id: &str,
    name: String,
    scopes: Vec<String>,
    expires_at: Option<NaiveDateTime>,
    conn: &DbConn,
    audit: &AuditSink,
) -> Result<Created, Error> {
    let (mut key, plaintext) = ApiKey::generate(user_id.to_string(), name, &scopes, expires_at);
    key.save(conn).await?;
    audit.record(AuditEntry::new("api_key.created").principal(user_id.to_string()));
    Ok(Created {
        key,
        plaintext,
    })
}

pub async fn revoke(key_id: &str, user_id: &str, conn: &DbConn, audit: &AuditSink) -> crate::error::EmptyResult {
    ApiKey::revoke(key_id, user_id, conn).await?;
    audit.record(AuditEntry::new("api_key.revoked").principal(user_id.to_string()).detail(serde_json::json!({"key_id": key_id})));
    Ok(())
}

/// The authorization gate mentioned in §4.7: a handler asks for the
/// scope its operation needs, and the request either carries it
/// (explicit or via the `all` wildcard) or is denied. A session-bound
/// `Principal::User` is treated as unscoped (sessions authenticate the
/// interactive user, not a delegated capability), matching the spec's
/// framing that scopes are specifically an API-key concept.
pub fn require_scope(principal: &Principal, scope: &str) -> crate::error::EmptyResult {
    match principal {
        Principal::User {
            ..
        } => Ok(()),
        Principal::ApiKey {
            ..
        } => {
            if principal.has_scope(scope) {
                Ok(())
            } else {
                err!(Forbidden, format!("API key lacks required scope '{scope}'"))
            }
        }
    }
}
