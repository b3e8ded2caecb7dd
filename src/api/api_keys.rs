//! `/api-keys` routes (§4.7, §6): creation, listing, and revocation of
//! opaque API keys. Grounded on the teacher's organization-API-key
//! listing/revoke routes in `src/api/core/organizations.rs` (owner-scoped
//! create/list/revoke triad), adapted to a per-user rather than
//! per-organization owner.

use chrono::NaiveDateTime;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};

use crate::api_key;
use crate::audit::AuditSink;
use crate::auth::Principal;
use crate::db::models::ApiKey;
use crate::db::DbConn;
use crate::error::{EmptyResult, JsonResult};

#[derive(Serialize)]
struct ApiKeyView {
    id: String,
    name: String,
    prefix: String,
    scopes: Vec<String>,
    expires_at: Option<NaiveDateTime>,
    last_used_at: Option<NaiveDateTime>,
    revoked: bool,
}

impl From<&ApiKey> for ApiKeyView {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id.clone(),
            name: key.name.clone(),
            prefix: key.key_hash.chars().take(8).collect(),
            scopes: key.scope_list().into_iter().map(String::from).collect(),
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            revoked: key.revoked,
        }
    }
}

#[derive(Deserialize)]
struct CreateApiKeyData {
    name: String,
    scopes: Vec<String>,
    expires_at: Option<NaiveDateTime>,
}

#[post("/api-keys", data = "<data>")]
async fn create(data: Json<CreateApiKeyData>, principal: Principal, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let data = data.into_inner();
    let created = api_key::create(&principal.user().id, data.name, data.scopes, data.expires_at, &conn, audit).await?;
    Ok(Json(serde_json::json!({
        "api_key": ApiKeyView::from(&created.key),
        "plain_key": created.plaintext,
    })))
}

#[get("/api-keys")]
async fn list(principal: Principal, conn: DbConn) -> JsonResult {
    let keys = ApiKey::find_all_for_user(&principal.user().id, &conn).await;
    Ok(Json(serde_json::json!(keys.iter().map(ApiKeyView::from).collect::<Vec<_>>())))
}

#[post("/api-keys/<key_id>/revoke")]
async fn revoke(key_id: &str, principal: Principal, conn: DbConn, audit: &State<AuditSink>) -> EmptyResult {
    api_key::revoke(key_id, &principal.user().id, &conn, audit).await
}

pub fn routes() -> Vec<Route> {
    routes![create, list, revoke]
}
