//! Token introspection (RFC 7662, §4.8 "Introspection"). Confidential
//! clients only; never reveals token plaintext or secret material, and
//! any failure (unknown token, wrong token type, inactive subject) folds
//! into the same `{"active": false}` response rather than a distinguishing
//! error, mirroring the credential-layer enumeration-resistance rule.

use serde::Serialize;

use super::client;
use crate::auth::decode_access_token;
use crate::cache::revocation;
use crate::db::models::{RefreshTokenMatch, Session, User};
use crate::db::DbConn;
use crate::error::Error;

#[derive(Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
}

impl IntrospectionResponse {
    fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            scope: None,
            exp: None,
            iat: None,
            client_id: None,
            token_type: None,
        }
    }
}

pub async fn introspect(
    token: &str,
    token_type_hint: Option<&str>,
    presented: &client::PresentedCredentials,
    conn: &DbConn,
) -> Result<IntrospectionResponse, Error> {
    // Authenticates the caller but never distinguishes the reason a token
    // is reported inactive from the response itself.
    client::authenticate(presented, conn).await?;

    let try_refresh_first = token_type_hint == Some("refresh_token");

    if try_refresh_first {
        if let Some(resp) = introspect_refresh(token, conn).await {
            return Ok(resp);
        }
        if let Some(resp) = introspect_access(token, conn).await {
            return Ok(resp);
        }
    } else {
        if let Some(resp) = introspect_access(token, conn).await {
            return Ok(resp);
        }
        if let Some(resp) = introspect_refresh(token, conn).await {
            return Ok(resp);
        }
    }

    Ok(IntrospectionResponse::inactive())
}

async fn introspect_access(token: &str, conn: &DbConn) -> Option<IntrospectionResponse> {
    let claims = decode_access_token(token).ok()?;
    if revocation::is_revoked(&claims.sid) {
        return None;
    }
    let user = User::find_by_id(&claims.sub, conn).await?;
    if user.disabled || claims.iat < user.invalidated_before.and_utc().timestamp() {
        return None;
    }
    Some(IntrospectionResponse {
        active: true,
        sub: Some(claims.sub),
        scope: Some(claims.scope.join(" ")),
        exp: Some(claims.exp),
        iat: Some(claims.iat),
        client_id: claims.cid,
        token_type: Some("access_token"),
    })
}

async fn introspect_refresh(token: &str, conn: &DbConn) -> Option<IntrospectionResponse> {
    let session = Session::find_by_presented_refresh_token(token, conn).await?;
    if session.revoked {
        return None;
    }
    match session.classify(token) {
        RefreshTokenMatch::Current | RefreshTokenMatch::Grace => {}
        _ => return None,
    }
    let client_id = session.device_identifier.strip_prefix("oauth:").or_else(|| session.device_identifier.strip_prefix("oauth-device:")).map(str::to_string);
    Some(IntrospectionResponse {
        active: true,
        sub: Some(session.user_id),
        scope: None,
        exp: Some(session.refresh_token_expires_at.and_utc().timestamp()),
        iat: Some(session.created_at.and_utc().timestamp()),
        client_id,
        token_type: Some("refresh_token"),
    })
}
