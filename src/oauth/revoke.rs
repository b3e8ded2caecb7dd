//! Token revocation (RFC 7009, §4.8 "Revocation"): always succeeds,
//! idempotent. `token_type_hint` is only an optimization — try the hinted
//! lookup first, then fall back to the other kind.

use super::client;
use crate::auth::decode_access_token;
use crate::cache::revocation;
use crate::db::models::Session;
use crate::db::DbConn;
use crate::error::Error;

async fn try_revoke_access(token: &str) -> bool {
    if let Ok(claims) = decode_access_token(token) {
        revocation::revoke(&claims.sid);
        true
    } else {
        false
    }
}

async fn try_revoke_refresh(token: &str, conn: &DbConn) -> bool {
    match Session::find_by_presented_refresh_token(token, conn).await {
        Some(session) => {
            Session::revoke(&session.id, conn).await.ok();
            revocation::revoke(&session.id);
            true
        }
        None => false,
    }
}

pub async fn revoke(token: &str, token_type_hint: Option<&str>, presented: &client::PresentedCredentials, conn: &DbConn) -> Result<(), Error> {
    client::authenticate(presented, conn).await?;

    if token_type_hint == Some("refresh_token") {
        if !try_revoke_refresh(token, conn).await {
            try_revoke_access(token).await;
        }
    } else if !try_revoke_access(token).await {
        try_revoke_refresh(token, conn).await;
    }
    Ok(())
}
