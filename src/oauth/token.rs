//! Token endpoint (§4.8 `/oauth/token`): dispatches on `grant_type` to one
//! of the four grants. Grounded on the teacher's session-rotation pattern
//! (`db::models::Session::rotate`/`classify`) reused here for the
//! authorization-code and refresh grants, since both ultimately mint a
//! session-bound refresh token the same way an interactive sign-in does.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::{client, mint_access_and_id_token, take_code, take_issued_for_replay, TokenSet};
use crate::audit::{AuditEntry, AuditSink};
use crate::auth::AccessTokenClaims;
use crate::cache::{revocation, TtlCache};
use crate::crypto;
use crate::db::models::{RefreshTokenMatch, Session, User};
use crate::db::DbConn;
use crate::error::Error;
use crate::CONFIG;

pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

fn oauth_err(code: &str, desc: &str) -> Error {
    Error::OAuthError(code.into(), desc.into())
}

pub async fn token(req: TokenRequest, request: &rocket::Request<'_>, conn: &DbConn, audit: &AuditSink) -> Result<TokenSet, Error> {
    let presented = client::from_request_and_form(request, req.client_id.as_deref(), req.client_secret.as_deref())
        .ok_or_else(|| oauth_err("invalid_client", "No client credentials presented"))?;

    match req.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(req, presented, conn, audit).await,
        "refresh_token" => refresh_token_grant(req, presented, conn, audit).await,
        "client_credentials" => client_credentials_grant(presented, req.scope, conn, audit).await,
        "urn:ietf:params:oauth:grant-type:device_code" => {
            super::device_flow::poll(req.code.unwrap_or_default(), presented, conn, audit).await
        }
        other => Err(oauth_err("unsupported_grant_type", &format!("Unsupported grant_type '{other}'"))),
    }
}

async fn authorization_code_grant(
    req: TokenRequest,
    presented: client::PresentedCredentials,
    conn: &DbConn,
    audit: &AuditSink,
) -> Result<TokenSet, Error> {
    let client = client::resolve(&presented, conn).await?;
    let code = req.code.ok_or_else(|| oauth_err("invalid_request", "Missing code"))?;
    let redirect_uri = req.redirect_uri.ok_or_else(|| oauth_err("invalid_request", "Missing redirect_uri"))?;

    let Some(grant) = take_code(&code) else {
        // Replay of an already-consumed code: revoke whatever was minted
        // from it the first time (§4.8 second-attempt invariant).
        if let Some(session_ids) = take_issued_for_replay(&code) {
            for id in &session_ids {
                Session::revoke(id, conn).await.ok();
                revocation::revoke(id);
            }
            audit.record(AuditEntry::new("oauth.code_replayed").detail(serde_json::json!({"client_id": client.id})));
        }
        return Err(oauth_err("invalid_grant", "Authorization code is invalid or already used"));
    };

    if grant.client_id != client.id || grant.redirect_uri != redirect_uri {
        return Err(oauth_err("invalid_grant", "Code does not match client or redirect_uri"));
    }
    if !super::verify_pkce(grant.code_challenge_method.as_deref(), grant.code_challenge.as_deref(), req.code_verifier.as_deref()) {
        return Err(oauth_err("invalid_grant", "PKCE verification failed"));
    }

    let Some(user) = User::find_by_id(&grant.user_id, conn).await else {
        return Err(oauth_err("invalid_grant", "Subject no longer exists"));
    };
    if user.disabled {
        return Err(oauth_err("invalid_grant", "Subject is disabled"));
    }

    let refresh_token = crypto::generate_opaque_token();
    let mut session = Session::new(user.id.clone(), format!("oauth:{}", client.id), Some(client.name.clone()), &refresh_token);
    session.save(conn).await?;

    let (access_token, id_token) = mint_access_and_id_token(&user, &session.id, &client, &grant.scopes, vec!["pwd".into()], grant.nonce.clone());
    super::mark_issued(&code, vec![session.id.clone()]);

    audit.record(AuditEntry::new("oauth.token_issued").principal(user.id.clone()).detail(serde_json::json!({"client_id": client.id, "grant": "authorization_code"})));

    Ok(TokenSet {
        access_token,
        token_type: "Bearer",
        expires_in: CONFIG.access_token_ttl_secs(),
        refresh_token: Some(refresh_token),
        id_token,
        scope: grant.scopes.join(" "),
    })
}

/// Caches the token set minted on a rotation, keyed by the now-superseded
/// refresh token's hash, so a client retrying a dropped response within
/// the grace window gets back the exact same tokens instead of a second,
/// divergent rotation (§5 "the loser sees the old hash invalidated").
static REISSUE_CACHE: LazyLock<TtlCache<String, CachedReissue>> =
    LazyLock::new(|| TtlCache::with_ttl(Duration::from_secs(CONFIG.refresh_grace_secs().max(0) as u64)));

#[derive(Clone, Serialize)]
struct CachedReissue {
    access_token: String,
    refresh_token: String,
    id_token: Option<String>,
    scope: String,
}

async fn refresh_token_grant(
    req: TokenRequest,
    presented: client::PresentedCredentials,
    conn: &DbConn,
    audit: &AuditSink,
) -> Result<TokenSet, Error> {
    let client = client::resolve(&presented, conn).await?;
    let refresh_token = req.refresh_token.ok_or_else(|| oauth_err("invalid_request", "Missing refresh_token"))?;

    let Some(mut session) = Session::find_by_presented_refresh_token(&refresh_token, conn).await else {
        return Err(oauth_err("invalid_grant", "Unknown refresh token"));
    };
    if session.device_identifier != format!("oauth:{}", client.id) {
        return Err(oauth_err("invalid_grant", "Refresh token was not issued to this client"));
    }
    if session.revoked {
        return Err(oauth_err("invalid_grant", "Session has been revoked"));
    }

    let presented_hash = crypto::sha256_hex(refresh_token.as_bytes());
    match session.classify(&refresh_token) {
        RefreshTokenMatch::Grace => {
            if let Some(cached) = REISSUE_CACHE.get(&presented_hash) {
                return Ok(TokenSet {
                    access_token: cached.access_token,
                    token_type: "Bearer",
                    expires_in: CONFIG.access_token_ttl_secs(),
                    refresh_token: Some(cached.refresh_token),
                    id_token: cached.id_token,
                    scope: cached.scope,
                });
            }
            // No cached response (cache evicted or server restarted): fall
            // through and mint fresh tokens rather than hard-failing a
            // client that is, as far as we can tell, legitimately retrying.
        }
        RefreshTokenMatch::Replay | RefreshTokenMatch::Expired => {
            Session::revoke(&session.id, conn).await.ok();
            revocation::revoke(&session.id);
            audit.record(AuditEntry::new("oauth.refresh_replay_detected").principal(session.user_id.clone()));
            return Err(oauth_err("invalid_grant", "Refresh token reuse detected"));
        }
        RefreshTokenMatch::Unknown => return Err(oauth_err("invalid_grant", "Unknown refresh token")),
        RefreshTokenMatch::Current => {}
    }

    let Some(user) = User::find_by_id(&session.user_id, conn).await else {
        return Err(oauth_err("invalid_grant", "Subject no longer exists"));
    };
    if user.disabled {
        return Err(oauth_err("invalid_grant", "Subject is disabled"));
    }

    let scope: Vec<String> = req.scope.as_deref().map(|s| s.split(' ').map(str::to_string).collect()).unwrap_or_else(|| client.scopes.split(' ').map(str::to_string).collect());

    let new_refresh_token = crypto::generate_opaque_token();
    let old_current_hash = session.refresh_token_hash.clone();
    session.rotate(&new_refresh_token);
    session.save(conn).await?;

    let (access_token, id_token) = mint_access_and_id_token(&user, &session.id, &client, &scope, vec!["pwd".into()], None);

    REISSUE_CACHE.insert(
        old_current_hash,
        CachedReissue {
            access_token: access_token.clone(),
            refresh_token: new_refresh_token.clone(),
            id_token: id_token.clone(),
            scope: scope.join(" "),
        },
    );

    audit.record(AuditEntry::new("oauth.token_refreshed").principal(user.id.clone()).detail(serde_json::json!({"client_id": client.id})));

    Ok(TokenSet {
        access_token,
        token_type: "Bearer",
        expires_in: CONFIG.access_token_ttl_secs(),
        refresh_token: Some(new_refresh_token),
        id_token,
        scope: scope.join(" "),
    })
}

async fn client_credentials_grant(
    presented: client::PresentedCredentials,
    scope: Option<String>,
    conn: &DbConn,
    audit: &AuditSink,
) -> Result<TokenSet, Error> {
    let client = client::authenticate(&presented, conn).await?;
    if !client.grant_type_allowed("client_credentials") {
        return Err(oauth_err("unauthorized_client", "Client is not allowed the client_credentials grant"));
    }

    let requested: Vec<String> = scope.as_deref().map(|s| s.split(' ').map(str::to_string).collect()).unwrap_or_else(|| client.scopes.split(' ').map(str::to_string).collect());
    for s in &requested {
        if !client.scope_allowed(s) {
            return Err(oauth_err("invalid_scope", &format!("Scope '{s}' is not allowed for this client")));
        }
    }

    let now = Utc::now().timestamp();
    let claims = AccessTokenClaims {
        sub: client.id.clone(),
        iss: crate::auth::JWT_ACCESS_ISSUER.clone(),
        aud: client.id.clone(),
        iat: now,
        nbf: now,
        exp: now + CONFIG.access_token_ttl_secs(),
        sid: format!("client:{}", client.id),
        cid: Some(client.id.clone()),
        scope: requested.clone(),
        username: None,
        roles: vec![],
        amr: vec!["client_credentials".into()],
    };
    let access_token = crate::auth::encode_access_token(&claims);

    audit.record(AuditEntry::new("oauth.token_issued").detail(serde_json::json!({"client_id": client.id, "grant": "client_credentials"})));

    Ok(TokenSet {
        access_token,
        token_type: "Bearer",
        expires_in: CONFIG.access_token_ttl_secs(),
        refresh_token: None,
        id_token: None,
        scope: requested.join(" "),
    })
}
