//! OAuth 2.1 / OIDC authorization server (§4.8). One file per grant/
//! endpoint family, aggregated here, grounded on the teacher's per-concern
//! two-factor layout (`src/api/core/two_factor/{authenticator,duo,
//! email}.rs`, each owning one provider, re-exported by a `mod.rs`) applied
//! to OAuth endpoint families instead of 2FA providers.

pub mod authorize;
pub mod client;
pub mod device_flow;
pub mod discovery;
pub mod introspect;
pub mod revoke;
pub mod token;
pub mod userinfo;

use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AccessTokenClaims;
use crate::cache::TakeStore;
use crate::crypto;
use crate::db::models::{OauthClient, User};

/// A minted-but-unexchanged authorization grant (§3 Authorization code).
/// Single-use, consumed atomically by `/token` via `TakeStore::take`.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

static AUTH_CODES: LazyLock<TakeStore<String, AuthorizationCode>> = LazyLock::new(TakeStore::new);

/// Tracks tokens minted from a given authorization code so a replayed
/// exchange can revoke them (§4.8 second-attempt invariant), keyed by the
/// code itself — consumed codes are moved here instead of simply vanishing.
static ISSUED_FROM_CODE: LazyLock<dashmap::DashMap<String, Vec<String>>> = LazyLock::new(dashmap::DashMap::new);

pub fn generate_code() -> String {
    crypto::generate_opaque_token()
}

pub fn store_code(code: String, grant: AuthorizationCode) {
    AUTH_CODES.put(code, grant, Duration::from_secs(crate::CONFIG.oauth_code_ttl_secs().max(0) as u64));
}

/// Consumes an authorization code exactly once. On a second attempt (the
/// code is gone, `None`), the caller is expected to have recorded the
/// sessions it minted under `mark_issued` so it can revoke them here.
pub fn take_code(code: &str) -> Option<AuthorizationCode> {
    AUTH_CODES.take(&code.to_string())
}

pub fn mark_issued(code: &str, session_ids: Vec<String>) {
    ISSUED_FROM_CODE.insert(code.to_string(), session_ids);
}

/// §4.8: "a second attempt to consume the same code must revoke the tokens
/// already minted from it". Returns the session ids to revoke, if any.
pub fn take_issued_for_replay(code: &str) -> Option<Vec<String>> {
    ISSUED_FROM_CODE.remove(code).map(|(_, v)| v)
}

/// RFC 7636 PKCE verification. `S256` is the only method public clients
/// should use; `plain` is accepted for completeness since the spec allows
/// it, but §4.8 calls out S256 as preferred.
pub fn verify_pkce(method: Option<&str>, challenge: Option<&str>, verifier: Option<&str>) -> bool {
    match (challenge, verifier) {
        (None, None) => true,
        (Some(challenge), Some(verifier)) => match method.unwrap_or("plain") {
            "S256" => {
                use data_encoding::BASE64URL_NOPAD;
                use ring::digest;
                let digest = digest::digest(&digest::SHA256, verifier.as_bytes());
                crypto::ct_eq(challenge, BASE64URL_NOPAD.encode(digest.as_ref()))
            }
            "plain" => crypto::ct_eq(challenge, verifier),
            _ => false,
        },
        _ => false,
    }
}

/// OIDC ID token claims (§4.8, minted only when the granted scope set
/// includes `openid`). Kept separate from `AccessTokenClaims` since its
/// audience is the client, not a resource server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    pub nonce: Option<String>,
}

impl IdTokenClaims {
    pub fn new(user: &User, client_id: &str, nonce: Option<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user.id.clone(),
            iss: crate::auth::JWT_ACCESS_ISSUER.replace("|access", "|oidc"),
            aud: client_id.to_string(),
            iat: now,
            exp: now + crate::CONFIG.access_token_ttl_secs(),
            email: user.email.clone(),
            preferred_username: user.username.clone(),
            nonce,
        }
    }
}

/// A fully-minted token set (§6 `/oauth/token` success shape).
#[derive(Debug, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Builds the access token (and, for the `openid` scope, the ID token) for
/// a completed grant. Refresh token minting is the caller's job since only
/// some grants (authorization-code, refresh) issue one.
pub fn mint_access_and_id_token(
    user: &User,
    session_id: &str,
    client: &OauthClient,
    scope: &[String],
    amr: Vec<String>,
    nonce: Option<String>,
) -> (String, Option<String>) {
    let claims = AccessTokenClaims::new(user, session_id, Some(client.id.clone()), scope.to_vec(), amr);
    let access_token = crate::auth::encode_access_token(&claims);

    let id_token = if scope.iter().any(|s| s == "openid") {
        let id_claims = IdTokenClaims::new(user, &client.id, nonce);
        Some(crate::auth::encode_id_token(&id_claims))
    } else {
        None
    };

    (access_token, id_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_no_challenge_no_verifier_passes() {
        assert!(verify_pkce(None, None, None));
    }

    #[test]
    fn pkce_challenge_without_verifier_fails() {
        assert!(!verify_pkce(Some("S256"), Some("abc"), None));
    }

    #[test]
    fn pkce_s256_matches_derived_challenge() {
        use data_encoding::BASE64URL_NOPAD;
        use ring::digest;

        let verifier = "a-valid-code-verifier-at-least-43-characters-long";
        let challenge = BASE64URL_NOPAD.encode(digest::digest(&digest::SHA256, verifier.as_bytes()).as_ref());
        assert!(verify_pkce(Some("S256"), Some(&challenge), Some(verifier)));
    }

    #[test]
    fn pkce_s256_rejects_wrong_verifier() {
        use data_encoding::BASE64URL_NOPAD;
        use ring::digest;

        let challenge = BASE64URL_NOPAD.encode(digest::digest(&digest::SHA256, b"right-verifier").as_ref());
        assert!(!verify_pkce(Some("S256"), Some(&challenge), Some("wrong-verifier")));
    }

    #[test]
    fn pkce_plain_compares_verifier_directly() {
        assert!(verify_pkce(Some("plain"), Some("same-value"), Some("same-value")));
        assert!(!verify_pkce(Some("plain"), Some("same-value"), Some("different")));
    }

    #[test]
    fn pkce_unknown_method_rejected() {
        assert!(!verify_pkce(Some("bogus"), Some("x"), Some("x")));
    }

    #[test]
    fn an_authorization_code_is_consumed_exactly_once_and_replay_is_traceable() {
        let code = "single-use-code-for-a-test".to_string();
        store_code(
            code.clone(),
            AuthorizationCode {
                client_id: "client-1".into(),
                user_id: "user-1".into(),
                redirect_uri: "https://client.example/callback".into(),
                scopes: vec!["openid".into()],
                code_challenge: None,
                code_challenge_method: None,
                nonce: None,
            },
        );

        // First exchange succeeds and records the sessions it minted.
        assert!(take_code(&code).is_some());
        mark_issued(&code, vec!["session-a".into(), "session-b".into()]);

        // A second exchange attempt finds no grant left to redeem...
        assert!(take_code(&code).is_none());
        // ...but the caller can look up what was minted from it and revoke it.
        let to_revoke = take_issued_for_replay(&code).expect("replay record must exist after a consumed code");
        assert_eq!(to_revoke, vec!["session-a".to_string(), "session-b".to_string()]);

        // The replay record itself is single-use too.
        assert!(take_issued_for_replay(&code).is_none());
    }
}
