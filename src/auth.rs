//! Token service (§4.1): signs and verifies access tokens, and the bearer
//! guards request handlers use to resolve the caller. Grounded on the
//! teacher's `src/auth.rs` JWT plumbing (RS256 signing key pair loaded
//! once from PEM files, `encode_jwt`/`decode_jwt` helpers, `Headers`
//! request guard) — ported from Rocket's pre-0.5 synchronous
//! `FromRequest<'a, 'r>` to the async `FromRequest<'r>` trait, and from a
//! single always-current keypair to a current-plus-previous set so a key
//! rotation doesn't invalidate tokens issued under the outgoing key.

use std::net::IpAddr;
use std::sync::LazyLock;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use serde::{Deserialize, Serialize};

use crate::cache::{revocation, TtlCache};
use crate::crypto;
use crate::db::models::{ApiKey, User};
use crate::db::DbConn;
use crate::error::Error;
use crate::util::read_file;
use crate::CONFIG;

const JWT_ALGORITHM: Algorithm = Algorithm::RS256;

/// Key id advertised in the JWT header and in the JWKS document (§6
/// discovery), so a rotation that adds a new signing key doesn't force
/// verifiers to guess which JWKS entry matches a given token.
static KID: LazyLock<String> = LazyLock::new(|| {
    let pem = read_file(&CONFIG.access_signing_key_path()).unwrap_or_default();
    crypto::sha256_hex(&pem)[..16].to_string()
});

static JWT_HEADER: LazyLock<Header> = LazyLock::new(|| {
    let mut header = Header::new(JWT_ALGORITHM);
    header.kid = Some(KID.clone());
    header
});

pub static JWT_ACCESS_ISSUER: LazyLock<String> = LazyLock::new(|| format!("{}|access", CONFIG.domain()));

static SIGNING_KEY: LazyLock<EncodingKey> = LazyLock::new(|| {
    let pem = read_file(&CONFIG.access_signing_key_path())
        .unwrap_or_else(|e| panic!("Error loading access token signing key: {e}"));
    EncodingKey::from_rsa_pem(&pem).unwrap_or_else(|e| panic!("Error decoding access token signing key: {e}"))
});

/// Verification keys: the current key first, then every key named in
/// `access_signing_key_previous_paths` (comma-separated), so tokens
/// signed before a rotation keep verifying until they expire naturally.
static VERIFY_KEYS: LazyLock<Vec<DecodingKey>> = LazyLock::new(|| {
    let mut keys = Vec::new();

    let current = read_file(&CONFIG.access_verify_key_path())
        .unwrap_or_else(|e| panic!("Error loading access token verify key: {e}"));
    keys.push(DecodingKey::from_rsa_pem(&current).unwrap_or_else(|e| panic!("Error decoding access verify key: {e}")));

    for path in CONFIG.access_signing_key_previous_paths().split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match read_file(path) {
            Ok(pem) => match DecodingKey::from_rsa_pem(&pem) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("Skipping previous access signing key {path}: {e}"),
            },
            Err(e) => warn!("Skipping previous access signing key {path}: {e:?}"),
        }
    }

    keys
});

pub fn load_keys() {
    LazyLock::force(&SIGNING_KEY);
    LazyLock::force(&VERIFY_KEYS);
    LazyLock::force(&KID);
}

/// Builds the JWKS document (§6 `/.well-known/jwks.json`): one RSA public
/// key entry per verification key currently registered, so a client can
/// validate tokens signed under the current key or a recently-rotated one.
pub fn jwks_json() -> serde_json::Value {
    use data_encoding::BASE64URL_NOPAD;
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;

    fn parse_rsa_public_key(pem: &str) -> Option<rsa::RsaPublicKey> {
        rsa::RsaPublicKey::from_public_key_pem(pem).or_else(|_| rsa::RsaPublicKey::from_pkcs1_pem(pem)).ok()
    }

    let mut paths = vec![CONFIG.access_verify_key_path()];
    paths.extend(CONFIG.access_signing_key_previous_paths().split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from));

    let keys: Vec<serde_json::Value> = paths
        .iter()
        .filter_map(|path| crate::util::read_file_string(path).ok())
        .filter_map(|pem| parse_rsa_public_key(&pem))
        .map(|key| {
            let n = BASE64URL_NOPAD.encode(&key.n().to_bytes_be());
            let e = BASE64URL_NOPAD.encode(&key.e().to_bytes_be());
            serde_json::json!({
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": KID.as_str(),
                "n": n,
                "e": e,
            })
        })
        .collect();

    serde_json::json!({ "keys": keys })
}

/// Access token claims (§4.1). `sid` ties the token to its issuing
/// session so logout/revoke-all can blacklist it; `cid` is present only
/// for OAuth-minted tokens; `aud` is the relying party the token was
/// minted for (the OAuth client, or this gateway's own domain for
/// first-party sessions); `roles` is a snapshot of the subject's role set
/// at issuance, not re-derived on every verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub sid: String,
    pub cid: Option<String>,
    pub scope: Vec<String>,
    pub username: Option<String>,
    pub roles: Vec<String>,
    pub amr: Vec<String>,
}

impl AccessTokenClaims {
    pub fn new(user: &User, session_id: &str, client_id: Option<String>, scope: Vec<String>, amr: Vec<String>) -> Self {
        let now = Utc::now().timestamp();
        let aud = client_id.clone().unwrap_or_else(|| CONFIG.domain());
        Self {
            sub: user.id.clone(),
            iss: JWT_ACCESS_ISSUER.to_string(),
            aud,
            iat: now,
            nbf: now,
            exp: now + CONFIG.access_token_ttl_secs(),
            sid: session_id.to_string(),
            cid: client_id,
            scope,
            username: user.username.clone().or_else(|| user.email.clone()),
            roles: user.role_list().into_iter().map(String::from).collect(),
            amr,
        }
    }
}

pub fn encode_access_token(claims: &AccessTokenClaims) -> String {
    jsonwebtoken::encode(&JWT_HEADER, claims, &SIGNING_KEY).unwrap_or_else(|e| panic!("Error encoding access token: {e}"))
}

/// Signs any serializable claim set with the same key/header as an access
/// token. Used by the OAuth server to mint OIDC ID tokens, whose claim
/// shape differs from `AccessTokenClaims` but whose signing key does not.
pub fn encode_id_token<T: Serialize>(claims: &T) -> String {
    jsonwebtoken::encode(&JWT_HEADER, claims, &SIGNING_KEY).unwrap_or_else(|e| panic!("Error encoding id token: {e}"))
}

/// Verifies signature and standard claims only. Revocation, subject
/// activity, and the `invalidated_before` freshness check are the
/// caller's job (`Principal::from_request` below) since they need a `DbConn`.
pub fn decode_access_token(token: &str) -> Result<AccessTokenClaims, Error> {
    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.leeway = 30;
    validation.set_issuer(&[JWT_ACCESS_ISSUER.as_str()]);

    let token = token.trim();
    for key in VERIFY_KEYS.iter() {
        if let Ok(data) = jsonwebtoken::decode::<AccessTokenClaims>(token, key, &validation) {
            return Ok(data.claims);
        }
    }
    err!(Unauthorized, "Invalid or expired access token")
}

/// The resolved caller of an authenticated request: either a session-
/// bound user (JWT access token) or an API-key-bound user (§4.7). Route
/// handlers that accept both forms take `Principal`; handlers that only
/// make sense for an interactive session take `Session` directly.
pub enum Principal {
    User {
        user: User,
        session_id: String,
        scope: Vec<String>,
    },
    ApiKey {
        user: User,
        key: ApiKey,
    },
}

impl Principal {
    pub fn user(&self) -> &User {
        match self {
            Principal::User {
                user, ..
            } => user,
            Principal::ApiKey {
                user, ..
            } => user,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        match self {
            Principal::User {
                scope: scopes, ..
            } => scopes.iter().any(|s| s == scope || s == "all"),
            Principal::ApiKey {
                key, ..
            } => key.has_scope(scope) || key.has_scope("all"),
        }
    }
}

/// Caches the full principal row keyed by user id so a verified access
/// token doesn't hit the durable store on every request (§4.1: "must not
/// touch the durable principal store unless the token's active-flag
/// snapshot demands re-check"). A miss re-fetches and re-inserts; a hit
/// skips the fetch entirely for up to `invalidated_before_grace_seconds`.
static ACTIVE_SNAPSHOT_CACHE: LazyLock<TtlCache<String, User>> =
    LazyLock::new(|| TtlCache::with_ttl(std::time::Duration::from_secs(CONFIG.invalidated_before_grace_seconds().max(1))));

/// Evicts a cached snapshot so a revoke-affecting write (password reset,
/// disable, revoke-all) is observed on the very next request instead of
/// waiting out the freshness window.
pub fn invalidate_principal_snapshot(user_id: &str) {
    ACTIVE_SNAPSHOT_CACHE.invalidate(&user_id.to_string());
}

fn bearer_token(request: &Request<'_>) -> Option<&str> {
    request.headers().get_one("X-API-Key").or_else(|| {
        request.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer ")).map(str::trim)
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Principal {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(token) = bearer_token(request) else {
            return Outcome::Error((Status::Unauthorized, "No bearer credential provided"));
        };

        let Outcome::Success(conn) = request.guard::<DbConn>().await else {
            return Outcome::Error((Status::InternalServerError, "Error getting DB connection"));
        };

        // API keys use a fixed, recognizable prefix so a single header can
        // carry either credential kind (§6 auth header conventions).
        if let Some(secret) = token.strip_prefix("agw_").map(|_| token) {
            let Some(key) = ApiKey::find_by_secret(secret, &conn).await else {
                return Outcome::Error((Status::Unauthorized, "Unknown API key"));
            };
            if !key.is_live() {
                return Outcome::Error((Status::Unauthorized, "API key revoked or expired"));
            }
            let Some(user) = User::find_by_id(&key.user_id, &conn).await else {
                return Outcome::Error((Status::Unauthorized, "API key owner not found"));
            };
            if user.disabled {
                return Outcome::Error((Status::Forbidden, "Account disabled"));
            }
            ApiKey::touch_last_used(&key.id, &conn).await.ok();
            return Outcome::Success(Principal::ApiKey {
                user,
                key,
            });
        }

        let claims = match decode_access_token(token) {
            Ok(c) => c,
            Err(_) => return Outcome::Error((Status::Unauthorized, "Invalid access token")),
        };

        if revocation::is_revoked(&claims.sid) {
            return Outcome::Error((Status::Unauthorized, "Session has been revoked"));
        }

        let user = match ACTIVE_SNAPSHOT_CACHE.get(&claims.sub) {
            Some(cached) => cached,
            None => {
                let Some(fetched) = User::find_by_id(&claims.sub, &conn).await else {
                    return Outcome::Error((Status::Unauthorized, "Unknown subject"));
                };
                ACTIVE_SNAPSHOT_CACHE.insert(claims.sub.clone(), fetched.clone());
                fetched
            }
        };
        if user.disabled {
            return Outcome::Error((Status::Forbidden, "Account disabled"));
        }
        // `invalidated_before` enforces the ordering guarantee from §5: a
        // RevokeAllForUser call must not retroactively revoke a token
        // minted after it, but must revoke everything minted before. The
        // snapshot above may be up to `invalidated_before_grace_seconds`
        // stale, which is the policy's whole point — a fresher read would
        // defeat the point of caching it.
        if claims.iat < user.invalidated_before.and_utc().timestamp() {
            return Outcome::Error((Status::Unauthorized, "Token invalidated"));
        }

        Outcome::Success(Principal::User {
            user,
            session_id: claims.sid,
            scope: claims.scope,
        })
    }
}

pub struct ClientIp {
    pub ip: IpAddr,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = if CONFIG.ip_header_enabled() {
            request.headers().get_one(&CONFIG.ip_header()).and_then(|ip| {
                match ip.find(',') {
                    Some(idx) => &ip[..idx],
                    None => ip,
                }
                .trim()
                .parse()
                .map_err(|_| warn!("'{}' header is malformed: {}", CONFIG.ip_header(), ip))
                .ok()
            })
        } else {
            None
        };

        let ip = ip.or_else(|| request.remote().map(|r| r.ip())).unwrap_or_else(|| "0.0.0.0".parse().unwrap());

        Outcome::Success(ClientIp {
            ip,
        })
    }
}
