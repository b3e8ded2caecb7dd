//! Device-authorization grant (RFC 8628, §4.8 "Device-code"). Grounded on
//! `otp.rs`'s `CHALLENGES` map: an in-memory, TTL-bounded, mutate-in-place
//! store keyed by an opaque code, polled by the client and written to by a
//! separate interactive leg (there, the OTP verify call; here, the
//! verification-page approve/deny call).

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use super::{client, mint_access_and_id_token, TokenSet};
use crate::audit::{AuditEntry, AuditSink};
use crate::crypto;
use crate::db::models::{OauthClient, Session, User};
use crate::db::DbConn;
use crate::error::Error;
use crate::CONFIG;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Status {
    Pending,
    Approved { user_id: String },
    Denied,
}

struct DeviceRecord {
    client_id: String,
    scopes: Vec<String>,
    status: Status,
    expires_at: Instant,
    last_poll: Option<Instant>,
}

static RECORDS: LazyLock<DashMap<String, DeviceRecord>> = LazyLock::new(DashMap::new);
static USER_CODE_INDEX: LazyLock<DashMap<String, String>> = LazyLock::new(DashMap::new);

fn generate_user_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let bytes = crypto::get_random(vec![0u8; 8]);
    let chars: String = bytes.iter().map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char).collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_code_has_the_xxxx_dash_xxxx_shape() {
        const ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        let code = generate_user_code();
        let (left, right) = code.split_once('-').expect("user code must contain exactly one dash");
        assert_eq!(left.len(), 4);
        assert_eq!(right.len(), 4);
        assert!(left.chars().chain(right.chars()).all(|c| ALPHABET.contains(c)));
    }

    #[test]
    fn user_code_never_contains_ambiguous_characters() {
        // I/O/0/1 are deliberately excluded from the alphabet so a user
        // reading the code off a second screen can't confuse them.
        let code = generate_user_code();
        assert!(!code.contains(['I', 'O', '0', '1']));
    }
}

#[derive(Serialize)]
pub struct DeviceFlowStart {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: i64,
    pub expires_in: i64,
}

pub async fn begin(client_id: &str, scope: Vec<String>, conn: &DbConn) -> Result<DeviceFlowStart, Error> {
    let Some(client) = OauthClient::find_by_id(client_id, conn).await else {
        return Err(Error::OAuthError("invalid_client".into(), "Unknown OAuth client".into()));
    };
    if !client.grant_type_allowed("urn:ietf:params:oauth:grant-type:device_code") {
        return Err(Error::OAuthError("unauthorized_client".into(), "Client is not allowed the device-code grant".into()));
    }

    let device_code = crypto::generate_opaque_token();
    let user_code = generate_user_code();
    let ttl = Duration::from_secs(CONFIG.device_code_ttl_secs().max(0) as u64);

    RECORDS.insert(
        device_code.clone(),
        DeviceRecord {
            client_id: client.id.clone(),
            scopes: scope,
            status: Status::Pending,
            expires_at: Instant::now() + ttl,
            last_poll: None,
        },
    );
    USER_CODE_INDEX.insert(user_code.clone(), device_code.clone());

    Ok(DeviceFlowStart {
        device_code,
        user_code,
        verification_uri: format!("{}/oauth/device", CONFIG.domain()),
        interval: CONFIG.device_code_interval_secs(),
        expires_in: CONFIG.device_code_ttl_secs(),
    })
}

/// The verification page's approve action, called after the login
/// collaborator authenticates the user presenting the user-code.
pub fn approve(user_code: &str, user_id: &str) -> Result<(), Error> {
    let Some((_, device_code)) = USER_CODE_INDEX.remove(user_code) else {
        return Err(Error::NotFound("Unknown or expired user code".into(), "NotFound".into()));
    };
    let Some(mut record) = RECORDS.get_mut(&device_code) else {
        return Err(Error::NotFound("Unknown or expired user code".into(), "NotFound".into()));
    };
    record.status = Status::Approved {
        user_id: user_id.to_string(),
    };
    Ok(())
}

pub fn deny(user_code: &str) -> Result<(), Error> {
    let Some((_, device_code)) = USER_CODE_INDEX.remove(user_code) else {
        return Err(Error::NotFound("Unknown or expired user code".into(), "NotFound".into()));
    };
    if let Some(mut record) = RECORDS.get_mut(&device_code) {
        record.status = Status::Denied;
    }
    Ok(())
}

/// `/oauth/token` with `grant_type=urn:ietf:params:oauth:grant-type:
/// device_code`. Polling client behavior (pending/slow_down/approved/
/// expired) is exactly §4.8's device-code state machine.
pub async fn poll(device_code: String, presented: client::PresentedCredentials, conn: &DbConn, audit: &AuditSink) -> Result<TokenSet, Error> {
    let client = client::resolve(&presented, conn).await?;

    let Some(mut record) = RECORDS.get_mut(&device_code) else {
        return Err(Error::OAuthError("expired_token".into(), "Unknown or expired device code".into()));
    };
    if record.client_id != client.id {
        return Err(Error::OAuthError("invalid_grant".into(), "Device code was not issued to this client".into()));
    }
    if Instant::now() > record.expires_at {
        drop(record);
        RECORDS.remove(&device_code);
        return Err(Error::OAuthError("expired_token".into(), "Device code has expired".into()));
    }

    let interval = Duration::from_secs(CONFIG.device_code_interval_secs().max(0) as u64);
    if let Some(last) = record.last_poll {
        if last.elapsed() < interval {
            return Err(Error::OAuthError("slow_down".into(), "Polling too frequently".into()));
        }
    }
    record.last_poll = Some(Instant::now());

    match record.status.clone() {
        Status::Pending => Err(Error::OAuthError("authorization_pending".into(), "User has not yet completed verification".into())),
        Status::Denied => {
            drop(record);
            RECORDS.remove(&device_code);
            Err(Error::OAuthError("access_denied".into(), "User denied the request".into()))
        }
        Status::Approved {
            user_id,
        } => {
            let scopes = record.scopes.clone();
            drop(record);
            RECORDS.remove(&device_code);

            let Some(user) = User::find_by_id(&user_id, conn).await else {
                return Err(Error::OAuthError("invalid_grant".into(), "Subject no longer exists".into()));
            };
            if user.disabled {
                return Err(Error::OAuthError("invalid_grant".into(), "Subject is disabled".into()));
            }

            let refresh_token = crypto::generate_opaque_token();
            let mut session = Session::new(user.id.clone(), format!("oauth-device:{}", client.id), Some(client.name.clone()), &refresh_token);
            session.save(conn).await?;

            let (access_token, id_token) = mint_access_and_id_token(&user, &session.id, &client, &scopes, vec!["device".into()], None);

            audit.record(AuditEntry::new("oauth.token_issued").principal(user.id.clone()).detail(serde_json::json!({"client_id": client.id, "grant": "device_code"})));

            Ok(TokenSet {
                access_token,
                token_type: "Bearer",
                expires_in: CONFIG.access_token_ttl_secs(),
                refresh_token: Some(refresh_token),
                id_token,
                scope: scopes.join(" "),
            })
        }
    }
}
