//! OTP engine (§4.4): generates, stores (hashed), delivers, rate-limits,
//! and verifies one-time codes, parameterized by purpose. Grounded on the
//! teacher's two-factor-by-email flow in
//! `src/api/core/two_factor/email.rs` (random code, hashed-compare,
//! attempts counter, TTL) generalized from a single 2FA purpose to the
//! five purposes this spec names, and moved off the durable store onto
//! the cache layer since a challenge is always ephemeral.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditSink};
use crate::cache::rate;
use crate::crypto;
use crate::delivery;
use crate::error::EmptyResult;
use crate::CONFIG;

/// Challenges tolerate at most this many wrong guesses before they burn
/// themselves — exhaustion is treated the same as expiry (§4.4 edge case
/// policy: indistinguishable `Invalid`).
const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    Registration,
    Login,
    Verification,
    PasswordReset,
    TwoFactorStepUp,
}

impl Purpose {
    fn as_str(self) -> &'static str {
        match self {
            Purpose::Registration => "registration",
            Purpose::Login => "login",
            Purpose::Verification => "verification",
            Purpose::PasswordReset => "password-reset",
            Purpose::TwoFactorStepUp => "2fa-step-up",
        }
    }
}

struct Challenge {
    code_hash: String,
    attempts: u32,
    expires_at: Instant,
}

static CHALLENGES: LazyLock<DashMap<String, Challenge>> = LazyLock::new(DashMap::new);

fn key(destination: &str, purpose: Purpose) -> String {
    format!("{}:{destination}", purpose.as_str())
}

/// Generates a fresh code, replacing any outstanding challenge for the
/// same (destination, purpose) — a resend burns the old one, per §4.4.
pub async fn send(destination: &str, purpose: Purpose, audit: &AuditSink) -> EmptyResult {
    rate::check_otp(&key(destination, purpose), crate::util::looks_like_phone(destination))?;

    let code = crypto::generate_numeric_code(CONFIG.otp_code_length())?;
    let challenge = Challenge {
        code_hash: crypto::sha256_hex(code.as_bytes()),
        attempts: 0,
        expires_at: Instant::now() + Duration::from_secs(CONFIG.otp_ttl_secs().max(0) as u64),
    };
    CHALLENGES.insert(key(destination, purpose), challenge);

    // Delivery failures are logged, never propagated: the primary
    // decision (a challenge now exists and rate limiting is charged)
    // must not unwind because an email provider hiccuped (§7).
    if let Err(e) = delivery::send_otp_code(destination, &code).await {
        error!("failed to deliver otp to {destination}: {e:?}");
    }

    audit.record(AuditEntry::new("otp.sent").ip(destination).detail(serde_json::json!({"purpose": purpose.as_str()})));
    Ok(())
}

/// Verifies a presented code. Every failure path (missing, expired,
/// over-attempts, mismatch) returns the same `OtpInvalid` kind so a
/// caller can't distinguish "no such challenge" from "wrong code".
pub fn verify(destination: &str, purpose: Purpose, code: &str) -> EmptyResult {
    let k = key(destination, purpose);

    let Some(mut entry) = CHALLENGES.get_mut(&k) else {
        err!(OtpInvalid, "No matching verification code")
    };

    if entry.expires_at < Instant::now() || entry.attempts >= MAX_ATTEMPTS {
        drop(entry);
        CHALLENGES.remove(&k);
        err!(OtpInvalid, "Verification code expired or exhausted")
    }

    entry.attempts += 1;
    let matches = crypto::ct_eq(&entry.code_hash, crypto::sha256_hex(code.as_bytes()));
    let exhausted = entry.attempts >= MAX_ATTEMPTS;
    drop(entry);

    if matches {
        CHALLENGES.remove(&k);
        Ok(())
    } else {
        if exhausted {
            CHALLENGES.remove(&k);
        }
        err!(OtpInvalid, "Incorrect verification code")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_challenge_is_invalid() {
        let err = verify("nobody@example.com", Purpose::Login, "000000").unwrap_err();
        assert!(matches!(err, crate::error::Error::OtpInvalid(..)));
    }

    #[test]
    fn a_successful_verify_consumes_the_challenge() {
        let k = key("once@example.com", Purpose::Registration);
        CHALLENGES.insert(
            k,
            Challenge {
                code_hash: crypto::sha256_hex(b"654321"),
                attempts: 0,
                expires_at: Instant::now() + Duration::from_secs(60),
            },
        );
        verify("once@example.com", Purpose::Registration, "654321").unwrap();
        // Same (destination, purpose, code) a second time: no longer there.
        assert!(verify("once@example.com", Purpose::Registration, "654321").is_err());
    }

    #[test]
    fn repeated_wrong_guesses_exhaust_the_challenge() {
        let k = key("burn@example.com", Purpose::Verification);
        CHALLENGES.insert(
            k,
            Challenge {
                code_hash: crypto::sha256_hex(b"123456"),
                attempts: 0,
                expires_at: Instant::now() + Duration::from_secs(60),
            },
        );
        for _ in 0..MAX_ATTEMPTS {
            assert!(verify("burn@example.com", Purpose::Verification, "000000").is_err());
        }
        // Even the right code now fails: the challenge burned itself out.
        assert!(verify("burn@example.com", Purpose::Verification, "123456").is_err());
    }
}
