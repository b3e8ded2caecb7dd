//! Two-factor engine (§4.5): TOTP enroll/verify/disable and backup-code
//! consumption. Grounded on the teacher's
//! `src/api/core/two_factor/{authenticator,totp}.rs` pairing (one module
//! owning secret generation/validation, invoked from the login flow in
//! `src/api/identity.rs`), collapsed into a single module since this
//! crate has only the one factor kind instead of the teacher's many
//! (authenticator/email/duo/webauthn/yubikey).

pub mod totp;

use std::sync::LazyLock;
use std::time::Duration;

use crate::cache::TakeStore;
use crate::crypto;
use crate::db::models::User;
use crate::error::EmptyResult;
use crate::CONFIG;

pub const BACKUP_CODE_COUNT: usize = 10;

/// Step-up tickets issued after a successful password check when 2FA is
/// still outstanding (§4.6.3). Single-use by construction (`TakeStore`).
static TICKETS: LazyLock<TakeStore<String, String>> = LazyLock::new(TakeStore::new);

struct PendingEnrollment {
    raw_secret: Vec<u8>,
    backup_codes: Vec<String>,
}

/// Enrollment in progress, keyed by user id: `begin_enrollment` writes here
/// and `complete_enrollment` consumes it single-shot, so the secret never
/// becomes live until the caller proves possession of it.
static PENDING_ENROLLMENTS: LazyLock<TakeStore<String, PendingEnrollment>> = LazyLock::new(TakeStore::new);

pub fn mint_ticket(user_id: &str) -> String {
    let ticket = crypto::generate_opaque_token();
    TICKETS.put(ticket.clone(), user_id.to_string(), Duration::from_secs(CONFIG.twofactor_ticket_ttl_secs().max(0) as u64));
    ticket
}

/// Consumes the ticket, returning the bound user id. Single-shot: a
/// second redemption (including a failed 2FA attempt against the first)
/// always misses, which is why the orchestrator must re-mint on retry
/// rather than reuse a failed ticket (§4.6.3: "the ticket is already
/// consumed, preventing brute-force on a single ticket").
pub fn take_ticket(ticket: &str) -> Option<String> {
    TICKETS.take(&ticket.to_string())
}

pub struct Enrollment {
    pub secret_base32: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

/// Begins enrollment: generates a secret and backup codes, but persists
/// nothing onto `User` yet — they sit in `PENDING_ENROLLMENTS` until the
/// caller round-trips a code through `complete_enrollment`. `TOTP-enabled`
/// only flips true at that point (§4.5: "setup is pending until the user
/// verifies the first code").
pub fn begin_enrollment(user_id: &str, account_label: &str) -> Enrollment {
    let raw_secret = crypto::get_random(vec![0u8; totp::SECRET_BYTES]);
    let secret_base32 = totp::encode_secret(&raw_secret);
    let issuer = CONFIG.domain();
    let provisioning_uri = totp::provisioning_uri(&issuer, account_label, &secret_base32);

    let backup_codes: Vec<String> =
        (0..BACKUP_CODE_COUNT).map(|_| data_encoding::BASE32_NOPAD.encode(&crypto::get_random(vec![0u8; 5]))).collect();

    PENDING_ENROLLMENTS.put(
        user_id.to_string(),
        PendingEnrollment {
            raw_secret,
            backup_codes: backup_codes.clone(),
        },
        Duration::from_secs(CONFIG.twofactor_ticket_ttl_secs().max(0) as u64),
    );

    Enrollment {
        secret_base32,
        provisioning_uri,
        backup_codes,
    }
}

/// Consumes the pending enrollment for `user.id` and, only if `code`
/// matches it, flips TOTP on. A second attempt against the same enrollment
/// (right or wrong code) always misses, same single-shot discipline as
/// the 2FA step-up ticket.
pub fn complete_enrollment(user: &mut User, code: &str) -> EmptyResult {
    let Some(pending) = PENDING_ENROLLMENTS.take(&user.id) else {
        err!(TwoFactorInvalid, "No enrollment in progress or it has expired")
    };
    if !totp::verify(code, &pending.raw_secret, totp::Digest::Sha1, now_unix()) {
        err!(TwoFactorInvalid, "TOTP code did not match during enrollment")
    }
    user.totp_secret = Some(totp::encode_secret(&pending.raw_secret));
    user.totp_enabled = true;
    user.set_backup_codes(&pending.backup_codes);
    Ok(())
}

/// Verifies a code presented during the step-up flow: tries TOTP first,
/// falls back to a backup code. Backup-code success mutates `user` (the
/// code is consumed) so the caller must persist it afterward.
pub fn verify(user: &mut User, code: &str) -> EmptyResult {
    if let Some(secret_b32) = &user.totp_secret {
        if let Ok(raw) = totp::decode_secret(secret_b32) {
            if totp::verify(code, &raw, totp::Digest::Sha1, now_unix()) {
                return Ok(());
            }
        }
    }
    if user.consume_backup_code(code) {
        return Ok(());
    }
    err!(TwoFactorInvalid, "Invalid two-factor code")
}

/// Disable (§4.5): requires the current password AND a current TOTP code
/// (or backup code) before any 2FA material is cleared.
pub fn disable(user: &mut User, current_password: &str, code: &str) -> EmptyResult {
    if !user.check_valid_password(current_password) {
        err!(InvalidCredentials, "Current password is incorrect")
    }
    verify(user, code)?;
    user.totp_secret = None;
    user.totp_enabled = false;
    user.backup_codes = None;
    Ok(())
}

fn now_unix() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_then_verify_round_trips() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        let enrollment = begin_enrollment(&user.id, "user@example.com");
        let raw_secret = totp::decode_secret(&enrollment.secret_base32).unwrap();
        let code = format!("{:06}", totp::hotp(&raw_secret, now_unix() / 30, totp::Digest::Sha1));
        complete_enrollment(&mut user, &code).unwrap();
        assert!(user.totp_enabled);

        let login_code = format!("{:06}", totp::hotp(&raw_secret, now_unix() / 30, totp::Digest::Sha1));
        verify(&mut user, &login_code).unwrap();
    }

    #[test]
    fn enrollment_cannot_be_completed_twice() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        let enrollment = begin_enrollment(&user.id, "user@example.com");
        let raw_secret = totp::decode_secret(&enrollment.secret_base32).unwrap();
        let code = format!("{:06}", totp::hotp(&raw_secret, now_unix() / 30, totp::Digest::Sha1));
        complete_enrollment(&mut user, &code).unwrap();
        assert!(complete_enrollment(&mut user, &code).is_err());
    }

    #[test]
    fn disable_requires_correct_password_and_code() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        user.set_password("correct horse battery staple").unwrap();
        let enrollment = begin_enrollment(&user.id, "user@example.com");
        let raw_secret = totp::decode_secret(&enrollment.secret_base32).unwrap();
        let code = format!("{:06}", totp::hotp(&raw_secret, now_unix() / 30, totp::Digest::Sha1));
        complete_enrollment(&mut user, &code).unwrap();

        let login_code = format!("{:06}", totp::hotp(&raw_secret, now_unix() / 30, totp::Digest::Sha1));
        assert!(disable(&mut user, "wrong password", &login_code).is_err());
        assert!(user.totp_enabled);

        let login_code = format!("{:06}", totp::hotp(&raw_secret, now_unix() / 30, totp::Digest::Sha1));
        disable(&mut user, "correct horse battery staple", &login_code).unwrap();
        assert!(!user.totp_enabled);
    }

    #[test]
    fn backup_code_is_single_use() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        user.set_backup_codes(&["AAAA11111".to_string()]);
        verify(&mut user, "AAAA11111").unwrap();
        assert!(verify(&mut user, "AAAA11111").is_err());
    }
}
