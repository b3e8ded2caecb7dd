//! Authentication orchestrator (§4.6): the state machines that compose the
//! token service, session ledger, OTP engine, two-factor engine, and
//! revocation cache into the seven flows a caller actually drives —
//! sign-up, password sign-in, 2FA step-up, refresh, logout, password
//! change/reset, passwordless sign-in. Grounded on the teacher's
//! `src/api/identity.rs` login handler, which is the one place the teacher
//! itself threads rate-limiting, password compare, 2FA check, and token
//! minting together into a single flow; generalized here from one
//! monolithic handler into one function per state machine so each can be
//! called from its own route (or, for passwordless/OAuth, from a second
//! entry point) without duplicating the composition.

use crate::audit::{AuditEntry, AuditSink};
use crate::auth::{self, AccessTokenClaims, ClientIp};
use crate::cache::{rate, revocation};
use crate::crypto;
use crate::db::models::{RefreshTokenMatch, Session, User};
use crate::db::DbConn;
use crate::error::{EmptyResult, Error};
use crate::otp::{self, Purpose};
use crate::two_factor;
use crate::CONFIG;

/// A fully opened session: the pair every successful flow below ends on.
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

fn mint_session(user: &User, device_identifier: String, device_name: Option<String>, amr: Vec<String>) -> (Session, TokenPair) {
    let refresh_token = crypto::generate_opaque_token();
    let session = Session::new(user.id.clone(), device_identifier, device_name, &refresh_token);
    let claims = AccessTokenClaims::new(user, &session.id, None, vec!["all".into()], amr);
    let access_token = auth::encode_access_token(&claims);
    (
        session,
        TokenPair {
            access_token,
            refresh_token,
            expires_in: CONFIG.access_token_ttl_secs(),
        },
    )
}

/// §4.6.1 Sign-up. `Start → Validated → Created → SessionOpened`; the
/// `Created` row is the commit boundary, so there is nothing to unwind if
/// the verification OTP fails to send afterward. §6's signup body is
/// `{email, username, password, full_name?}`; either identifier alone is
/// enough to satisfy §3's "at least one of {email, phone, username}"
/// invariant (sign-up never takes a phone directly — that's established
/// afterward through `/otp/verify`).
pub async fn sign_up(
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
    full_name: Option<String>,
    device_name: Option<String>,
    ip: &ClientIp,
    conn: &DbConn,
    audit: &AuditSink,
) -> Result<(User, TokenPair), Error> {
    rate::check_signup(&ip.ip.to_string())?;

    let email = match email {
        Some(email) if !email.trim().is_empty() => Some(crate::util::normalize_email(&email)?),
        _ => None,
    };
    let username = username.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());

    if email.is_none() && username.is_none() {
        err!(InvalidRequest, "Email or username is required")
    }
    if let Some(email) = &email {
        if User::find_by_email(email, conn).await.is_some() {
            err!(Conflict, "An account with this identifier already exists")
        }
    }
    if let Some(username) = &username {
        if User::find_by_username(username, conn).await.is_some() {
            err!(Conflict, "An account with this identifier already exists")
        }
    }

    let mut user = User::new(email.clone(), None, username)?;
    user.full_name = full_name;
    if let Some(password) = &password {
        user.set_password(password)?;
    }
    user.save(conn).await?;

    let (mut session, tokens) = mint_session(&user, format!("signup:{}", crate::util::get_uuid()), device_name, vec!["pwd".into()]);
    session.save(conn).await?;

    audit.record(AuditEntry::new("user.signed_up").principal(user.id.clone()).ip(ip.ip.to_string()));

    // Best-effort: a delivery hiccup must not fail an already-committed
    // sign-up (§7 propagation policy).
    if let Some(email) = &email {
        if let Err(e) = otp::send(email, Purpose::Registration, audit).await {
            error!("failed to send registration verification code to {email}: {e:?}");
        }
    }

    Ok((user, tokens))
}

pub enum SignInOutcome {
    SessionOpened(User, TokenPair),
    Requires2FA { ticket: String },
}

/// §4.6.2 Password sign-in. `Start → PasswordChecked → {2FARequired |
/// SessionOpened}`. Every failure before `PasswordChecked` is folded into
/// the same `InvalidCredentials` kind so a caller cannot distinguish
/// "no such account" from "wrong password" (§8 enumeration resistance).
/// `identifier` is looked up against email, phone, and username in turn,
/// since any of the three may be how the account was created.
pub async fn password_sign_in(identifier: String, password: String, device_name: Option<String>, ip: &ClientIp, conn: &DbConn, audit: &AuditSink) -> Result<SignInOutcome, Error> {
    let ip_key = ip.ip.to_string();
    rate::check_login(&ip_key)?;

    let identifier = identifier.trim().to_lowercase();
    let Some(mut user) = User::find_by_identifier(&identifier, conn).await else {
        crypto::verify_dummy_password_hash(password.as_bytes());
        err!(InvalidCredentials, "Invalid credentials")
    };

    if !user.check_valid_password(&password) {
        let locked_out = revocation::record_failure(&ip_key);
        audit.record(AuditEntry::new("auth.password_mismatch").principal(user.id.clone()).ip(ip_key.clone()));
        if locked_out {
            err!(RateLimited, "Too many failed sign-in attempts")
        }
        err!(InvalidCredentials, "Invalid credentials")
    }
    revocation::clear_failures(&ip_key);

    if user.disabled {
        err!(AccountDisabled, "Account is disabled")
    }

    if user.totp_enabled {
        let ticket = two_factor::mint_ticket(&user.id);
        audit.record(AuditEntry::new("auth.password_checked").principal(user.id.clone()).ip(ip_key));
        return Ok(SignInOutcome::Requires2FA {
            ticket,
        });
    }

    let (mut session, tokens) = mint_session(&user, format!("web:{}", crate::util::get_uuid()), device_name, vec!["pwd".into()]);
    session.save(conn).await?;
    user.save(conn).await?;

    audit.record(AuditEntry::new("auth.signed_in").principal(user.id.clone()).ip(ip_key));
    Ok(SignInOutcome::SessionOpened(user, tokens))
}

/// §4.6.3 Two-factor step-up. The ticket is consumed single-shot before
/// the code is even checked, so a failed guess can never be retried
/// against the same ticket (prevents brute-force on one ticket).
pub async fn two_factor_step_up(ticket: String, code: String, device_name: Option<String>, ip: &ClientIp, conn: &DbConn, audit: &AuditSink) -> Result<(User, TokenPair), Error> {
    let Some(user_id) = two_factor::take_ticket(&ticket) else {
        err!(Unauthorized, "Two-factor ticket is invalid or already used")
    };
    let Some(mut user) = User::find_by_id(&user_id, conn).await else {
        err!(Unauthorized, "Two-factor ticket is invalid or already used")
    };

    if let Err(e) = two_factor::verify(&mut user, &code) {
        audit.record(AuditEntry::new("auth.2fa_failed").principal(user.id.clone()).ip(ip.ip.to_string()));
        return Err(e);
    }
    user.save(conn).await?;

    let (mut session, tokens) = mint_session(&user, format!("web:{}", crate::util::get_uuid()), device_name, vec!["pwd".into(), "mfa".into()]);
    session.save(conn).await?;

    audit.record(AuditEntry::new("auth.2fa_succeeded").principal(user.id.clone()).ip(ip.ip.to_string()));
    Ok((user, tokens))
}

/// §4.6.4 Refresh. Rotation always happens on a `Current` match; a
/// `Replay` match (a grace-state hash presented after a newer rotation
/// already exists, or presented twice) revokes every session the user
/// holds, not just this one, since it means a stolen refresh token is in
/// play.
pub async fn refresh(refresh_token: String, conn: &DbConn, audit: &AuditSink) -> Result<TokenPair, Error> {
    let Some(mut session) = Session::find_by_presented_refresh_token(&refresh_token, conn).await else {
        err!(Unauthorized, "Invalid refresh token")
    };
    if session.revoked {
        err!(Revoked, "Session has been revoked")
    }

    match session.classify(&refresh_token) {
        RefreshTokenMatch::Replay => {
            Session::revoke_all_for_user(&session.user_id, conn).await.ok();
            revocation::revoke(&session.id);
            audit.record(AuditEntry::new("token.replay_detected").principal(session.user_id.clone()));
            err!(Revoked, "Refresh token reuse detected; all sessions revoked")
        }
        RefreshTokenMatch::Expired => {
            Session::revoke(&session.id, conn).await.ok();
            err!(Expired, "Refresh token has expired")
        }
        RefreshTokenMatch::Unknown => err!(Unauthorized, "Invalid refresh token"),
        RefreshTokenMatch::Grace | RefreshTokenMatch::Current => {}
    }

    let Some(user) = User::find_by_id(&session.user_id, conn).await else {
        err!(Unauthorized, "Invalid refresh token")
    };
    if user.disabled {
        err!(AccountDisabled, "Account is disabled")
    }

    let new_refresh_token = crypto::generate_opaque_token();
    session.rotate(&new_refresh_token);
    session.save(conn).await?;

    let claims = AccessTokenClaims::new(&user, &session.id, None, vec!["all".into()], vec!["pwd".into()]);
    let access_token = auth::encode_access_token(&claims);

    audit.record(AuditEntry::new("token.refreshed").principal(user.id.clone()));

    Ok(TokenPair {
        access_token,
        refresh_token: new_refresh_token,
        expires_in: CONFIG.access_token_ttl_secs(),
    })
}

/// §4.6.5 Logout. The access token is blacklisted by its session id until
/// natural expiry; a presented refresh token also revokes its session row
/// so a subsequent refresh attempt fails outright instead of merely
/// expiring.
pub async fn logout(session_id: &str, refresh_token: Option<String>, conn: &DbConn, audit: &AuditSink) -> EmptyResult {
    revocation::revoke(session_id);
    Session::revoke(session_id, conn).await.ok();

    if let Some(refresh_token) = refresh_token {
        if let Some(session) = Session::find_by_presented_refresh_token(&refresh_token, conn).await {
            Session::revoke(&session.id, conn).await.ok();
            revocation::revoke(&session.id);
        }
    }

    audit.record(AuditEntry::new("auth.signed_out"));
    Ok(())
}

/// §4.6.6 Password change: requires the current password, updates the
/// hash, and — unless the policy is turned off — revokes every other
/// session for the user, keeping the one driving the change.
pub async fn change_password(user: &mut User, current_password: &str, new_password: &str, current_session_id: &str, conn: &DbConn, audit: &AuditSink) -> EmptyResult {
    if !user.check_valid_password(current_password) {
        err!(InvalidCredentials, "Current password is incorrect")
    }
    user.set_password(new_password)?;
    user.save(conn).await?;

    if CONFIG.password_change_revokes_other_sessions() {
        for session in Session::find_all_for_user(&user.id, conn).await {
            if session.id != current_session_id {
                Session::revoke(&session.id, conn).await.ok();
                revocation::revoke(&session.id);
            }
        }
    }

    audit.record(AuditEntry::new("user.password_changed").principal(user.id.clone()));
    Ok(())
}

/// §4.6.6 Password reset, OTP-gated. Unlike a change, a reset revokes
/// every session unconditionally — there is no "current" session to spare
/// since the caller isn't authenticated yet.
pub async fn reset_password(identifier: String, code: String, new_password: String, conn: &DbConn, audit: &AuditSink) -> EmptyResult {
    let identifier = identifier.trim().to_lowercase();
    otp::verify(&identifier, Purpose::PasswordReset, &code)?;

    let Some(mut user) = User::find_by_identifier(&identifier, conn).await else {
        err!(OtpInvalid, "No matching verification code")
    };

    user.set_password(&new_password)?;
    user.invalidate_tokens_before_now();
    user.save(conn).await?;
    Session::revoke_all_for_user(&user.id, conn).await.ok();
    // The cached active-flag snapshot just went stale; evict it so the
    // freshness grace window (§4.1) can't mask this revoke for up to
    // `invalidated_before_grace_seconds`.
    auth::invalidate_principal_snapshot(&user.id);

    audit.record(AuditEntry::new("user.password_reset").principal(user.id.clone()));
    Ok(())
}

/// §4.6.7 `RequestPasswordless`. The response must look identical whether
/// or not `destination` belongs to an account — the OTP engine is sent to
/// exactly the same rate/store path either way, and the result is
/// discarded, so there is no enumeration side channel here.
pub async fn request_passwordless(destination: String, conn: &DbConn, audit: &AuditSink) -> EmptyResult {
    let destination = destination.trim().to_lowercase();
    // The account lookup only gates whether we deliver a real code further
    // down in `otp::send`; whether or not it exists, the rate check and
    // challenge bookkeeping run identically.
    let _ = User::find_by_identifier(&destination, conn).await;
    otp::send(&destination, Purpose::Login, audit).await
}

/// §4.6.7 `VerifyPasswordless`. Consumes the code first so a repeated
/// guess against the same challenge never succeeds twice, then opens a
/// session only if the destination turns out to belong to a live account.
pub async fn verify_passwordless(destination: String, code: String, device_name: Option<String>, conn: &DbConn, audit: &AuditSink) -> Result<(User, TokenPair), Error> {
    let destination = destination.trim().to_lowercase();
    otp::verify(&destination, Purpose::Login, &code)?;

    let Some(user) = User::find_by_identifier(&destination, conn).await else {
        err!(OtpInvalid, "No matching verification code")
    };
    if user.disabled {
        err!(AccountDisabled, "Account is disabled")
    }

    let (mut session, tokens) = mint_session(&user, format!("passwordless:{}", crate::util::get_uuid()), device_name, vec!["otp".into()]);
    session.save(conn).await?;

    audit.record(AuditEntry::new("auth.passwordless_signed_in").principal(user.id.clone()));
    Ok((user, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_mismatch_is_indistinguishable_from_missing_account() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        user.set_password("correct horse battery staple").unwrap();
        // No signing keys are loaded in this test, so we exercise only the
        // password-comparison step the two entry states share, not the
        // token-minting tail — `check_valid_password` is what must behave
        // identically for "wrong password" and "no such password set".
        assert!(!user.check_valid_password("wrong password"));
        let mut unset = User::new(Some("nobody@example.com".to_string()), None, None).unwrap();
        unset.totp_secret = None;
        assert!(!unset.check_valid_password("anything"));
    }
}
