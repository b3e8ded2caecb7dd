//! OTP/notification delivery seam (§4.4.1, added). Email/SMS/SMTP
//! backends are an external collaborator, not part of this core, but the
//! core still owns the seam it dispatches through. Grounded on the
//! teacher's `src/mail.rs` free-function send_* API (`send_token`,
//! `send_new_device_logged_in`, ...), generalized into a trait so a real
//! backend can be swapped in without touching the orchestrator/OTP engine
//! call sites.

use std::sync::LazyLock;

use crate::error::EmptyResult;
use crate::CONFIG;

#[rocket::async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> EmptyResult;
    async fn send_sms(&self, to: &str, body: &str) -> EmptyResult;
}

/// Default backend: logs the message and returns success. Matches the
/// "pluggable renderer, no-op default" shape the teacher uses for its
/// template engine selection in `src/mail.rs`'s `get_text_body` path.
pub struct LoggingBackend;

#[rocket::async_trait]
impl DeliveryBackend for LoggingBackend {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> EmptyResult {
        if !CONFIG.mail_enabled() {
            info!("mail disabled, not sending to {to}: {subject}");
            return Ok(());
        }
        info!("[delivery:email] to={to} subject={subject:?} body={body:?}");
        Ok(())
    }

    async fn send_sms(&self, to: &str, body: &str) -> EmptyResult {
        info!("[delivery:sms] to={to} body={body:?}");
        Ok(())
    }
}

static BACKEND: LazyLock<LoggingBackend> = LazyLock::new(|| LoggingBackend);

pub fn backend() -> &'static dyn DeliveryBackend {
    &*BACKEND
}

/// Sends a one-time code to an email or phone destination, dispatching on
/// whichever the caller resolved `destination` to mean. Best-effort: the
/// caller (the OTP engine) logs and swallows failures here, per §7's
/// propagation policy that a delivery failure must never fail the
/// primary auth decision.
pub async fn send_otp_code(destination: &str, code: &str) -> EmptyResult {
    if destination.contains('@') {
        backend().send_email(destination, "Your verification code", &format!("Your code is {code}")).await
    } else {
        backend().send_sms(destination, &format!("Your verification code is {code}")).await
    }
}
