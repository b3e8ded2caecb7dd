//! `/otp/*` routes (§6): the bare send/verify surface over the OTP engine,
//! independent of the `/auth/passwordless/*` flows in `auth.rs` — this pair
//! never mints a session, it only proves a destination's one-time code.

use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};

use crate::audit::AuditSink;
use crate::db::models::User;
use crate::db::DbConn;
use crate::error::{Error, JsonResult};
use crate::otp::{self, Purpose};

fn parse_purpose(type_: &str) -> Result<Purpose, Error> {
    match type_ {
        "registration" => Ok(Purpose::Registration),
        "login" => Ok(Purpose::Login),
        "verification" => Ok(Purpose::Verification),
        "password-reset" => Ok(Purpose::PasswordReset),
        "2fa-step-up" => Ok(Purpose::TwoFactorStepUp),
        _ => err!(InvalidRequest, "Unknown OTP type"),
    }
}

fn resolve_destination(email: Option<String>, phone: Option<String>) -> Result<String, Error> {
    match (email, phone) {
        (Some(email), None) => crate::util::normalize_email(&email),
        (None, Some(phone)) => Ok(phone.trim().to_string()),
        (Some(_), Some(_)) => err!(InvalidRequest, "Provide either email or phone, not both"),
        (None, None) => err!(InvalidRequest, "One of email or phone is required"),
    }
}

#[derive(Deserialize)]
struct SendData {
    email: Option<String>,
    phone: Option<String>,
    #[serde(rename = "type")]
    type_: String,
}

#[post("/otp/send", data = "<data>")]
async fn send(data: Json<SendData>, audit: &State<AuditSink>) -> JsonResult {
    let data = data.into_inner();
    let purpose = parse_purpose(&data.type_)?;
    let destination = resolve_destination(data.email, data.phone)?;
    otp::send(&destination, purpose, audit).await?;
    Ok(Json(serde_json::json!({"message": "Verification code sent"})))
}

#[derive(Serialize)]
struct OtpUserView {
    id: String,
    email: Option<String>,
    phone: Option<String>,
}

impl From<&User> for OtpUserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
        }
    }
}

#[derive(Deserialize)]
struct VerifyData {
    email: Option<String>,
    phone: Option<String>,
    code: String,
    #[serde(rename = "type")]
    type_: String,
}

#[post("/otp/verify", data = "<data>")]
async fn verify(data: Json<VerifyData>, conn: DbConn) -> JsonResult {
    let data = data.into_inner();
    let purpose = parse_purpose(&data.type_)?;
    let destination = resolve_destination(data.email.clone(), data.phone.clone())?;
    otp::verify(&destination, purpose, &data.code)?;

    let user = match (&data.email, &data.phone) {
        (Some(_), _) => User::find_by_email(&destination, &conn).await,
        (_, Some(_)) => User::find_by_phone(&destination, &conn).await,
        _ => None,
    };

    Ok(Json(serde_json::json!({
        "valid": true,
        "user": user.as_ref().map(OtpUserView::from),
    })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![send, verify]
}
