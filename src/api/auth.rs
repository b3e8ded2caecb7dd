//! `/auth/*` routes (§6): thin Rocket handlers over the orchestrator state
//! machines. Grounded on the teacher's `src/api/identity.rs` login route
//! (`Form<ConnectData>`, `ClientIp`, `DbConn` guards, `JsonResult` return),
//! generalized from one Bitwarden-specific grant shape to the seven flows
//! §4.6 names.

use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::{Deserialize, Serialize};

use crate::audit::AuditSink;
use crate::auth::{ClientIp, Principal};
use crate::db::models::User;
use crate::db::DbConn;
use crate::error::{EmptyResult, JsonResult};
use crate::orchestrator::{self, TokenPair};

/// Narrow, non-leaking view of a user — deliberately omits
/// `security_stamp`, `failed_login_count`, `password_hash`, and
/// `invalidated_before`, which are internal bookkeeping rather than part of
/// the account's public shape.
#[derive(Serialize)]
struct UserView {
    id: String,
    email: Option<String>,
    email_verified: bool,
    phone: Option<String>,
    phone_verified: bool,
    username: Option<String>,
    full_name: Option<String>,
    roles: Vec<String>,
    totp_enabled: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
            phone: user.phone.clone(),
            phone_verified: user.phone_verified,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            roles: user.role_list().into_iter().map(String::from).collect(),
            totp_enabled: user.totp_enabled,
        }
    }
}

fn token_pair_response(tokens: TokenPair, user: &User) -> serde_json::Value {
    serde_json::json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "expires_in": tokens.expires_in,
        "user": UserView::from(user),
    })
}

#[derive(Deserialize)]
struct SignupData {
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
    full_name: Option<String>,
    device_name: Option<String>,
}

#[post("/auth/signup", data = "<data>")]
async fn signup(data: Json<SignupData>, ip: ClientIp, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let data = data.into_inner();
    let (user, tokens) =
        orchestrator::sign_up(data.email, data.username, data.password, data.full_name, data.device_name, &ip, &conn, audit).await?;
    Ok(Json(token_pair_response(tokens, &user)))
}

#[get("/auth/profile")]
fn profile(principal: Principal) -> Json<UserView> {
    Json(UserView::from(principal.user()))
}

#[derive(Deserialize)]
struct SigninData {
    identifier: String,
    password: String,
    device_name: Option<String>,
}

#[post("/auth/signin", data = "<data>")]
async fn signin(data: Json<SigninData>, ip: ClientIp, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let data = data.into_inner();
    match orchestrator::password_sign_in(data.identifier, data.password, data.device_name, &ip, &conn, audit).await? {
        orchestrator::SignInOutcome::SessionOpened(user, tokens) => Ok(Json(token_pair_response(tokens, &user))),
        orchestrator::SignInOutcome::Requires2FA {
            ticket,
        } => Ok(Json(serde_json::json!({"requires_2fa": true, "two_factor_token": ticket}))),
    }
}

#[derive(Deserialize)]
struct TwoFactorVerifyData {
    two_factor_token: String,
    code: String,
    device_name: Option<String>,
}

#[post("/auth/2fa/login/verify", data = "<data>")]
async fn two_factor_verify(data: Json<TwoFactorVerifyData>, ip: ClientIp, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let data = data.into_inner();
    let (user, tokens) = orchestrator::two_factor_step_up(data.two_factor_token, data.code, data.device_name, &ip, &conn, audit).await?;
    Ok(Json(token_pair_response(tokens, &user)))
}

#[derive(Deserialize)]
struct RefreshData {
    refresh_token: String,
}

#[post("/auth/refresh", data = "<data>")]
async fn refresh(data: Json<RefreshData>, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let tokens = orchestrator::refresh(data.into_inner().refresh_token, &conn, audit).await?;
    Ok(Json(serde_json::json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "expires_in": tokens.expires_in,
    })))
}

#[derive(Deserialize, Default)]
struct LogoutData {
    refresh_token: Option<String>,
}

#[post("/auth/logout", data = "<data>")]
async fn logout(data: Option<Json<LogoutData>>, principal: Principal, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let Principal::User {
        session_id, ..
    } = &principal
    else {
        err!(Forbidden, "API keys have no session to log out of")
    };
    let refresh_token = data.map(|d| d.into_inner()).unwrap_or_default().refresh_token;
    orchestrator::logout(session_id, refresh_token, &conn, audit).await?;
    Ok(Json(serde_json::json!({"message": "Logged out"})))
}

#[derive(Deserialize)]
struct ChangePasswordData {
    current_password: String,
    new_password: String,
}

#[post("/auth/password/change", data = "<data>")]
async fn change_password(data: Json<ChangePasswordData>, principal: Principal, conn: DbConn, audit: &State<AuditSink>) -> EmptyResult {
    let Principal::User {
        session_id, mut user, ..
    } = principal
    else {
        err!(Forbidden, "API keys cannot change a password")
    };
    let data = data.into_inner();
    orchestrator::change_password(&mut user, &data.current_password, &data.new_password, &session_id, &conn, audit).await
}

#[derive(Deserialize)]
struct ResetPasswordData {
    identifier: String,
    code: String,
    new_password: String,
}

#[post("/auth/password/reset", data = "<data>")]
async fn reset_password(data: Json<ResetPasswordData>, conn: DbConn, audit: &State<AuditSink>) -> EmptyResult {
    let data = data.into_inner();
    orchestrator::reset_password(data.identifier, data.code, data.new_password, &conn, audit).await
}

#[derive(Deserialize)]
struct PasswordlessRequestData {
    destination: String,
}

#[post("/auth/passwordless/request", data = "<data>")]
async fn passwordless_request(data: Json<PasswordlessRequestData>, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    orchestrator::request_passwordless(data.into_inner().destination, &conn, audit).await?;
    Ok(Json(serde_json::json!({"message": "If that identifier has an account, a code has been sent"})))
}

#[derive(Deserialize)]
struct PasswordlessVerifyData {
    destination: String,
    code: String,
    device_name: Option<String>,
}

#[post("/auth/passwordless/verify", data = "<data>")]
async fn passwordless_verify(data: Json<PasswordlessVerifyData>, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let data = data.into_inner();
    let (user, tokens) = orchestrator::verify_passwordless(data.destination, data.code, data.device_name, &conn, audit).await?;
    Ok(Json(token_pair_response(tokens, &user)))
}

pub fn routes() -> Vec<Route> {
    routes![
        signup,
        profile,
        signin,
        two_factor_verify,
        refresh,
        logout,
        change_password,
        reset_password,
        passwordless_request,
        passwordless_verify,
    ]
}
