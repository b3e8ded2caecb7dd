//! `/2fa/*` routes (§4.5, §6): TOTP enrollment and disablement for an
//! already-authenticated principal — distinct from `/auth/2fa/login/verify`
//! in `auth.rs`, which steps up an in-progress sign-in rather than managing
//! a live account's 2FA material.

use rocket::serde::json::Json;
use rocket::Route;
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::db::DbConn;
use crate::error::{EmptyResult, JsonResult};
use crate::two_factor;

#[derive(Serialize)]
struct EnrollmentView {
    secret_base32: String,
    provisioning_uri: String,
    backup_codes: Vec<String>,
}

#[post("/2fa/enroll")]
fn enroll(principal: Principal) -> JsonResult {
    let user = principal.user();
    let account_label = user.email.clone().or_else(|| user.username.clone()).or_else(|| user.phone.clone()).unwrap_or_else(|| user.id.clone());
    let enrollment = two_factor::begin_enrollment(&user.id, &account_label);
    Ok(Json(serde_json::json!(EnrollmentView {
        secret_base32: enrollment.secret_base32,
        provisioning_uri: enrollment.provisioning_uri,
        backup_codes: enrollment.backup_codes,
    })))
}

#[derive(Deserialize)]
struct EnrollVerifyData {
    code: String,
}

#[post("/2fa/enroll/verify", data = "<data>")]
async fn enroll_verify(data: Json<EnrollVerifyData>, principal: Principal, conn: DbConn) -> EmptyResult {
    let Principal::User {
        mut user, ..
    } = principal
    else {
        err!(Forbidden, "API keys cannot enroll two-factor")
    };
    two_factor::complete_enrollment(&mut user, &data.into_inner().code)?;
    user.save(&conn).await
}

#[derive(Deserialize)]
struct DisableData {
    current_password: String,
    code: String,
}

#[post("/2fa/disable", data = "<data>")]
async fn disable(data: Json<DisableData>, principal: Principal, conn: DbConn) -> EmptyResult {
    let Principal::User {
        mut user, ..
    } = principal
    else {
        err!(Forbidden, "API keys cannot disable two-factor")
    };
    let data = data.into_inner();
    two_factor::disable(&mut user, &data.current_password, &data.code)?;
    user.save(&conn).await
}

pub fn routes() -> Vec<Route> {
    routes![enroll, enroll_verify, disable]
}
