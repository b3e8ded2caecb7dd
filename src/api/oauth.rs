//! `/oauth/*` + discovery routes (§4.8, §6): thin Rocket handlers over the
//! `oauth::*` module family. Grounded on the teacher's `src/api/identity.rs`
//! connect-router (one route dispatching by `grant_type` form field onto
//! several grant handlers), generalized to the four grants this spec names.

use rocket::form::Form;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{Route, State};
use serde::Deserialize;

use crate::audit::AuditSink;
use crate::auth::Principal;
use crate::db::DbConn;
use crate::error::{Error, JsonResult};
use crate::oauth::{authorize, client, device_flow, discovery, introspect, revoke, token, userinfo};

#[derive(Responder)]
enum AuthorizeResponse {
    Redirect(Redirect),
    Pending(Json<serde_json::Value>),
}

#[allow(clippy::too_many_arguments)]
#[get("/oauth/authorize?<response_type>&<client_id>&<redirect_uri>&<scope>&<state>&<nonce>&<code_challenge>&<code_challenge_method>")]
async fn authorize_get(
    response_type: String,
    client_id: String,
    redirect_uri: String,
    scope: Option<String>,
    state: Option<String>,
    nonce: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    principal: Option<Principal>,
    conn: DbConn,
) -> Result<AuthorizeResponse, Error> {
    let req = authorize::AuthorizeRequest {
        response_type,
        client_id,
        redirect_uri,
        scope: scope.unwrap_or_default().split(' ').filter(|s| !s.is_empty()).map(String::from).collect(),
        state,
        nonce,
        code_challenge,
        code_challenge_method,
    };
    let user = principal.as_ref().map(Principal::user);

    let outcome = authorize::authorize(req, user, &conn).await?;
    Ok(match outcome {
        authorize::AuthorizeOutcome::Redirect(url) => AuthorizeResponse::Redirect(Redirect::to(url)),
        authorize::AuthorizeOutcome::RequiresLogin => AuthorizeResponse::Pending(Json(serde_json::json!({"requires_login": true}))),
        authorize::AuthorizeOutcome::RequiresConsent {
            client_name,
            scope,
        } => AuthorizeResponse::Pending(Json(serde_json::json!({"requires_consent": true, "client_name": client_name, "scope": scope}))),
    })
}

#[derive(Deserialize)]
struct ConsentData {
    client_id: String,
    scope: Vec<String>,
}

#[post("/oauth/consent", data = "<data>")]
async fn consent(data: Json<ConsentData>, principal: Principal, conn: DbConn) -> crate::error::EmptyResult {
    let data = data.into_inner();
    authorize::record_consent(&principal.user().id, &data.client_id, &data.scope, &conn).await
}

#[derive(FromForm)]
struct TokenForm {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
    scope: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[post("/oauth/token", data = "<form>")]
async fn token_endpoint(form: Form<TokenForm>, request: &rocket::Request<'_>, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let form = form.into_inner();
    let req = token::TokenRequest {
        grant_type: form.grant_type,
        code: form.code,
        redirect_uri: form.redirect_uri,
        code_verifier: form.code_verifier,
        refresh_token: form.refresh_token,
        scope: form.scope,
        client_id: form.client_id,
        client_secret: form.client_secret,
    };
    let tokens = token::token(req, request, &conn, audit).await?;
    Ok(Json(serde_json::to_value(tokens).unwrap_or_default()))
}

#[derive(FromForm)]
struct DeviceCodeForm {
    client_id: String,
    scope: Option<String>,
}

#[post("/oauth/device/code", data = "<form>")]
async fn device_code(form: Form<DeviceCodeForm>, conn: DbConn) -> JsonResult {
    let form = form.into_inner();
    let scope = form.scope.unwrap_or_default().split(' ').filter(|s| !s.is_empty()).map(String::from).collect();
    let started = device_flow::begin(&form.client_id, scope, &conn).await?;
    Ok(Json(serde_json::to_value(started).unwrap_or_default()))
}

#[derive(FromForm)]
struct DeviceTokenForm {
    grant_type: String,
    device_code: String,
    client_id: String,
    client_secret: Option<String>,
}

/// Dedicated device-polling endpoint (§6), distinct from the generic
/// `/oauth/token` route even though both ultimately dispatch into
/// `device_flow::poll` — clients implementing RFC 8628 expect this path.
#[post("/oauth/device/token", data = "<form>")]
async fn device_token(form: Form<DeviceTokenForm>, conn: DbConn, audit: &State<AuditSink>) -> JsonResult {
    let form = form.into_inner();
    if form.grant_type != "urn:ietf:params:oauth:grant-type:device_code" {
        err!(InvalidRequest, "Unsupported grant_type for this endpoint")
    }
    let presented = client::PresentedCredentials {
        client_id: form.client_id,
        client_secret: form.client_secret,
    };
    let tokens = device_flow::poll(form.device_code, presented, &conn, audit).await?;
    Ok(Json(serde_json::to_value(tokens).unwrap_or_default()))
}

#[derive(Deserialize)]
struct DeviceVerifyData {
    user_code: String,
    approve: bool,
}

#[post("/oauth/device/verify", data = "<data>")]
async fn device_verify(data: Json<DeviceVerifyData>, principal: Principal) -> crate::error::EmptyResult {
    let data = data.into_inner();
    if data.approve {
        device_flow::approve(&data.user_code, &principal.user().id)
    } else {
        device_flow::deny(&data.user_code)
    }
}

#[derive(FromForm)]
struct IntrospectForm {
    token: String,
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[post("/oauth/introspect", data = "<form>")]
async fn introspect_endpoint(form: Form<IntrospectForm>, conn: DbConn) -> JsonResult {
    let form = form.into_inner();
    let presented = client::PresentedCredentials {
        client_id: form.client_id.unwrap_or_default(),
        client_secret: form.client_secret,
    };
    let resp = introspect::introspect(&form.token, form.token_type_hint.as_deref(), &presented, &conn).await?;
    Ok(Json(serde_json::to_value(resp).unwrap_or_default()))
}

#[derive(FromForm)]
struct RevokeForm {
    token: String,
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[post("/oauth/revoke", data = "<form>")]
async fn revoke_endpoint(form: Form<RevokeForm>, conn: DbConn) -> crate::error::EmptyResult {
    let form = form.into_inner();
    let presented = client::PresentedCredentials {
        client_id: form.client_id.unwrap_or_default(),
        client_secret: form.client_secret,
    };
    revoke::revoke(&form.token, form.token_type_hint.as_deref(), &presented, &conn).await
}

#[get("/oauth/userinfo")]
fn userinfo_endpoint(principal: Principal) -> JsonResult {
    let claims = userinfo::claims(&principal)?;
    Ok(Json(serde_json::to_value(claims).unwrap_or_default()))
}

#[get("/.well-known/openid-configuration")]
fn openid_configuration() -> Json<serde_json::Value> {
    Json(discovery::openid_configuration())
}

#[get("/.well-known/jwks.json")]
fn jwks() -> Json<serde_json::Value> {
    Json(discovery::jwks())
}

pub fn routes() -> Vec<Route> {
    routes![
        authorize_get,
        consent,
        token_endpoint,
        device_code,
        device_token,
        device_verify,
        introspect_endpoint,
        revoke_endpoint,
        userinfo_endpoint,
        openid_configuration,
        jwks,
    ]
}
