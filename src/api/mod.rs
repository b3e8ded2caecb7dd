mod api_keys;
mod auth;
mod oauth;
mod otp;
mod two_factor;

use rocket::Route;

pub use crate::error::{ApiResult, EmptyResult, JsonResult};

pub fn routes() -> Vec<Route> {
    [auth::routes(), otp::routes(), api_keys::routes(), oauth::routes(), two_factor::routes()].concat()
}
