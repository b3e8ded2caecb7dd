//! UserInfo endpoint (§4.8 "UserInfo"): bearer access token carrying the
//! `openid` scope, claims consistent with the token's `sub`.

use serde::Serialize;

use crate::auth::Principal;
use crate::error::Error;

#[derive(Serialize)]
pub struct UserInfoClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

pub fn claims(principal: &Principal) -> Result<UserInfoClaims, Error> {
    if !principal.has_scope("openid") {
        return Err(Error::Forbidden("Access token was not issued with the openid scope".into(), "Forbidden".into()));
    }
    let user = principal.user();
    Ok(UserInfoClaims {
        sub: user.id.clone(),
        email: user.email.clone(),
        email_verified: user.email_verified,
        preferred_username: user.username.clone(),
    })
}
