//
// Error generator macro
//
macro_rules! make_error {
    ( $struct:ident; $( $name:ident ( $ty:ty, _): $status:expr, $show_cause:expr ),+ $(,)* ) => {
        #[derive(Debug)]
        #[allow(dead_code)]
        pub enum $struct {
            $($name( $ty, String )),+
        }
        $(impl From<$ty> for $struct {
            fn from(err: $ty) -> Self {
                $struct::$name(err, String::from(stringify!($name)))
            }
        })+
        $(impl From<($ty, String)> for $struct {
            fn from(err: ($ty, String)) -> Self {
                $struct::$name(err.0, err.1)
            }
        })+
        impl $struct {
            pub fn with_msg<M: Into<String>>(self, msg: M) -> Self {
                match self {$(
                   $struct::$name(e, _) => $struct::$name(e, msg.into()),
                )+}
            }

            pub fn status(&self) -> rocket::http::Status {
                match self {$(
                    $struct::$name(..) => $status,
                )+}
            }

            /// Logs the error (with its cause when `$show_cause` says so) and
            /// returns the message shown to the client.
            pub fn log_and_user_msg(&self) -> &str {
                match self {$(
                    $struct::$name(e, msg) => {
                        error!("{}: {}", msg, e);
                        if $show_cause {
                            error!("[CAUSE] {:?}", e);
                        }
                        msg
                    },
                )+}
            }
        }
    };
}

use diesel::result::Error as DieselError;
use rocket::http::Status;
use serde_json::{json, Error as SerError};

// Error kinds mirror spec.md §7. Each variant carries the causing error
// (used for logging) and a user-facing message (enumeration-safe, never
// leaks the cause).
make_error! {
    Error;
    InvalidRequest(String, _): Status::BadRequest, false,
    InvalidCredentials(String, _): Status::Unauthorized, false,
    AccountDisabled(String, _): Status::Forbidden, false,
    Unauthorized(String, _): Status::Unauthorized, false,
    Forbidden(String, _): Status::Forbidden, false,
    NotFound(String, _): Status::NotFound, false,
    Conflict(String, _): Status::Conflict, false,
    RateLimited(String, _): Status::TooManyRequests, false,
    Expired(String, _): Status::Gone, false,
    Revoked(String, _): Status::Unauthorized, false,
    OtpInvalid(String, _): Status::Unauthorized, false,
    TwoFactorRequired(String, _): Status::Unauthorized, false,
    TwoFactorInvalid(String, _): Status::Unauthorized, false,
    OAuthError(String, _): Status::BadRequest, false,
    UpstreamUnavailable(String, _): Status::ServiceUnavailable, true,
    Internal(String, _): Status::InternalServerError, true,
    DbError(DieselError, _): Status::InternalServerError, true,
    SerdeError(SerError, _): Status::InternalServerError, true,
    IoError(std::io::Error, _): Status::InternalServerError, true,
}

/// Result aliases used throughout the route and store layers.
pub type ApiResult<T> = Result<T, Error>;
pub type JsonResult = ApiResult<rocket::serde::json::Json<serde_json::Value>>;
pub type EmptyResult = ApiResult<()>;

impl Error {
    pub fn new<M: Into<String>>(usr_msg: M) -> Self {
        Error::InvalidRequest(usr_msg.into(), String::from("InvalidRequest"))
    }

    /// Error code used in OAuth JSON error bodies, per RFC 6749 §5.2. For
    /// `OAuthError` the stored message already *is* the RFC error code.
    pub fn oauth_code(&self) -> String {
        match self {
            Error::InvalidRequest(..) => "invalid_request".to_string(),
            Error::InvalidCredentials(..) | Error::Unauthorized(..) => "invalid_client".to_string(),
            Error::Forbidden(..) => "access_denied".to_string(),
            Error::Expired(..) | Error::Revoked(..) => "invalid_grant".to_string(),
            Error::OAuthError(code, _) => code.clone(),
            _ => "server_error".to_string(),
        }
    }
}

pub trait MapResult<S, E> {
    fn map_res(self, msg: &str) -> Result<S, E>;
}

impl<S> MapResult<S, Error> for Result<S, DieselError> {
    fn map_res(self, msg: &str) -> Result<S, Error> {
        self.map_err(Error::from).map_err(|e| e.with_msg(msg))
    }
}

impl<S> MapResult<S, Error> for Result<S, std::io::Error> {
    fn map_res(self, msg: &str) -> Result<S, Error> {
        self.map_err(Error::from).map_err(|e| e.with_msg(msg))
    }
}

impl<S> MapResult<S, Error> for Result<S, diesel::r2d2::Error> {
    fn map_res(self, msg: &str) -> Result<S, Error> {
        self.map_err(|e| Error::Internal(msg.to_string(), e.to_string()))
    }
}

//
// Rocket responder impl
//
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let kind = self.kind_name();
        let msg = self.log_and_user_msg().to_string();

        let body = json!({
            "error": kind,
            "error_description": msg,
        });

        Response::build_from(Json(body).respond_to(req)?).status(status).ok()
    }
}

impl Error {
    fn kind_name(&self) -> &'static str {
        match self {
            Error::InvalidRequest(..) => "invalid_request",
            Error::InvalidCredentials(..) => "invalid_credentials",
            Error::AccountDisabled(..) => "account_disabled",
            Error::Unauthorized(..) => "unauthorized",
            Error::Forbidden(..) => "forbidden",
            Error::NotFound(..) => "not_found",
            Error::Conflict(..) => "conflict",
            Error::RateLimited(..) => "rate_limited",
            Error::Expired(..) => "expired",
            Error::Revoked(..) => "revoked",
            Error::OtpInvalid(..) => "otp_invalid",
            Error::TwoFactorRequired(..) => "two_factor_required",
            Error::TwoFactorInvalid(..) => "two_factor_invalid",
            Error::OAuthError(..) => "oauth_error",
            Error::UpstreamUnavailable(..) => "upstream_unavailable",
            Error::Internal(..) => "internal",
            Error::DbError(..) => "internal",
            Error::SerdeError(..) => "internal",
            Error::IoError(..) => "internal",
        }
    }
}

///
/// Error return macros
///
#[macro_export]
macro_rules! err {
    ($kind:ident, $msg:expr) => {{
        return Err($crate::error::Error::$kind($msg.into(), stringify!($kind).into()));
    }};
}

#[macro_export]
macro_rules! err_code {
    ($msg:expr, 429) => {{
        return Err($crate::error::Error::RateLimited($msg.into(), "RateLimited".into()));
    }};
    ($msg:expr, 401) => {{
        return Err($crate::error::Error::Unauthorized($msg.into(), "Unauthorized".into()));
    }};
}

/// Logs and swallows an error instead of propagating it — used on
/// best-effort paths (audit enqueue, cache eviction sweep) where failure
/// must never block the caller.
#[macro_export]
macro_rules! err_silent {
    ($msg:expr) => {{
        error!("{}", $msg);
    }};
}
