//
// Security headers fairing
//
use rocket::{
    fairing::{Fairing, Info, Kind},
    Request, Response,
};

/// Sends a small fixed set of hardening headers on every response. The full
/// HTTP routing/middleware chain is an external collaborator (spec §1
/// Non-goals); this fairing only covers the headers that are cheap and
/// uncontroversial to set unconditionally.
pub struct SecurityHeaders();

#[rocket::async_trait]
impl Fairing for SecurityHeaders {
    fn info(&self) -> Info {
        Info {
            name: "Security Headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_raw_header("X-Frame-Options", "DENY");
        res.set_raw_header("X-Content-Type-Options", "nosniff");
        res.set_raw_header("Referrer-Policy", "same-origin");
        if !res.headers().contains("cache-control") {
            res.set_raw_header("Cache-Control", "no-cache, no-store, max-age=0");
        }
    }
}

/// CORS fairing keyed off `cors_allowed_origins` (comma-separated), not a
/// single fixed domain — this crate is consumed by arbitrary registered
/// OAuth clients, not one bundled web vault. Grounded on the teacher's
/// `Cors` fairing (single-origin compare, preflight short-circuit).
pub struct Cors();

impl Cors {
    fn allowed_origin(origin: &str) -> bool {
        crate::CONFIG.cors_allowed_origins().split(',').map(str::trim).any(|allowed| allowed == origin)
    }
}

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "Cors",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        use rocket::http::{Header, Method, Status};

        let Some(origin) = req.headers().get_one("Origin") else {
            return;
        };
        if !Self::allowed_origin(origin) {
            return;
        }
        res.set_header(Header::new("Access-Control-Allow-Origin", origin.to_string()));
        res.set_header(Header::new("Vary", "Origin"));

        if req.method() == Method::Options {
            if let Some(h) = req.headers().get_one("Access-Control-Request-Headers") {
                res.set_header(Header::new("Access-Control-Allow-Headers", h.to_string()));
            }
            if let Some(m) = req.headers().get_one("Access-Control-Request-Method") {
                res.set_header(Header::new("Access-Control-Allow-Methods", m.to_string()));
            }
            res.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
            res.set_status(Status::Ok);
        }
    }
}

//
// File handling
//
use std::{
    fs::{self, File},
    io::{Read as _, Result as IOResult},
    path::Path,
};

pub fn file_exists(path: &str) -> bool {
    Path::new(path).exists()
}

pub fn read_file(path: &str) -> IOResult<Vec<u8>> {
    let mut contents: Vec<u8> = Vec::new();
    let mut file = File::open(Path::new(path))?;
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

pub fn read_file_string(path: &str) -> IOResult<String> {
    let mut contents = String::new();
    let mut file = File::open(Path::new(path))?;
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

//
// Identifiers
//
pub fn get_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

//
// String util methods
//
use std::str::FromStr;

pub fn try_parse_string<S, T>(string: Option<S>) -> Option<T>
where
    S: AsRef<str>,
    T: FromStr,
{
    if let Some(Ok(value)) = string.map(|s| s.as_ref().parse::<T>()) {
        Some(value)
    } else {
        None
    }
}

/// Lowercases and trims an email address for use as a lookup key, while
/// keeping the display form unchanged. Grounded on the `email_address`
/// dependency's validation (also used here to reject malformed input).
pub fn normalize_email(email: &str) -> Result<String, crate::error::Error> {
    let trimmed = email.trim();
    if email_address::EmailAddress::is_valid(trimmed) {
        Ok(trimmed.to_lowercase())
    } else {
        err!(InvalidRequest, "Invalid email address")
    }
}

/// Distinguishes a phone-shaped destination from an email one so OTP rate
/// limiting (§4.3) can track the two scopes separately. Anything that isn't
/// unambiguously a phone number is treated as email.
pub fn looks_like_phone(destination: &str) -> bool {
    let trimmed = destination.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

//
// Env methods
//
use std::env;

pub fn get_env_str_value(key: &str) -> Option<String> {
    let key_file = format!("{key}_FILE");
    let value_from_env = env::var(key);
    let value_file = env::var(&key_file);

    match (value_from_env, value_file) {
        (Ok(_), Ok(_)) => panic!("You should not define both {key} and {key_file}!"),
        (Ok(v_env), Err(_)) => Some(v_env),
        (Err(_), Ok(v_file)) => match fs::read_to_string(v_file) {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) => panic!("Failed to load {key}: {e:?}"),
        },
        _ => None,
    }
}

pub fn get_env<V>(key: &str) -> Option<V>
where
    V: FromStr,
{
    try_parse_string(get_env_str_value(key))
}

pub fn get_env_bool(key: &str) -> Option<bool> {
    const TRUE_VALUES: &[&str] = &["true", "t", "yes", "y", "1"];
    const FALSE_VALUES: &[&str] = &["false", "f", "no", "n", "0"];

    match get_env_str_value(key) {
        Some(val) if TRUE_VALUES.contains(&val.to_lowercase().as_ref()) => Some(true),
        Some(val) if FALSE_VALUES.contains(&val.to_lowercase().as_ref()) => Some(false),
        _ => None,
    }
}

//
// Retry helpers
//
use std::thread::sleep;
use std::time::Duration;

pub fn retry<F, T, E>(func: F, max_tries: u32) -> Result<T, E>
where
    F: Fn() -> Result<T, E>,
{
    let mut tries = 0;
    loop {
        match func() {
            ok @ Ok(_) => return ok,
            err @ Err(_) => {
                tries += 1;
                if tries >= max_tries {
                    return err;
                }
                sleep(Duration::from_millis(500));
            }
        }
    }
}

/// Sleeps for a small random duration drawn from the configured jitter
/// budget, so that sign-in responses for valid and invalid credentials take
/// a comparable amount of wall-clock time (spec §8 enumeration-resistance
/// invariant).
pub async fn jittered_delay(budget_ms: u64) {
    if budget_ms == 0 {
        return;
    }
    let extra = crypto::get_random(vec![0u8; 2]);
    let jitter = u16::from_be_bytes([extra[0], extra[1]]) as u64 % budget_ms;
    tokio::time::sleep(Duration::from_millis(jitter)).await;
}

use crate::crypto;
