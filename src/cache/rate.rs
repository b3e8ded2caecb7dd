//! Rate counters for every scope §4.3/§6.2 names: login-ip, signup-ip,
//! otp-phone, otp-email, api-per-user. Grounded on the teacher's
//! `src/ratelimit.rs` (`governor`-keyed limiter behind a `Lazy` static);
//! generalized from two fixed limiters (login, admin) to one limiter per
//! scope, keyed generically instead of hardcoding `IpAddr`.

use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::LazyLock;
use std::time::Duration;

use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};

use crate::error::Error;
use crate::CONFIG;

type Limiter<K> = RateLimiter<K, DashMapStateStore<K>, DefaultClock>;

fn build<K: Hash + Eq + Clone>(window: Duration, max: u32) -> Limiter<K> {
    let burst = NonZeroU32::new(max).expect("rate limit max must be non-zero");
    RateLimiter::keyed(Quota::with_period(window).expect("rate limit window must be non-zero").allow_burst(burst))
}

static LOGIN: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(CONFIG.rate_login_window_secs()), CONFIG.rate_login_max()));
static SIGNUP: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(CONFIG.rate_signup_window_secs()), CONFIG.rate_signup_max()));
static API: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(CONFIG.rate_api_window_secs()), CONFIG.rate_api_max()));

/// §4.3: OTP caps are three simultaneous tiers per destination (a short
/// burst window, an hourly cap, a daily cap), tracked separately for phone
/// and email so a flood against one channel can't exhaust the other.
static OTP_PHONE_BURST: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(CONFIG.rate_otp_phone_window_secs()), CONFIG.rate_otp_phone_max()));
static OTP_PHONE_HOURLY: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(3600), CONFIG.rate_otp_phone_hourly_max()));
static OTP_PHONE_DAILY: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(86_400), CONFIG.rate_otp_phone_daily_max()));
static OTP_EMAIL_BURST: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(CONFIG.rate_otp_email_window_secs()), CONFIG.rate_otp_email_max()));
static OTP_EMAIL_HOURLY: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(3600), CONFIG.rate_otp_email_hourly_max()));
static OTP_EMAIL_DAILY: LazyLock<Limiter<String>> =
    LazyLock::new(|| build(Duration::from_secs(86_400), CONFIG.rate_otp_email_daily_max()));

fn check(limiter: &Limiter<String>, key: &str, scope: &str) -> Result<(), Error> {
    match limiter.check_key(&key.to_string()) {
        Ok(_) => Ok(()),
        Err(_) => err_code!(format!("Too many requests ({scope})"), 429),
    }
}

/// Keyed by source IP.
pub fn check_login(ip: &str) -> Result<(), Error> {
    check(&LOGIN, ip, "login")
}

/// Keyed by source IP.
pub fn check_signup(ip: &str) -> Result<(), Error> {
    check(&SIGNUP, ip, "signup")
}

/// Keyed by `purpose:destination` (e.g. `login:+15555550123`,
/// `password-reset:user@example.com`). Applies all three tiers for the
/// destination's channel (phone or email); the first exhausted tier wins.
pub fn check_otp(key: &str, is_phone: bool) -> Result<(), Error> {
    if is_phone {
        check(&OTP_PHONE_BURST, key, "otp")?;
        check(&OTP_PHONE_HOURLY, key, "otp")?;
        check(&OTP_PHONE_DAILY, key, "otp")
    } else {
        check(&OTP_EMAIL_BURST, key, "otp")?;
        check(&OTP_EMAIL_HOURLY, key, "otp")?;
        check(&OTP_EMAIL_DAILY, key, "otp")
    }
}

/// Keyed by principal id.
pub fn check_api(principal_id: &str) -> Result<(), Error> {
    check(&API, principal_id, "api")
}
