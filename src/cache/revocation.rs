//! The Revocation entry side of the cache layer (§3 Revocation entry):
//! session ids and token jtis that have been explicitly revoked (logout,
//! replay detection, admin kill-switch) are held here until their natural
//! token expiry, so a check is a cheap cache lookup instead of a durable
//! query on every request. Also holds the per-principal consecutive-
//! failed-attempt lockout counters (§4.2 lockout policy).

use std::sync::LazyLock;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::CONFIG;

static BLACKLIST: LazyLock<TtlCache<String, ()>> =
    LazyLock::new(|| TtlCache::with_ttl(Duration::from_secs(CONFIG.refresh_token_ttl_secs().max(0) as u64)));

/// Marks a session/token id as revoked for (at most) the lifetime a token
/// referencing it could still be presented.
pub fn revoke(id: &str) {
    BLACKLIST.insert(id.to_string(), ());
}

pub fn is_revoked(id: &str) -> bool {
    BLACKLIST.contains(&id.to_string())
}

static LOCKOUT_COUNTERS: LazyLock<dashmap::DashMap<String, (u32, std::time::Instant)>> =
    LazyLock::new(dashmap::DashMap::new);

/// Records a failed authentication attempt for `principal_id`, returning
/// whether the principal has now crossed the lockout threshold. The window
/// resets on the first failure after it elapses.
pub fn record_failure(principal_id: &str) -> bool {
    let window = Duration::from_secs(CONFIG.lockout_window_secs());
    let threshold = CONFIG.lockout_threshold();

    let mut entry = LOCKOUT_COUNTERS.entry(principal_id.to_string()).or_insert((0, std::time::Instant::now()));
    if entry.1.elapsed() > window {
        *entry = (0, std::time::Instant::now());
    }
    entry.0 += 1;
    entry.0 >= threshold
}

/// Clears the failure counter on a successful authentication.
pub fn clear_failures(principal_id: &str) {
    LOCKOUT_COUNTERS.remove(principal_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoke_then_check() {
        revoke("session-test-1");
        assert!(is_revoked("session-test-1"));
        assert!(!is_revoked("session-test-unknown"));
    }
}
