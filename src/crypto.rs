//
// Password hashing (argon2id)
//
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};

use crate::error::Error;

/// Cost parameters for argon2id, loaded from the `password` config group
/// (memory in KiB, iterations, parallelism). OWASP-recommended defaults.
#[derive(Debug, Clone, Copy)]
pub struct PasswordCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

fn argon2_for(cost: PasswordCost) -> Result<Argon2<'static>, Error> {
    let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
        .map_err(|e| Error::Internal(e.to_string(), "Argon2Params".into()))?;
    Ok(Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params))
}

/// Hashes a password into a self-describing PHC string (includes salt and
/// cost parameters), ready to persist as-is.
pub fn hash_password(secret: &[u8], cost: PasswordCost) -> Result<String, Error> {
    let argon2 = argon2_for(cost)?;
    let salt = SaltString::generate(&mut rand::rng());
    let hash = argon2
        .hash_password(secret, &salt)
        .map_err(|e| Error::Internal(e.to_string(), "Argon2Hash".into()))?;
    Ok(hash.to_string())
}

/// Verifies `secret` against a previously stored PHC hash string.
pub fn verify_password_hash(secret: &[u8], phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default().verify_password(secret, &parsed).is_ok()
}

/// Runs the argon2 hash computation against a fixed dummy hash so sign-in
/// attempts against a nonexistent user take roughly the same time as a real
/// password check (enumeration resistance, spec §8 timing invariant).
pub fn verify_dummy_password_hash(secret: &[u8]) {
    const DUMMY_PHC: &str =
        "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$TLyNb/RLvAMsQ9gMYePi4WMs5ZBkFvJkJvV8rcXJ7Uo";
    let _ = verify_password_hash(secret, DUMMY_PHC);
}

//
// HMAC
//
pub fn hmac_sign(key: &[u8], data: &[u8]) -> Vec<u8> {
    use ring::hmac;

    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

pub fn hmac_verify(key: &[u8], data: &[u8], signature: &[u8]) -> bool {
    use ring::hmac;

    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, data, signature).is_ok()
}

//
// Hashing (for opaque refresh tokens, API keys, OTP/backup codes — only the
// hash is ever persisted)
//
pub fn sha256_hex(data: &[u8]) -> String {
    use data_encoding::HEXLOWER;
    use ring::digest;

    HEXLOWER.encode(digest::digest(&digest::SHA256, data).as_ref())
}

//
// Random values
//
pub fn get_random(mut array: Vec<u8>) -> Vec<u8> {
    use ring::rand::{SecureRandom, SystemRandom};

    SystemRandom::new().fill(&mut array).expect("Error generating random values");
    array
}

/// 256 bits of randomness, base64url-encoded without padding — used for
/// opaque refresh tokens and API keys.
pub fn generate_opaque_token() -> String {
    data_encoding::BASE64URL_NOPAD.encode(&get_random(vec![0u8; 32]))
}

/// A numeric one-time code of `digits` digits (e.g. the 6-digit OTP/TOTP
/// codes), zero-padded.
pub fn generate_numeric_code(digits: u32) -> Result<String, Error> {
    if digits == 0 || digits > 19 {
        err!(Internal, "Invalid OTP code length")
    }

    let bytes = get_random(vec![0; 8]);
    let mut bytes_array = [0u8; 8];
    bytes_array.copy_from_slice(&bytes);

    let number = u64::from_be_bytes(bytes_array) % 10u64.pow(digits);
    Ok(format!("{number:0width$}", width = digits as usize))
}

//
// Constant time compare
//
pub fn ct_eq<T: AsRef<[u8]>, U: AsRef<[u8]>>(a: T, b: U) -> bool {
    use ring::constant_time::verify_slices_are_equal;

    verify_slices_are_equal(a.as_ref(), b.as_ref()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trips() {
        let cost = PasswordCost::default();
        let hash = hash_password(b"correct horse battery staple", cost).unwrap();
        assert!(verify_password_hash(b"correct horse battery staple", &hash));
        assert!(!verify_password_hash(b"wrong password", &hash));
    }

    #[test]
    fn ct_eq_detects_mismatch() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
    }

    #[test]
    fn numeric_code_has_requested_width() {
        let code = generate_numeric_code(6).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
