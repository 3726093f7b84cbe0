use rama::error::OpaqueError;
use sha1::{Digest as _, Sha1};

pub const CHAP_SHA1: &str = "chap-sha1";

pub const SCRAMBLE_SIZE: usize = 20;

/// Computes the `chap-sha1` scramble proving knowledge of `password`
/// for the salt the server sent in its greeting.
///
/// ```text
/// hash1    = sha1(password)
/// hash2    = sha1(hash1)
/// scramble = hash1 XOR sha1(salt[..20] ++ hash2)
/// ```
pub fn scramble(salt: &[u8], password: &str) -> Result<[u8; SCRAMBLE_SIZE], OpaqueError> {
    let salt = salt.get(..SCRAMBLE_SIZE).ok_or_else(|| {
        OpaqueError::from_display(format!(
            "greeting salt of {} bytes is too short for {CHAP_SHA1}",
            salt.len()
        ))
    })?;

    let hash1 = Sha1::digest(password.as_bytes());
    let hash2 = Sha1::digest(hash1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(hash2);
    let salted = hasher.finalize();

    let mut scramble = [0u8; SCRAMBLE_SIZE];
    for (out, (a, b)) in scramble.iter_mut().zip(hash1.iter().zip(salted.iter())) {
        *out = a ^ b;
    }
    Ok(scramble)
}
