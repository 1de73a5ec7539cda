//! Session cipher
//!
//! Password-based authenticated encryption of an opaque string into a
//! single portable token.
//!
//! Token layout (before base64):
//!
//! ```text
//! +-----------------+-----------+------------+--------------------+
//! | iterations (5B) | salt (16) | nonce (12) | ciphertext || tag  |
//! | ASCII decimal   |           |            |                    |
//! +-----------------+-----------+------------+--------------------+
//! ```
//!
//! The key is PBKDF2-HMAC-SHA256(password, salt, iterations), 32 bytes,
//! used with AES-256-GCM. The iteration field is five ASCII digits, so the
//! count is capped at 99999; changing the field width would break every
//! outstanding token.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AppError;

/// Default PBKDF2 rounds for new tokens
pub const DEFAULT_ITERATIONS: u32 = 10_000;
/// Largest count the five digit field can carry
pub const MAX_ITERATIONS: u32 = 99_999;

const ITERATIONS_BYTES: usize = 5;
const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;
const TAG_BYTES: usize = 16;
const AES_256_KEY_BYTES: usize = 32;
const HEADER_BYTES: usize = ITERATIONS_BYTES + SALT_BYTES + NONCE_BYTES;

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; AES_256_KEY_BYTES] {
    let mut key = [0_u8; AES_256_KEY_BYTES];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Encrypt `plaintext` under a key derived from `password`.
///
/// # Errors
/// Returns `Encryption` if `iterations` is outside `1..=99999`
pub fn encrypt(plaintext: &str, password: &str, iterations: u32) -> Result<String, AppError> {
    if iterations == 0 || iterations > MAX_ITERATIONS {
        return Err(AppError::Encryption(format!(
            "iteration count must be between 1 and {MAX_ITERATIONS}"
        )));
    }

    let mut salt = [0_u8; SALT_BYTES];
    let mut nonce = [0_u8; NONCE_BYTES];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| {
        AppError::Encryption(format!(
            "invalid session key length (expected {} bytes)",
            AES_256_KEY_BYTES
        ))
    })?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| AppError::Encryption("session encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_BYTES + ciphertext.len());
    out.extend_from_slice(format!("{iterations:05}").as_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);

    Ok(BASE64_STANDARD.encode(out))
}

/// Decrypt a token produced by [`encrypt`].
///
/// # Errors
/// Returns `Authentication` for any token that is malformed, was tampered
/// with, or was sealed under a different password
pub fn decrypt(token: &str, password: &str) -> Result<String, AppError> {
    let data = BASE64_STANDARD
        .decode(token.trim())
        .map_err(|_| AppError::Authentication)?;
    if data.len() < HEADER_BYTES + TAG_BYTES {
        return Err(AppError::Authentication);
    }

    let (iterations, rest) = data.split_at(ITERATIONS_BYTES);
    let (salt, rest) = rest.split_at(SALT_BYTES);
    let (nonce, ciphertext) = rest.split_at(NONCE_BYTES);

    let iterations = parse_iterations(iterations).ok_or(AppError::Authentication)?;
    let key = derive_key(password, salt, iterations);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| {
        AppError::Encryption(format!(
            "invalid session key length (expected {} bytes)",
            AES_256_KEY_BYTES
        ))
    })?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AppError::Authentication)?;

    String::from_utf8(plaintext).map_err(|_| AppError::Authentication)
}

fn parse_iterations(field: &[u8]) -> Option<u32> {
    if !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let iterations: u32 = std::str::from_utf8(field).ok()?.parse().ok()?;
    (iterations > 0).then_some(iterations)
}
