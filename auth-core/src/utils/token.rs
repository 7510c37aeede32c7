//! Secure token generation and hashing.
//!
//! Every bearer secret this crate stores at rest (refresh tokens, single-use
//! tokens, MFA codes) goes through `hash_token` first; raw values only ever
//! travel back to the caller.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Size of raw secrets in bytes (256 bits of entropy).
pub const SECURE_TOKEN_BYTES: usize = 32;

/// Hash a token using SHA-256, returning lowercase hex.
///
/// Unsalted on purpose: inputs are 256-bit CSPRNG values, single-use or
/// short-lived. Never use this for user-chosen secrets; passwords go through
/// `utils::password`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a cryptographically secure opaque token.
///
/// 32 bytes from the operating system CSPRNG, URL-safe base64 without
/// padding (43 characters).
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; SECURE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a random numeric code of the given length for MFA delivery.
pub fn generate_numeric_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect()
}

/// Compare a raw token against a stored hash in constant time.
pub fn verify_token_hash(raw_token: &str, stored_hash: &str) -> bool {
    let candidate = hash_token(raw_token);
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_token("secret"), hash_token("secret"));
        assert_ne!(hash_token("secret"), hash_token("secret2"));
    }

    #[test]
    fn hash_is_hex_encoded() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn secure_token_shape() {
        let token = generate_secure_token();
        assert_eq!(token.len(), 43);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert!(URL_SAFE_NO_PAD.decode(&token).is_ok());
    }

    #[test]
    fn secure_tokens_are_unique() {
        assert_ne!(generate_secure_token(), generate_secure_token());
    }

    #[test]
    fn numeric_code_shape() {
        let code = generate_numeric_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn verify_matches_only_original() {
        let token = generate_secure_token();
        let hash = hash_token(&token);
        assert!(verify_token_hash(&token, &hash));
        assert!(!verify_token_hash("something-else", &hash));
    }
}
