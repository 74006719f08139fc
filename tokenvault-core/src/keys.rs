//! Secret key material helpers.

use rand::{rngs::OsRng, RngCore};
use secrecy::SecretBox;
use zeroize::Zeroize;

use crate::error::{TokenVaultError, TokenVaultResult};

/// 32-byte key held in zeroizing secret storage.
pub type SecretKey = SecretBox<[u8; 32]>;

/// Generates a fresh random key.
#[must_use]
pub fn random_key() -> SecretKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    let secret = SecretBox::new(Box::new(key));
    key.zeroize();
    secret
}

/// Parses a hex-encoded 32-byte key (optionally `0x`-prefixed).
///
/// # Errors
///
/// Returns [`TokenVaultError::Config`] if the input is not hex or not 32 bytes.
pub fn key_from_hex(hex_key: &str, label: &str) -> TokenVaultResult<SecretKey> {
    let trimmed = hex_key.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let mut bytes = hex::decode(digits)
        .map_err(|err| TokenVaultError::Config(format!("{label} is not valid hex: {err}")))?;
    let key = parse_key_32(&bytes, label);
    bytes.zeroize();
    key
}

fn parse_key_32(bytes: &[u8], label: &str) -> TokenVaultResult<SecretKey> {
    if bytes.len() != 32 {
        return Err(TokenVaultError::Config(format!(
            "{label} length mismatch: expected 32, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    let secret = SecretBox::new(Box::new(out));
    out.zeroize();
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_key_from_hex_accepts_prefix() {
        let hex_key = format!("0x{}", "ab".repeat(32));
        let key = key_from_hex(&hex_key, "replica key").expect("parse");
        assert_eq!(key.expose_secret(), &[0xab; 32]);
    }

    #[test]
    fn test_key_from_hex_rejects_short_key() {
        match key_from_hex("abcd", "token key") {
            Err(TokenVaultError::Config(message)) => {
                assert!(message.contains("token key length mismatch"));
            }
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_random_keys_differ() {
        assert_ne!(random_key().expose_secret(), random_key().expose_secret());
    }
}
