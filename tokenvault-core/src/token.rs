//! Pluggable token minting.

use hkdf::Hkdf;
use secrecy::ExposeSecret;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{TokenVaultError, TokenVaultResult};
use crate::keys::SecretKey;
use crate::types::Token;

const DEFAULT_PREFIX: &str = "tok_";
const KEYED_TOKEN_SALT: &[u8] = b"tokenvault:account-token:v1";

/// Mints a fresh token for an account that has none yet.
///
/// Implementations must make collisions between distinct accounts
/// practically impossible.
pub trait TokenGenerator: Send + Sync {
    /// Produces a token for `account`.
    ///
    /// # Errors
    ///
    /// Returns an error if key material cannot be used.
    fn mint(&self, account: &str) -> TokenVaultResult<Token>;
}

/// Random UUID v4 tokens. Carries no information about the account.
#[derive(Debug, Clone)]
pub struct RandomTokenGenerator {
    prefix: String,
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }
}

impl RandomTokenGenerator {
    /// Generator rendering tokens as `<prefix><uuid>`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn mint(&self, _account: &str) -> TokenVaultResult<Token> {
        Ok(format!("{}{}", self.prefix, Uuid::new_v4().simple()))
    }
}

/// Deterministic keyed tokens: HKDF-SHA256 over the account under a secret key.
///
/// The same key always derives the same token for an account, so a vault
/// rebuilt with the same key reproduces every mapping.
pub struct KeyedTokenGenerator {
    key: SecretKey,
    prefix: String,
}

impl std::fmt::Debug for KeyedTokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedTokenGenerator")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl KeyedTokenGenerator {
    /// Generator keyed by `key`.
    #[must_use]
    pub fn new(key: SecretKey) -> Self {
        Self {
            key,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Overrides the token prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl TokenGenerator for KeyedTokenGenerator {
    fn mint(&self, account: &str) -> TokenVaultResult<Token> {
        let hkdf = Hkdf::<Sha256>::new(Some(KEYED_TOKEN_SALT), self.key.expose_secret());
        let mut okm = [0u8; 32];
        hkdf.expand(account.as_bytes(), &mut okm)
            .map_err(|err| TokenVaultError::Crypto(err.to_string()))?;
        Ok(format!("{}{}", self.prefix, hex::encode(okm)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use secrecy::SecretBox;

    use super::*;

    #[test]
    fn test_random_tokens_are_unique() {
        let generator = RandomTokenGenerator::default();
        let tokens: HashSet<_> = (0..1_000)
            .map(|_| generator.mint("ACC-A").expect("mint"))
            .collect();
        assert_eq!(tokens.len(), 1_000);
        assert!(tokens.iter().all(|token| token.starts_with("tok_")));
    }

    #[test]
    fn test_keyed_tokens_are_stable_per_key() {
        let generator = KeyedTokenGenerator::new(SecretBox::new(Box::new([7u8; 32])));
        let first = generator.mint("ACC-A").expect("mint");
        assert_eq!(first, generator.mint("ACC-A").expect("mint"));
        assert_ne!(first, generator.mint("ACC-B").expect("mint"));
        assert_eq!(first.len(), "tok_".len() + 64);

        let other_key = KeyedTokenGenerator::new(SecretBox::new(Box::new([8u8; 32])));
        assert_ne!(first, other_key.mint("ACC-A").expect("mint"));
    }

    #[test]
    fn test_keyed_debug_hides_key() {
        let generator = KeyedTokenGenerator::new(SecretBox::new(Box::new([7u8; 32]))).prefix("t-");
        let rendered = format!("{generator:?}");
        assert!(rendered.contains("t-"));
        assert!(!rendered.contains("key"));
    }
}
