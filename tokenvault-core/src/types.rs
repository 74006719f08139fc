//! Shared value types.

use std::str::FromStr;

use crate::error::TokenVaultError;

/// Sensitive identifier being protected. Compared as an exact string.
pub type AccountValue = String;

/// Opaque replacement for an [`AccountValue`].
pub type Token = String;

/// How an account field is turned into the key used for vault lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccountNormalization {
    /// Use the field verbatim.
    #[default]
    Exact,
    /// Strip leading and trailing whitespace.
    Trim,
}

impl AccountNormalization {
    /// Applies the policy to a raw field.
    #[must_use]
    pub fn apply(self, raw: &str) -> AccountValue {
        match self {
            Self::Exact => raw.to_string(),
            Self::Trim => raw.trim().to_string(),
        }
    }
}

impl FromStr for AccountNormalization {
    type Err = TokenVaultError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "trim" => Ok(Self::Trim),
            other => Err(TokenVaultError::Config(format!(
                "unknown account normalization {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_keeps_whitespace() {
        assert_eq!(AccountNormalization::Exact.apply(" ACC-1 "), " ACC-1 ");
        assert_eq!(AccountNormalization::Trim.apply(" ACC-1 "), "ACC-1");
    }

    #[test]
    fn test_parse_normalization() {
        assert_eq!(
            "TRIM".parse::<AccountNormalization>().expect("parse"),
            AccountNormalization::Trim
        );
        assert!("upper".parse::<AccountNormalization>().is_err());
    }
}
