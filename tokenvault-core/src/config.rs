//! Startup configuration, read once from the environment.

use std::str::FromStr;

use crate::error::{TokenVaultError, TokenVaultResult};
use crate::retry::RetryPolicy;
use crate::types::AccountNormalization;

/// Destination location for replicas.
pub const DESTINATION_BUCKET: &str = "DESTINATION_BUCKET";
/// Identifier of the token vault store.
pub const TOKEN_VAULT_TABLE: &str = "TOKEN_VAULT_TABLE";
/// Identifier of the key sealing replicas.
pub const SENSIBLE_KEY_ID: &str = "SENSIBLE_KEY_ID";
/// Maximum keys per vault read.
pub const READ_BATCH_CEILING: &str = "READ_BATCH_CEILING";
/// Maximum pairs per vault write.
pub const WRITE_BATCH_CEILING: &str = "WRITE_BATCH_CEILING";
/// Buffered records per flush.
pub const BATCH_THRESHOLD: &str = "BATCH_THRESHOLD";
/// Zero-based position of the account field.
pub const ACCOUNT_FIELD_INDEX: &str = "ACCOUNT_FIELD_INDEX";
/// Single-character field delimiter.
pub const FIELD_DELIMITER: &str = "FIELD_DELIMITER";
/// Whether the first line is a header to pass through.
pub const HAS_HEADER: &str = "HAS_HEADER";
/// `exact` or `trim`.
pub const ACCOUNT_NORMALIZATION: &str = "ACCOUNT_NORMALIZATION";
/// Retries for vault calls and uncommitted writes.
pub const MAX_RETRIES: &str = "MAX_RETRIES";

/// Validated pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Where replicas are published.
    pub destination_location: String,
    /// Which vault store to use.
    pub vault_identifier: String,
    /// Key identifier bound to every replica.
    pub encryption_key_identifier: String,
    /// Keys per `batch_resolve` call.
    pub read_batch_ceiling: usize,
    /// Pairs per `batch_persist` call.
    pub write_batch_ceiling: usize,
    /// Records buffered before a flush.
    pub batch_threshold: usize,
    /// Zero-based account field position.
    pub account_field: usize,
    /// Field delimiter.
    pub delimiter: char,
    /// Pass the first line through untouched.
    pub has_header: bool,
    /// Account key normalization.
    pub normalization: AccountNormalization,
    /// Retry policy for vault calls.
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    /// Configuration with the given required identifiers and default limits.
    pub fn new(
        destination_location: impl Into<String>,
        vault_identifier: impl Into<String>,
        encryption_key_identifier: impl Into<String>,
    ) -> Self {
        Self {
            destination_location: destination_location.into(),
            vault_identifier: vault_identifier.into(),
            encryption_key_identifier: encryption_key_identifier.into(),
            read_batch_ceiling: 100,
            write_batch_ceiling: 25,
            batch_threshold: 100,
            account_field: 1,
            delimiter: ',',
            has_header: false,
            normalization: AccountNormalization::Exact,
            retry: RetryPolicy::default(),
        }
    }

    /// Reads and validates the configuration from process environment.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::Config`] if a required variable is missing or
    /// any value is invalid.
    pub fn from_env() -> TokenVaultResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads and validates the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::Config`] if a required variable is missing or
    /// any value is invalid.
    pub fn from_lookup<F>(lookup: F) -> TokenVaultResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| TokenVaultError::Config(format!("{name} is not set")))
        };

        let mut config = Self::new(
            required(DESTINATION_BUCKET)?,
            required(TOKEN_VAULT_TABLE)?,
            required(SENSIBLE_KEY_ID)?,
        );

        if let Some(value) = parse_optional(&lookup, READ_BATCH_CEILING)? {
            config.read_batch_ceiling = value;
        }
        if let Some(value) = parse_optional(&lookup, WRITE_BATCH_CEILING)? {
            config.write_batch_ceiling = value;
        }
        if let Some(value) = parse_optional(&lookup, BATCH_THRESHOLD)? {
            config.batch_threshold = value;
        }
        if let Some(value) = parse_optional(&lookup, ACCOUNT_FIELD_INDEX)? {
            config.account_field = value;
        }
        if let Some(value) = lookup(FIELD_DELIMITER) {
            config.delimiter = parse_delimiter(&value)?;
        }
        if let Some(value) = lookup(HAS_HEADER) {
            config.has_header = parse_flag(HAS_HEADER, &value)?;
        }
        if let Some(value) = lookup(ACCOUNT_NORMALIZATION) {
            config.normalization = value.parse()?;
        }
        if let Some(value) = parse_optional(&lookup, MAX_RETRIES)? {
            config.retry = config.retry.with_max_retries(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants between fields.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::Config`] describing the first violation.
    pub fn validate(&self) -> TokenVaultResult<()> {
        for (name, value) in [
            (DESTINATION_BUCKET, &self.destination_location),
            (TOKEN_VAULT_TABLE, &self.vault_identifier),
            (SENSIBLE_KEY_ID, &self.encryption_key_identifier),
        ] {
            if value.trim().is_empty() {
                return Err(TokenVaultError::Config(format!("{name} is not set")));
            }
        }
        for (name, value) in [
            (READ_BATCH_CEILING, self.read_batch_ceiling),
            (WRITE_BATCH_CEILING, self.write_batch_ceiling),
            (BATCH_THRESHOLD, self.batch_threshold),
        ] {
            if value == 0 {
                return Err(TokenVaultError::Config(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if !self.delimiter.is_ascii() || self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(TokenVaultError::Config(format!(
                "{FIELD_DELIMITER} must be a single ASCII character other than a line break"
            )));
        }
        Ok(())
    }
}

fn parse_optional<F, T>(lookup: &F, name: &str) -> TokenVaultResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|err| {
                TokenVaultError::Config(format!("{name} has invalid value {raw:?}: {err}"))
            })
        })
        .transpose()
}

fn parse_delimiter(raw: &str) -> TokenVaultResult<char> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(delimiter), None) => Ok(delimiter),
        _ => Err(TokenVaultError::Config(format!(
            "{FIELD_DELIMITER} must be exactly one character, got {raw:?}"
        ))),
    }
}

fn parse_flag(name: &str, raw: &str) -> TokenVaultResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(TokenVaultError::Config(format!(
            "{name} has invalid value {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        (DESTINATION_BUCKET, "replicas"),
        (TOKEN_VAULT_TABLE, "token-vault"),
        (SENSIBLE_KEY_ID, "key-1"),
    ];

    #[test]
    fn test_defaults_with_required_only() {
        let config = PipelineConfig::from_lookup(lookup_from(&REQUIRED)).expect("config");
        assert_eq!(config, PipelineConfig::new("replicas", "token-vault", "key-1"));
        assert_eq!(config.read_batch_ceiling, 100);
        assert_eq!(config.write_batch_ceiling, 25);
    }

    #[test_case(DESTINATION_BUCKET ; "destination")]
    #[test_case(TOKEN_VAULT_TABLE ; "vault")]
    #[test_case(SENSIBLE_KEY_ID ; "key id")]
    fn test_missing_required_is_fatal(missing: &str) {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(name, _)| *name != missing)
            .collect();
        match PipelineConfig::from_lookup(lookup_from(&pairs)) {
            Err(TokenVaultError::Config(message)) => assert!(message.contains(missing)),
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_blank_required_is_missing() {
        let pairs = [
            (DESTINATION_BUCKET, "  "),
            (TOKEN_VAULT_TABLE, "token-vault"),
            (SENSIBLE_KEY_ID, "key-1"),
        ];
        assert!(PipelineConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn test_overrides_are_applied() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            (READ_BATCH_CEILING, "50"),
            (WRITE_BATCH_CEILING, "10"),
            (BATCH_THRESHOLD, "1000"),
            (ACCOUNT_FIELD_INDEX, "3"),
            (FIELD_DELIMITER, ";"),
            (HAS_HEADER, "true"),
            (ACCOUNT_NORMALIZATION, "trim"),
            (MAX_RETRIES, "5"),
        ]);
        let config = PipelineConfig::from_lookup(lookup_from(&pairs)).expect("config");
        assert_eq!(config.read_batch_ceiling, 50);
        assert_eq!(config.write_batch_ceiling, 10);
        assert_eq!(config.batch_threshold, 1000);
        assert_eq!(config.account_field, 3);
        assert_eq!(config.delimiter, ';');
        assert!(config.has_header);
        assert_eq!(config.normalization, AccountNormalization::Trim);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test_case(READ_BATCH_CEILING, "0" ; "zero read ceiling")]
    #[test_case(WRITE_BATCH_CEILING, "-1" ; "negative write ceiling")]
    #[test_case(BATCH_THRESHOLD, "many" ; "non numeric threshold")]
    #[test_case(FIELD_DELIMITER, ",," ; "two char delimiter")]
    #[test_case(HAS_HEADER, "maybe" ; "bad flag")]
    #[test_case(ACCOUNT_NORMALIZATION, "lower" ; "unknown normalization")]
    fn test_invalid_values_are_rejected(name: &str, value: &str) {
        let mut pairs = REQUIRED.to_vec();
        pairs.push((name, value));
        assert!(matches!(
            PipelineConfig::from_lookup(lookup_from(&pairs)),
            Err(TokenVaultError::Config(_))
        ));
    }
}
