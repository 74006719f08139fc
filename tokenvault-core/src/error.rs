//! Error types for the tokenization pipeline.

use thiserror::Error;

use crate::types::AccountValue;

/// Result type for tokenization operations.
pub type TokenVaultResult<T> = Result<T, TokenVaultError>;

/// Vault call that tripped a batch ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    /// A `batch_resolve` (read) call.
    Resolve,
    /// A `batch_persist` (write) call.
    Persist,
}

impl std::fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve => f.write_str("batch_resolve"),
            Self::Persist => f.write_str("batch_persist"),
        }
    }
}

/// Failure reported by a backing store.
///
/// Stores flag whether the failure is transient; only retryable failures
/// are retried by the vault client.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StoreError {
    message: String,
    retryable: bool,
}

impl StoreError {
    /// A transient failure (throttling, timeout, connection reset).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away by retrying.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the failure is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Errors raised by the tokenization pipeline.
#[derive(Debug, Error)]
pub enum TokenVaultError {
    /// A vault call was made with more keys than the store accepts.
    #[error("{operation} called with {requested} keys, ceiling is {ceiling}")]
    BatchSizeExceeded {
        /// The offending call.
        operation: BatchOperation,
        /// Number of keys passed in.
        requested: usize,
        /// Configured ceiling for the call.
        ceiling: usize,
    },

    /// The store committed only part of a write batch.
    #[error("partial write: {} keys uncommitted", failed_keys.len())]
    PartialWriteFailure {
        /// Accounts whose mapping was not committed and must be retried.
        failed_keys: Vec<AccountValue>,
        /// Accounts already mapped to a different token in the vault.
        already_mapped: Vec<AccountValue>,
    },

    /// Newly minted tokens could not be made durable.
    #[error("token persistence failed for {} accounts: {reason}", accounts.len())]
    TokenPersistenceFailed {
        /// Accounts whose tokens are not durable.
        accounts: Vec<AccountValue>,
        /// Last failure observed.
        reason: String,
    },

    /// A pipeline run was aborted.
    #[error("processing of {object} failed: {cause}")]
    ProcessingFailed {
        /// Object that was being processed.
        object: String,
        /// Underlying failure.
        cause: Box<TokenVaultError>,
    },

    /// Errors coming from the backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An input line does not hold the account field.
    #[error("malformed record at line {line}: {fields} fields, account field is {account_field}")]
    MalformedRecord {
        /// 1-based input line number.
        line: u64,
        /// Number of fields found.
        fields: usize,
        /// Configured account field position.
        account_field: usize,
    },

    /// The account field of an input line is not valid UTF-8.
    #[error("account field at line {line} is not valid UTF-8")]
    NonUtf8Account {
        /// 1-based input line number.
        line: u64,
    },

    /// Trigger event could not be interpreted.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Stream or filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failures.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cryptographic failures (AEAD, HKDF).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The token cache lock was poisoned by a panicking writer.
    #[error("token cache lock poisoned")]
    CachePoisoned,
}

impl TokenVaultError {
    /// Wraps `self` as the cause of a failed run over `object`.
    ///
    /// Already wrapped errors are returned as-is.
    #[must_use]
    pub fn into_processing_failure(self, object: impl Into<String>) -> Self {
        match self {
            err @ Self::ProcessingFailed { .. } => err,
            cause => Self::ProcessingFailed {
                object: object.into(),
                cause: Box::new(cause),
            },
        }
    }
}
