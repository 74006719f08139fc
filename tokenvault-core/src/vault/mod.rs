//! Token vault: backing store seam and the ceiling-enforcing batch client.

mod file;
mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use backon::Retryable;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::{BatchOperation, StoreError, TokenVaultError, TokenVaultResult};
use crate::retry::RetryPolicy;
use crate::types::{AccountValue, Token};

pub use file::FileVaultStore;
pub use memory::InMemoryVaultStore;

/// Result of a single store write call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Keys the store did not commit; the caller retries them.
    pub unprocessed: Vec<AccountValue>,
    /// Keys already mapped to a different token. The stored token is kept.
    pub already_mapped: Vec<AccountValue>,
}

/// Key-value store holding the authoritative account → token mapping.
///
/// Writes are put-if-absent: rewriting an identical pair is a no-op, and a
/// key already mapped to a different token is left unchanged and reported in
/// [`WriteOutcome::already_mapped`].
pub trait VaultStore: Send + Sync {
    /// Fetches the tokens of `accounts`. Missing keys are omitted.
    fn batch_get(
        &self,
        accounts: &[AccountValue],
    ) -> impl Future<Output = Result<HashMap<AccountValue, Token>, StoreError>> + Send;

    /// Writes `items` with put-if-absent semantics.
    fn batch_put(
        &self,
        items: &[(AccountValue, Token)],
    ) -> impl Future<Output = Result<WriteOutcome, StoreError>> + Send;

    /// Store name for logging.
    fn name(&self) -> &str;
}

impl<S: VaultStore> VaultStore for Arc<S> {
    fn batch_get(
        &self,
        accounts: &[AccountValue],
    ) -> impl Future<Output = Result<HashMap<AccountValue, Token>, StoreError>> + Send {
        (**self).batch_get(accounts)
    }

    fn batch_put(
        &self,
        items: &[(AccountValue, Token)],
    ) -> impl Future<Output = Result<WriteOutcome, StoreError>> + Send {
        (**self).batch_put(items)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Per-call key ceilings imposed by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultLimits {
    /// Maximum keys per `batch_resolve`.
    pub read_ceiling: usize,
    /// Maximum pairs per `batch_persist`.
    pub write_ceiling: usize,
}

impl Default for VaultLimits {
    fn default() -> Self {
        Self {
            read_ceiling: 100,
            write_ceiling: 25,
        }
    }
}

impl From<&PipelineConfig> for VaultLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            read_ceiling: config.read_batch_ceiling,
            write_ceiling: config.write_batch_ceiling,
        }
    }
}

/// Successful `batch_persist` result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Accounts the vault already maps to another token.
    pub already_mapped: Vec<AccountValue>,
}

/// Bounded-batch access to the vault.
///
/// Rejects calls above the configured ceilings instead of truncating them,
/// and retries transient store failures with bounded backoff.
#[derive(Debug)]
pub struct TokenVaultClient<S> {
    store: S,
    limits: VaultLimits,
    retry: RetryPolicy,
}

impl<S: VaultStore> TokenVaultClient<S> {
    /// Wraps `store` with the given ceilings and retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::Config`] if a ceiling is zero.
    pub fn new(store: S, limits: VaultLimits, retry: RetryPolicy) -> TokenVaultResult<Self> {
        if limits.read_ceiling == 0 || limits.write_ceiling == 0 {
            return Err(TokenVaultError::Config(
                "vault batch ceilings must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            store,
            limits,
            retry,
        })
    }

    /// Maximum keys accepted by [`Self::batch_resolve`].
    #[must_use]
    pub const fn read_ceiling(&self) -> usize {
        self.limits.read_ceiling
    }

    /// Maximum pairs accepted by [`Self::batch_persist`].
    #[must_use]
    pub const fn write_ceiling(&self) -> usize {
        self.limits.write_ceiling
    }

    /// The wrapped store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Looks up the tokens of up to `read_ceiling` distinct accounts.
    ///
    /// Accounts without a token are absent from the returned map.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::BatchSizeExceeded`] above the ceiling, or
    /// [`TokenVaultError::Store`] once retries are exhausted.
    pub async fn batch_resolve(
        &self,
        accounts: &[AccountValue],
    ) -> TokenVaultResult<HashMap<AccountValue, Token>> {
        check_ceiling(BatchOperation::Resolve, accounts.len(), self.limits.read_ceiling)?;
        if accounts.is_empty() {
            return Ok(HashMap::new());
        }

        let found = (|| async { self.store.batch_get(accounts).await })
            .retry(self.retry.backoff())
            .when(|err: &StoreError| err.is_retryable())
            .notify(|err: &StoreError, delay| {
                warn!(store = self.store.name(), ?delay, error = %err, "retrying batch_get");
            })
            .await?;

        debug!(
            store = self.store.name(),
            requested = accounts.len(),
            found = found.len(),
            "batch_resolve"
        );
        Ok(found)
    }

    /// Writes up to `write_ceiling` account → token pairs.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::BatchSizeExceeded`] above the ceiling,
    /// [`TokenVaultError::PartialWriteFailure`] if the store left keys
    /// uncommitted, or [`TokenVaultError::Store`] once retries are exhausted.
    pub async fn batch_persist(
        &self,
        mapping: &[(AccountValue, Token)],
    ) -> TokenVaultResult<PersistOutcome> {
        check_ceiling(BatchOperation::Persist, mapping.len(), self.limits.write_ceiling)?;
        if mapping.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let outcome = (|| async { self.store.batch_put(mapping).await })
            .retry(self.retry.backoff())
            .when(|err: &StoreError| err.is_retryable())
            .notify(|err: &StoreError, delay| {
                warn!(store = self.store.name(), ?delay, error = %err, "retrying batch_put");
            })
            .await?;

        debug!(
            store = self.store.name(),
            written = mapping.len() - outcome.unprocessed.len(),
            unprocessed = outcome.unprocessed.len(),
            already_mapped = outcome.already_mapped.len(),
            "batch_persist"
        );

        if outcome.unprocessed.is_empty() {
            Ok(PersistOutcome {
                already_mapped: outcome.already_mapped,
            })
        } else {
            Err(TokenVaultError::PartialWriteFailure {
                failed_keys: outcome.unprocessed,
                already_mapped: outcome.already_mapped,
            })
        }
    }
}

fn check_ceiling(
    operation: BatchOperation,
    requested: usize,
    ceiling: usize,
) -> TokenVaultResult<()> {
    if requested > ceiling {
        return Err(TokenVaultError::BatchSizeExceeded {
            operation,
            requested,
            ceiling,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn accounts(count: usize) -> Vec<AccountValue> {
        (0..count).map(|i| format!("ACC-{i:04}")).collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(2)
            .with_delays(Duration::from_millis(1), Duration::from_millis(2))
    }

    /// Fails the first `failures` calls with a retryable error.
    struct FlakyStore {
        inner: InMemoryVaultStore,
        failures: AtomicUsize,
    }

    impl VaultStore for FlakyStore {
        async fn batch_get(
            &self,
            accounts: &[AccountValue],
        ) -> Result<HashMap<AccountValue, Token>, StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::retryable("throttled"));
            }
            self.inner.batch_get(accounts).await
        }

        async fn batch_put(
            &self,
            items: &[(AccountValue, Token)],
        ) -> Result<WriteOutcome, StoreError> {
            self.inner.batch_put(items).await
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_resolve_rejects_above_ceiling() {
        let client = TokenVaultClient::new(
            InMemoryVaultStore::new(),
            VaultLimits::default(),
            RetryPolicy::none(),
        )
        .expect("client");
        match client.batch_resolve(&accounts(101)).await {
            Err(TokenVaultError::BatchSizeExceeded {
                operation: BatchOperation::Resolve,
                requested: 101,
                ceiling: 100,
            }) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_persist_rejects_above_ceiling_without_writing() {
        let store = Arc::new(InMemoryVaultStore::new());
        let client =
            TokenVaultClient::new(Arc::clone(&store), VaultLimits::default(), RetryPolicy::none())
                .expect("client");
        let mapping: Vec<_> = accounts(26)
            .into_iter()
            .map(|account| (account.clone(), format!("tok-{account}")))
            .collect();
        let err = client.batch_persist(&mapping).await.expect_err("too many");
        assert!(matches!(
            err,
            TokenVaultError::BatchSizeExceeded {
                operation: BatchOperation::Persist,
                ..
            }
        ));
        assert!(store.snapshot().expect("snapshot").is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reports_missing_as_absent() {
        let store = InMemoryVaultStore::with_entries([("ACC-A".to_string(), "T1".to_string())]);
        let client =
            TokenVaultClient::new(store, VaultLimits::default(), RetryPolicy::none()).expect("client");
        let found = client
            .batch_resolve(&["ACC-A".to_string(), "ACC-B".to_string()])
            .await
            .expect("resolve");
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("ACC-A").map(String::as_str), Some("T1"));
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let store = Arc::new(InMemoryVaultStore::new());
        let client =
            TokenVaultClient::new(Arc::clone(&store), VaultLimits::default(), RetryPolicy::none())
                .expect("client");
        let mapping = vec![
            ("ACC-A".to_string(), "T1".to_string()),
            ("ACC-B".to_string(), "T2".to_string()),
        ];
        client.batch_persist(&mapping).await.expect("first write");
        let once = store.snapshot().expect("snapshot");
        let outcome = client.batch_persist(&mapping).await.expect("second write");
        assert!(outcome.already_mapped.is_empty());
        assert_eq!(store.snapshot().expect("snapshot"), once);
    }

    #[tokio::test]
    async fn test_persist_reports_conflicting_token() {
        let store = InMemoryVaultStore::with_entries([("ACC-A".to_string(), "T1".to_string())]);
        let client =
            TokenVaultClient::new(store, VaultLimits::default(), RetryPolicy::none()).expect("client");
        let outcome = client
            .batch_persist(&[("ACC-A".to_string(), "T9".to_string())])
            .await
            .expect("write");
        assert_eq!(outcome.already_mapped, vec!["ACC-A".to_string()]);
        let found = client
            .batch_resolve(&["ACC-A".to_string()])
            .await
            .expect("resolve");
        assert_eq!(found.get("ACC-A").map(String::as_str), Some("T1"));
    }

    #[tokio::test]
    async fn test_transient_store_errors_are_retried() {
        let store = FlakyStore {
            inner: InMemoryVaultStore::with_entries([("ACC-A".to_string(), "T1".to_string())]),
            failures: AtomicUsize::new(2),
        };
        let client = TokenVaultClient::new(store, VaultLimits::default(), fast_retry()).expect("client");
        let found = client
            .batch_resolve(&["ACC-A".to_string()])
            .await
            .expect("resolve after retries");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_store_errors_are_bounded() {
        let store = FlakyStore {
            inner: InMemoryVaultStore::new(),
            failures: AtomicUsize::new(10),
        };
        let client = TokenVaultClient::new(store, VaultLimits::default(), fast_retry()).expect("client");
        let err = client
            .batch_resolve(&["ACC-A".to_string()])
            .await
            .expect_err("retries exhausted");
        assert!(matches!(err, TokenVaultError::Store(_)));
        assert_eq!(client.store().failures.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_zero_ceiling_is_rejected() {
        let limits = VaultLimits {
            read_ceiling: 0,
            write_ceiling: 25,
        };
        assert!(matches!(
            TokenVaultClient::new(InMemoryVaultStore::new(), limits, RetryPolicy::none()),
            Err(TokenVaultError::Config(_))
        ));
    }
}
