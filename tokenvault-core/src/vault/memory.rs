use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{VaultStore, WriteOutcome};
use crate::error::StoreError;
use crate::types::{AccountValue, Token};

/// Mutex-guarded in-process vault store.
///
/// Suitable for tests and for warm processes that keep one store across
/// invocations; contents do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryVaultStore {
    entries: Mutex<HashMap<AccountValue, Token>>,
}

impl InMemoryVaultStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (AccountValue, Token)>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    /// Copy of the current mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the mutex is poisoned.
    pub fn snapshot(&self) -> Result<HashMap<AccountValue, Token>, StoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| StoreError::permanent("mutex poisoned"))?
            .clone())
    }
}

impl VaultStore for InMemoryVaultStore {
    async fn batch_get(
        &self,
        accounts: &[AccountValue],
    ) -> Result<HashMap<AccountValue, Token>, StoreError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::permanent("mutex poisoned"))?;
        Ok(accounts
            .iter()
            .filter_map(|account| {
                guard
                    .get(account)
                    .map(|token| (account.clone(), token.clone()))
            })
            .collect())
    }

    async fn batch_put(&self, items: &[(AccountValue, Token)]) -> Result<WriteOutcome, StoreError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| StoreError::permanent("mutex poisoned"))?;
        Ok(put_if_absent(&mut guard, items))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Applies `items` to `entries` without ever replacing an issued token.
pub(super) fn put_if_absent(
    entries: &mut HashMap<AccountValue, Token>,
    items: &[(AccountValue, Token)],
) -> WriteOutcome {
    let mut outcome = WriteOutcome::default();
    for (account, token) in items {
        match entries.entry(account.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
            Entry::Occupied(existing) => {
                if existing.get() != token {
                    outcome.already_mapped.push(account.clone());
                }
            }
        }
    }
    outcome
}
