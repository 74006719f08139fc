//! Process-lifetime account → token cache.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{TokenVaultError, TokenVaultResult};
use crate::types::{AccountValue, Token};

/// Concurrency-safe cache of resolved tokens.
///
/// The vault stays authoritative: entries are only ever added after the
/// vault confirmed or durably recorded them, and are never evicted. Share it
/// between tokenizers with an `Arc`.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<AccountValue, Token>>,
}

/// Outcome of [`TokenCache::partition`].
#[derive(Debug, Default)]
pub struct CacheLookup {
    /// Accounts already cached, with their tokens.
    pub hits: HashMap<AccountValue, Token>,
    /// Accounts the cache does not know.
    pub misses: Vec<AccountValue>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached token for `account`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::CachePoisoned`] if a writer panicked.
    pub fn get(&self, account: &str) -> TokenVaultResult<Option<Token>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| TokenVaultError::CachePoisoned)?;
        Ok(guard.get(account).cloned())
    }

    /// Splits `accounts` into cache hits and misses under a single read lock.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::CachePoisoned`] if a writer panicked.
    pub fn partition(&self, accounts: &HashSet<AccountValue>) -> TokenVaultResult<CacheLookup> {
        let guard = self
            .entries
            .read()
            .map_err(|_| TokenVaultError::CachePoisoned)?;
        let mut lookup = CacheLookup::default();
        for account in accounts {
            match guard.get(account) {
                Some(token) => {
                    lookup.hits.insert(account.clone(), token.clone());
                }
                None => lookup.misses.push(account.clone()),
            }
        }
        Ok(lookup)
    }

    /// Inserts resolved pairs. Existing entries are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::CachePoisoned`] if a writer panicked.
    pub fn insert_all<'a, I>(&self, pairs: I) -> TokenVaultResult<()>
    where
        I: IntoIterator<Item = (&'a AccountValue, &'a Token)>,
    {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| TokenVaultError::CachePoisoned)?;
        for (account, token) in pairs {
            guard
                .entry(account.clone())
                .or_insert_with(|| token.clone());
        }
        Ok(())
    }

    /// Number of cached accounts.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::CachePoisoned`] if a writer panicked.
    pub fn len(&self) -> TokenVaultResult<usize> {
        Ok(self
            .entries
            .read()
            .map_err(|_| TokenVaultError::CachePoisoned)?
            .len())
    }

    /// Whether the cache holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::CachePoisoned`] if a writer panicked.
    pub fn is_empty(&self) -> TokenVaultResult<bool> {
        Ok(self.len()? == 0)
    }
}
