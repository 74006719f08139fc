//! Resolution of distinct accounts to tokens: cache, then vault, then mint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use backon::BackoffBuilder;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, TokenCache};
use crate::error::{TokenVaultError, TokenVaultResult};
use crate::retry::RetryPolicy;
use crate::token::TokenGenerator;
use crate::types::{AccountValue, Token};
use crate::vault::{TokenVaultClient, VaultStore};

const MAX_MINT_ATTEMPTS: usize = 3;

/// Resolves account sets to tokens while keeping the mapping injective.
///
/// A token is only handed out after the vault confirmed it (existing
/// mapping) or durably recorded it (new mapping).
#[derive(Debug)]
pub struct Tokenizer<S, G> {
    client: TokenVaultClient<S>,
    generator: G,
    cache: Arc<TokenCache>,
    retry: RetryPolicy,
}

impl<S: VaultStore, G: TokenGenerator> Tokenizer<S, G> {
    /// Creates a tokenizer sharing `cache` with other tokenizers.
    ///
    /// `retry` bounds how often uncommitted writes are re-sent.
    pub const fn new(
        client: TokenVaultClient<S>,
        generator: G,
        cache: Arc<TokenCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            generator,
            cache,
            retry,
        }
    }

    /// The shared token cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// The vault client.
    #[must_use]
    pub const fn client(&self) -> &TokenVaultClient<S> {
        &self.client
    }

    /// Resolves every account in `accounts` to its token.
    ///
    /// Existing tokens are reused; accounts unknown to the vault get a new
    /// token that is persisted before it is returned or cached.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::TokenPersistenceFailed`] if minted tokens
    /// cannot be made durable; nothing minted by this call is cached or
    /// returned in that case. Read failures are returned as-is.
    pub async fn resolve(
        &self,
        accounts: &HashSet<AccountValue>,
    ) -> TokenVaultResult<HashMap<AccountValue, Token>> {
        let CacheLookup { mut hits, misses } = self.cache.partition(accounts)?;
        let cached = hits.len();
        if misses.is_empty() {
            debug!(requested = accounts.len(), cached, "resolved from cache");
            return Ok(hits);
        }

        let found = self.lookup(&misses).await?;
        self.cache.insert_all(&found)?;
        let fresh: Vec<AccountValue> = misses
            .into_iter()
            .filter(|account| !found.contains_key(account))
            .collect();
        let from_vault = found.len();
        hits.extend(found);

        let minted = fresh.len();
        if !fresh.is_empty() {
            let minted_pairs = self.mint(fresh)?;
            let durable = self.persist(minted_pairs).await?;
            self.cache.insert_all(&durable)?;
            hits.extend(durable);
        }

        debug!(
            requested = accounts.len(),
            cached,
            from_vault,
            minted,
            "resolved accounts"
        );
        Ok(hits)
    }

    /// Reads `accounts` from the vault in read-ceiling sized sub-batches.
    async fn lookup(&self, accounts: &[AccountValue]) -> TokenVaultResult<HashMap<AccountValue, Token>> {
        let mut found = HashMap::with_capacity(accounts.len());
        for chunk in accounts.chunks(self.client.read_ceiling()) {
            found.extend(self.client.batch_resolve(chunk).await?);
        }
        Ok(found)
    }

    fn mint(&self, accounts: Vec<AccountValue>) -> TokenVaultResult<Vec<(AccountValue, Token)>> {
        let mut issued: HashSet<Token> = HashSet::with_capacity(accounts.len());
        let mut minted = Vec::with_capacity(accounts.len());
        for account in accounts {
            let token = self.mint_unique(&account, &issued)?;
            issued.insert(token.clone());
            minted.push((account, token));
        }
        Ok(minted)
    }

    fn mint_unique(&self, account: &str, issued: &HashSet<Token>) -> TokenVaultResult<Token> {
        for _ in 0..MAX_MINT_ATTEMPTS {
            let token = self.generator.mint(account)?;
            if !issued.contains(&token) {
                return Ok(token);
            }
        }
        Err(TokenVaultError::Crypto(
            "token generator keeps producing colliding tokens".to_string(),
        ))
    }

    /// Persists minted pairs and returns the tokens that are now durable.
    ///
    /// Accounts another writer mapped first keep the vault's token.
    async fn persist(
        &self,
        minted: Vec<(AccountValue, Token)>,
    ) -> TokenVaultResult<HashMap<AccountValue, Token>> {
        let mut already_mapped = Vec::new();
        for chunk in minted.chunks(self.client.write_ceiling()) {
            already_mapped.extend(self.persist_chunk(chunk).await?);
        }

        let mut durable: HashMap<AccountValue, Token> = minted.into_iter().collect();
        if already_mapped.is_empty() {
            return Ok(durable);
        }

        warn!(
            accounts = already_mapped.len(),
            "accounts were mapped concurrently; adopting vault tokens"
        );
        let existing = self.lookup(&already_mapped).await.map_err(|err| {
            TokenVaultError::TokenPersistenceFailed {
                accounts: already_mapped.clone(),
                reason: format!("re-reading concurrently mapped accounts failed: {err}"),
            }
        })?;
        for account in already_mapped {
            let Some(token) = existing.get(&account) else {
                return Err(TokenVaultError::TokenPersistenceFailed {
                    accounts: vec![account],
                    reason: "vault reported a mapping it cannot return".to_string(),
                });
            };
            durable.insert(account, token.clone());
        }
        Ok(durable)
    }

    /// Writes one write-ceiling sized chunk, re-sending exactly the keys the
    /// store left uncommitted until the retry budget runs out.
    async fn persist_chunk(
        &self,
        chunk: &[(AccountValue, Token)],
    ) -> TokenVaultResult<Vec<AccountValue>> {
        let mut pending = chunk.to_vec();
        let mut already_mapped = Vec::new();
        let mut delays = self.retry.backoff().build();
        loop {
            match self.client.batch_persist(&pending).await {
                Ok(outcome) => {
                    already_mapped.extend(outcome.already_mapped);
                    return Ok(already_mapped);
                }
                Err(TokenVaultError::PartialWriteFailure {
                    failed_keys,
                    already_mapped: mapped,
                }) => {
                    already_mapped.extend(mapped);
                    let Some(delay) = delays.next() else {
                        return Err(TokenVaultError::TokenPersistenceFailed {
                            reason: format!(
                                "{} keys still uncommitted after {} retries",
                                failed_keys.len(),
                                self.retry.max_retries
                            ),
                            accounts: failed_keys,
                        });
                    };
                    warn!(
                        uncommitted = failed_keys.len(),
                        ?delay,
                        "retrying uncommitted token writes"
                    );
                    let failed: HashSet<&AccountValue> = failed_keys.iter().collect();
                    pending.retain(|(account, _)| failed.contains(account));
                    tokio::time::sleep(delay).await;
                }
                Err(err @ TokenVaultError::BatchSizeExceeded { .. }) => return Err(err),
                Err(err) => {
                    return Err(TokenVaultError::TokenPersistenceFailed {
                        accounts: pending.into_iter().map(|(account, _)| account).collect(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
}
