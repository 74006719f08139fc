#![allow(missing_docs)]

//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use secrecy::SecretBox;
use tokenvault_core::keys::SecretKey;
use tokenvault_core::{
    AccountValue, RandomTokenGenerator, RetryPolicy, StoreError, Token, TokenCache,
    TokenVaultClient, Tokenizer, VaultLimits, VaultStore, WriteOutcome,
};
use uuid::Uuid;

/// Wraps a store and records the size of every call it forwards.
pub struct RecordingStore<S> {
    inner: S,
    reads: Mutex<Vec<usize>>,
    writes: Mutex<Vec<usize>>,
}

impl<S> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn reads(&self) -> Vec<usize> {
        self.reads.lock().expect("reads lock").clone()
    }

    pub fn writes(&self) -> Vec<usize> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: VaultStore> VaultStore for RecordingStore<S> {
    async fn batch_get(
        &self,
        accounts: &[AccountValue],
    ) -> Result<HashMap<AccountValue, Token>, StoreError> {
        self.reads.lock().expect("reads lock").push(accounts.len());
        self.inner.batch_get(accounts).await
    }

    async fn batch_put(&self, items: &[(AccountValue, Token)]) -> Result<WriteOutcome, StoreError> {
        self.writes.lock().expect("writes lock").push(items.len());
        self.inner.batch_put(items).await
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Tokenizer with default ceilings, no retries and a private cache.
pub fn tokenizer<S: VaultStore>(store: S) -> Tokenizer<S, RandomTokenGenerator> {
    let client =
        TokenVaultClient::new(store, VaultLimits::default(), RetryPolicy::none()).expect("client");
    Tokenizer::new(
        client,
        RandomTokenGenerator::default(),
        Arc::new(TokenCache::new()),
        RetryPolicy::none(),
    )
}

pub fn accounts(count: usize) -> Vec<AccountValue> {
    (0..count).map(|i| format!("ACC-{i:05}")).collect()
}

pub fn key(byte: u8) -> SecretKey {
    SecretBox::new(Box::new([byte; 32]))
}

pub fn temp_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("tokenvault-test-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&path).expect("create temp dir");
    path
}

pub fn cleanup_root(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

pub fn write_object(root: &Path, location: &str, key: &str, body: &str) {
    let path = root.join(location).join(key);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create object dir");
    }
    std::fs::write(path, body).expect("write object");
}
