use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use super::memory::put_if_absent;
use super::{VaultStore, WriteOutcome};
use crate::error::{StoreError, TokenVaultError, TokenVaultResult};
use crate::types::{AccountValue, Token};

const VAULT_FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    entries: BTreeMap<AccountValue, Token>,
}

impl VaultFile {
    fn serialize(&self) -> Result<Vec<u8>, StoreError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| StoreError::permanent(format!("vault encode failed: {err}")))?;
        Ok(bytes)
    }

    fn deserialize(bytes: &[u8]) -> TokenVaultResult<Self> {
        let file: Self = ciborium::de::from_reader(bytes)
            .map_err(|err| TokenVaultError::Serialization(err.to_string()))?;
        if file.version != VAULT_FILE_VERSION {
            return Err(TokenVaultError::Serialization(format!(
                "unsupported vault file version {}",
                file.version
            )));
        }
        Ok(file)
    }
}

/// Durable single-file vault store.
///
/// Every operation takes an exclusive lock on a `<vault>.lock` file next to
/// the vault and reads the current file under it, so stores opened on the
/// same path (in this process or another one) never act on a stale mapping.
/// Writes that add keys replace the vault file atomically through a
/// temporary file in the same directory. File work runs on the blocking
/// thread pool.
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileVaultStore {
    /// Opens the vault at `path`; a missing file is an empty vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or the vault
    /// cannot be read or decoded.
    pub fn open(path: impl AsRef<Path>) -> TokenVaultResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            lock_path: lock_path_for(&path),
            path,
        };
        let entries = store.with_lock(|| read_entries(&store.path))??;
        info!(path = %store.path.display(), entries = entries.len(), "opened file vault");
        Ok(store)
    }

    /// Location of the vault file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored mappings. Reads the file on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault cannot be locked or read.
    pub fn len(&self) -> Result<usize, StoreError> {
        self.with_lock(|| read_entries(&self.path).map_err(store_error))?
            .map(|entries| entries.len())
    }

    /// Whether the vault holds no mappings.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault cannot be locked or read.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> T) -> Result<T, StoreError> {
        if let Some(parent) = non_empty_parent(&self.lock_path) {
            fs::create_dir_all(parent)
                .map_err(|err| StoreError::retryable(format!("vault lock dir: {err}")))?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|err| StoreError::retryable(format!("vault lock open: {err}")))?;
        lock_file
            .lock_exclusive()
            .map_err(|err| StoreError::retryable(format!("vault lock: {err}")))?;
        let result = f();
        unlock(&lock_file)?;
        Ok(result)
    }

    async fn run_locked<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_lock(|| f(&store.path))?)
            .await
            .map_err(|err| StoreError::permanent(format!("vault task failed: {err}")))?
    }
}

fn unlock(lock_file: &File) -> Result<(), StoreError> {
    FileExt::unlock(lock_file).map_err(|err| StoreError::retryable(format!("vault unlock: {err}")))
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

fn store_error(err: TokenVaultError) -> StoreError {
    match err {
        TokenVaultError::Io(err) => StoreError::retryable(format!("vault read: {err}")),
        other => StoreError::permanent(other.to_string()),
    }
}

fn read_entries(path: &Path) -> TokenVaultResult<HashMap<AccountValue, Token>> {
    match fs::read(path) {
        Ok(bytes) => Ok(VaultFile::deserialize(&bytes)?.entries.into_iter().collect()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(err.into()),
    }
}

fn write_atomic(path: &Path, entries: &HashMap<AccountValue, Token>) -> Result<(), StoreError> {
    let file = VaultFile {
        version: VAULT_FILE_VERSION,
        entries: entries
            .iter()
            .map(|(account, token)| (account.clone(), token.clone()))
            .collect(),
    };
    let bytes = file.serialize()?;
    let parent = non_empty_parent(path).unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|err| StoreError::retryable(format!("vault temp file: {err}")))?;
    temp.write_all(&bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| StoreError::retryable(format!("vault write: {err}")))?;
    temp.persist(path)
        .map_err(|err| StoreError::retryable(format!("vault persist: {}", err.error)))?;
    Ok(())
}

impl VaultStore for FileVaultStore {
    async fn batch_get(
        &self,
        accounts: &[AccountValue],
    ) -> Result<HashMap<AccountValue, Token>, StoreError> {
        let accounts = accounts.to_vec();
        self.run_locked(move |path| {
            let mut entries = read_entries(path).map_err(store_error)?;
            Ok(accounts
                .into_iter()
                .filter_map(|account| entries.remove_entry(&account))
                .collect())
        })
        .await
    }

    async fn batch_put(&self, items: &[(AccountValue, Token)]) -> Result<WriteOutcome, StoreError> {
        let items = items.to_vec();
        self.run_locked(move |path| {
            let mut entries = read_entries(path).map_err(store_error)?;
            let before = entries.len();
            let outcome = put_if_absent(&mut entries, &items);
            if entries.len() != before {
                write_atomic(path, &entries)?;
            }
            Ok(outcome)
        })
        .await
    }

    fn name(&self) -> &str {
        "file"
    }
}
