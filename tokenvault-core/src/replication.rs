//! Hand-off of finished artifacts to the replication collaborator.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{TokenVaultError, TokenVaultResult};
use crate::event::ObjectRef;
use crate::keys::SecretKey;

const NONCE_LEN: usize = 24;

/// Where a replica ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaLocation {
    /// Path (or URI) of the replica.
    pub path: PathBuf,
    /// Key identifier the replica is sealed under.
    pub key_id: String,
}

/// Receives complete, closed tokenized artifacts.
pub trait Replicator: Send + Sync {
    /// Replicates `artifact`, produced from `object`.
    fn replicate(
        &self,
        artifact: &Path,
        object: &ObjectRef,
    ) -> impl Future<Output = TokenVaultResult<ReplicaLocation>> + Send;
}

/// Seals artifacts with XChaCha20-Poly1305 and writes them under a directory.
///
/// Replicas land at `<destination>/<object key>` as `nonce || ciphertext`;
/// the key identifier is bound as associated data.
pub struct DirectoryReplicator {
    destination: PathBuf,
    key_id: String,
    key: SecretKey,
}

impl std::fmt::Debug for DirectoryReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryReplicator")
            .field("destination", &self.destination)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl DirectoryReplicator {
    /// Replicator writing into `destination`, sealing with `key` known as `key_id`.
    pub fn new(destination: impl Into<PathBuf>, key_id: impl Into<String>, key: SecretKey) -> Self {
        Self {
            destination: destination.into(),
            key_id: key_id.into(),
            key,
        }
    }

    fn seal(&self, plaintext: &[u8]) -> TokenVaultResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(self.key.expose_secret()));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|err| TokenVaultError::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

fn write_replica(destination: &Path, target: &Path, sealed: &[u8]) -> TokenVaultResult<()> {
    let parent = target.parent().unwrap_or(destination);
    std::fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(sealed)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| TokenVaultError::Io(err.error))?;
    Ok(())
}

impl Replicator for DirectoryReplicator {
    async fn replicate(&self, artifact: &Path, object: &ObjectRef) -> TokenVaultResult<ReplicaLocation> {
        let target = self.destination.join(object.key_path()?);
        let plaintext = tokio::fs::read(artifact).await?;
        let sealed = self.seal(&plaintext)?;
        let destination = self.destination.clone();
        let written = target.clone();
        tokio::task::spawn_blocking(move || write_replica(&destination, &written, &sealed))
            .await
            .map_err(|err| TokenVaultError::Io(std::io::Error::other(err)))??;
        info!(
            object = %object,
            replica = %target.display(),
            key_id = %self.key_id,
            bytes = plaintext.len(),
            "replica written"
        );
        Ok(ReplicaLocation {
            path: target,
            key_id: self.key_id.clone(),
        })
    }
}

/// Opens a replica produced by [`DirectoryReplicator`].
///
/// # Errors
///
/// Returns [`TokenVaultError::Crypto`] if the replica is truncated, was
/// sealed under another key, or was bound to another key identifier.
pub fn open_replica(key: &SecretKey, key_id: &str, sealed: &[u8]) -> TokenVaultResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(TokenVaultError::Crypto("replica too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose_secret()));
    cipher
        .decrypt(
            XNonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: key_id.as_bytes(),
            },
        )
        .map_err(|err| TokenVaultError::Crypto(err.to_string()))
}
