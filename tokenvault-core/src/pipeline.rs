//! Per-object orchestration: read, rewrite, hand off, clean up.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader, BufWriter};
use tracing::{error, info};

use crate::error::TokenVaultResult;
use crate::event::{ObjectRef, TriggerEvent};
use crate::replication::{ReplicaLocation, Replicator};
use crate::rewriter::{LineRewriter, RewriteOptions};
use crate::token::TokenGenerator;
use crate::tokenizer::Tokenizer;
use crate::vault::VaultStore;

/// Opens input objects for reading.
pub trait ObjectSource: Send + Sync {
    /// Line reader over an object.
    type Reader: AsyncBufRead + Unpin + Send;

    /// Opens `object`.
    fn open(&self, object: &ObjectRef) -> impl Future<Output = TokenVaultResult<Self::Reader>> + Send;
}

/// Serves objects from `<root>/<location>/<key>`.
#[derive(Debug, Clone)]
pub struct DirectoryObjectSource {
    root: PathBuf,
}

impl DirectoryObjectSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem path backing `object`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TokenVaultError::InvalidEvent`] if the location or
    /// key escapes the root.
    pub fn path_of(&self, object: &ObjectRef) -> TokenVaultResult<PathBuf> {
        Ok(self
            .root
            .join(object.location_path()?)
            .join(object.key_path()?))
    }
}

impl ObjectSource for DirectoryObjectSource {
    type Reader = BufReader<tokio::fs::File>;

    async fn open(&self, object: &ObjectRef) -> TokenVaultResult<Self::Reader> {
        let path = self.path_of(object)?;
        let file = tokio::fs::File::open(&path).await.map_err(|err| {
            std::io::Error::new(err.kind(), format!("{}: {err}", path.display()))
        })?;
        Ok(BufReader::new(file))
    }
}

/// Outcome of one processed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// The processed object.
    pub object: ObjectRef,
    /// Lines written, header included.
    pub lines: u64,
    /// Records tokenized.
    pub records: u64,
    /// Batches flushed.
    pub flushes: u64,
    /// Sum over flushes of distinct accounts resolved.
    pub accounts_resolved: u64,
    /// Where the artifact was replicated.
    pub replica: ReplicaLocation,
}

/// Drives objects through the rewriter and hands finished artifacts to the
/// replicator.
///
/// Working artifacts live in `work_dir` and are removed whether processing
/// succeeds or fails.
#[derive(Debug)]
pub struct PipelineDriver<S, G, O, R> {
    tokenizer: Tokenizer<S, G>,
    source: O,
    replicator: R,
    options: RewriteOptions,
    work_dir: PathBuf,
}

impl<S, G, O, R> PipelineDriver<S, G, O, R>
where
    S: VaultStore,
    G: TokenGenerator,
    O: ObjectSource,
    R: Replicator,
{
    /// Creates a driver writing working artifacts under `work_dir`.
    pub fn new(
        tokenizer: Tokenizer<S, G>,
        source: O,
        replicator: R,
        options: RewriteOptions,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tokenizer,
            source,
            replicator,
            options,
            work_dir: work_dir.into(),
        }
    }

    /// The tokenizer shared by every object.
    #[must_use]
    pub const fn tokenizer(&self) -> &Tokenizer<S, G> {
        &self.tokenizer
    }

    /// Directory holding working artifacts.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Tokenizes `object` into a working artifact and replicates it.
    ///
    /// # Errors
    ///
    /// Any failure is returned as [`crate::TokenVaultError::ProcessingFailed`]
    /// naming the object; no artifact is replicated in that case.
    pub async fn process_object(&self, object: &ObjectRef) -> TokenVaultResult<ProcessReport> {
        let started = Instant::now();
        info!(object = %object, "processing object");
        match self.tokenize_and_replicate(object).await {
            Ok(report) => {
                info!(
                    object = %object,
                    records = report.records,
                    flushes = report.flushes,
                    elapsed_ms = started.elapsed().as_millis(),
                    "object processed"
                );
                Ok(report)
            }
            Err(err) => {
                error!(object = %object, error = %err, "object processing failed");
                Err(err.into_processing_failure(object.to_string()))
            }
        }
    }

    /// Processes every object of `event` in order, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first object that could not be processed.
    pub async fn handle_event(&self, event: &TriggerEvent) -> TokenVaultResult<Vec<ProcessReport>> {
        let mut reports = Vec::with_capacity(event.objects.len());
        for object in &event.objects {
            reports.push(self.process_object(object).await?);
        }
        Ok(reports)
    }

    async fn tokenize_and_replicate(&self, object: &ObjectRef) -> TokenVaultResult<ProcessReport> {
        let input = self.source.open(object).await?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        // Deleted on drop, so an early return leaves nothing behind.
        let working = tempfile::Builder::new()
            .prefix("tokenized-")
            .suffix(".csv")
            .tempfile_in(&self.work_dir)?;
        let mut writer = BufWriter::new(tokio::fs::File::from_std(working.as_file().try_clone()?));

        let stats = LineRewriter::new(&self.tokenizer, self.options)
            .run(input, &mut writer)
            .await?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        let replica = self.replicator.replicate(working.path(), object).await?;
        working.close()?;

        Ok(ProcessReport {
            object: object.clone(),
            lines: stats.lines,
            records: stats.records,
            flushes: stats.flushes,
            accounts_resolved: stats.accounts_resolved,
            replica,
        })
    }
}
