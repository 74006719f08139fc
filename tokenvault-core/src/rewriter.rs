//! Streaming line rewriter: buffers records, tokenizes per batch, emits in order.

use std::collections::HashSet;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{TokenVaultError, TokenVaultResult};
use crate::record::{Record, RecordLayout};
use crate::token::TokenGenerator;
use crate::tokenizer::Tokenizer;
use crate::types::AccountValue;
use crate::vault::VaultStore;

/// Rewriter options derived from the pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Record layout.
    pub layout: RecordLayout,
    /// Buffered records that trigger a flush.
    pub batch_threshold: usize,
    /// Emit the first line untouched.
    pub has_header: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            layout: RecordLayout::default(),
            batch_threshold: 100,
            has_header: false,
        }
    }
}

impl From<&PipelineConfig> for RewriteOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            layout: RecordLayout::from(config),
            batch_threshold: config.batch_threshold,
            has_header: config.has_header,
        }
    }
}

/// Lifecycle of a [`LineRewriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriterState {
    /// Nothing read yet.
    Idle,
    /// Reading records into the buffer.
    Accumulating,
    /// Resolving and emitting the buffered batch.
    Flushing,
    /// Input exhausted and every record emitted.
    Done,
}

/// Counters reported once the input is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Lines written, header included.
    pub lines: u64,
    /// Records whose account field was tokenized.
    pub records: u64,
    /// Completed flushes.
    pub flushes: u64,
    /// Sum over flushes of the distinct accounts resolved.
    pub accounts_resolved: u64,
}

/// Turns input lines into tokenized output lines, one batch at a time.
///
/// Output order always matches input order. A flush either emits its whole
/// batch or nothing; the buffer and pending set are only cleared after the
/// batch has been written.
#[derive(Debug)]
pub struct LineRewriter<'t, S, G> {
    tokenizer: &'t Tokenizer<S, G>,
    options: RewriteOptions,
    buffer: Vec<Record>,
    pending: HashSet<AccountValue>,
    state: RewriterState,
    line_number: u64,
    stats: RewriteStats,
}

impl<'t, S: VaultStore, G: TokenGenerator> LineRewriter<'t, S, G> {
    /// Creates an idle rewriter.
    #[must_use]
    pub fn new(tokenizer: &'t Tokenizer<S, G>, options: RewriteOptions) -> Self {
        let threshold = options.batch_threshold.max(1);
        Self {
            tokenizer,
            options: RewriteOptions {
                batch_threshold: threshold,
                ..options
            },
            buffer: Vec::with_capacity(threshold),
            pending: HashSet::with_capacity(threshold),
            state: RewriterState::Idle,
            line_number: 0,
            stats: RewriteStats::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RewriterState {
        self.state
    }

    /// Records buffered and not yet emitted.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> RewriteStats {
        self.stats
    }

    /// Feeds one raw input line, terminator included.
    ///
    /// # Errors
    ///
    /// Returns [`TokenVaultError::MalformedRecord`] for a line without the
    /// account field, [`TokenVaultError::NonUtf8Account`] for an account
    /// field that is not UTF-8, or the failure of a triggered flush.
    pub async fn push_line<W>(&mut self, line: Vec<u8>, out: &mut W) -> TokenVaultResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if self.state == RewriterState::Done {
            return Err(TokenVaultError::Io(std::io::Error::other(
                "line pushed after the rewriter finished",
            )));
        }
        self.line_number += 1;

        if self.state == RewriterState::Idle {
            self.state = RewriterState::Accumulating;
            if self.options.has_header {
                out.write_all(&line).await?;
                if !line.ends_with(b"\n") {
                    out.write_all(b"\n").await?;
                }
                self.stats.lines += 1;
                return Ok(());
            }
        }

        let record = Record::parse(line, self.line_number, &self.options.layout)?;
        self.pending.insert(record.account().to_string());
        self.buffer.push(record);
        if self.buffer.len() >= self.options.batch_threshold {
            self.flush(out).await?;
        }
        Ok(())
    }

    /// Flushes whatever is buffered and moves to [`RewriterState::Done`].
    ///
    /// # Errors
    ///
    /// Returns the failure of the final flush.
    pub async fn finish<W>(&mut self, out: &mut W) -> TokenVaultResult<RewriteStats>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.flush(out).await?;
        self.state = RewriterState::Done;
        Ok(self.stats)
    }

    /// Drives the rewriter over `input` until it is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first read, parse, tokenization or write failure.
    pub async fn run<R, W>(mut self, mut input: R, out: &mut W) -> TokenVaultResult<RewriteStats>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            let mut line = Vec::new();
            if input.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            self.push_line(line, out).await?;
        }
        self.finish(out).await
    }

    async fn flush<W>(&mut self, out: &mut W) -> TokenVaultResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.state = RewriterState::Flushing;

        let tokens = self.tokenizer.resolve(&self.pending).await?;
        let mut rendered = Vec::with_capacity(self.buffer.iter().map(|r| r.line().len() + 48).sum());
        for record in &self.buffer {
            let token = tokens.get(record.account()).ok_or_else(|| {
                TokenVaultError::TokenPersistenceFailed {
                    accounts: vec![record.account().to_string()],
                    reason: "tokenizer returned no token for a buffered account".to_string(),
                }
            })?;
            record.render_into(token, &mut rendered);
        }
        out.write_all(&rendered).await?;

        let records = self.buffer.len() as u64;
        self.stats.lines += records;
        self.stats.records += records;
        self.stats.flushes += 1;
        self.stats.accounts_resolved += self.pending.len() as u64;
        debug!(
            records,
            accounts = self.pending.len(),
            flush = self.stats.flushes,
            "flushed batch"
        );

        self.buffer.clear();
        self.pending.clear();
        self.state = RewriterState::Accumulating;
        Ok(())
    }
}
