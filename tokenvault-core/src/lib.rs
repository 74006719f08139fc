//! `tokenvault-core` replaces the account column of delimited files with
//! stable, vault-backed tokens.
//!
//! Lines are buffered into batches, the distinct accounts of each batch are
//! resolved through a shared [`TokenCache`] and the [`TokenVaultClient`],
//! unknown accounts get a freshly minted token that is persisted before it is
//! ever emitted, and the rewritten lines are written out in input order.
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod error;
pub use error::*;

mod types;
pub use types::*;

pub mod cache;
pub use cache::TokenCache;

pub mod config;
pub use config::PipelineConfig;

pub mod event;
pub use event::{ObjectRef, TriggerEvent};

pub mod keys;

/// Tracing setup.
pub mod logger;

pub mod pipeline;
pub use pipeline::{DirectoryObjectSource, ObjectSource, PipelineDriver, ProcessReport};

pub mod record;

pub mod replication;
pub use replication::{DirectoryReplicator, ReplicaLocation, Replicator};

mod retry;
pub use retry::RetryPolicy;

pub mod rewriter;
pub use rewriter::{LineRewriter, RewriteOptions, RewriteStats, RewriterState};

pub mod token;
pub use token::{KeyedTokenGenerator, RandomTokenGenerator, TokenGenerator};

pub mod tokenizer;
pub use tokenizer::Tokenizer;

pub mod vault;
pub use vault::{
    FileVaultStore, InMemoryVaultStore, TokenVaultClient, VaultLimits, VaultStore, WriteOutcome,
};
