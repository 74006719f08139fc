//! `tokenvault`: tokenize objects under a local data root.
//!
//! Objects are read from `<data-root>/<location>/<key>`, the vault lives in
//! `<data-root>/<TOKEN_VAULT_TABLE>.vault` and sealed replicas are written to
//! `<data-root>/<DESTINATION_BUCKET>/<key>`.

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use eyre::{eyre, Result, WrapErr};
use secrecy::ExposeSecret;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use tokenvault_core::{
    keys, logger, replication, DirectoryObjectSource, DirectoryReplicator, FileVaultStore,
    KeyedTokenGenerator, PipelineConfig, PipelineDriver, RandomTokenGenerator, RewriteOptions,
    TokenCache, TokenGenerator, TokenVaultClient, Tokenizer, TriggerEvent, VaultLimits,
};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init_tracing(cli.log_filter.as_deref())?;

    match &cli.command {
        Command::Process { location, key } => {
            run_event(&cli, &TriggerEvent::single(location.clone(), key.clone())).await
        }
        Command::Event { path } => {
            let json = read_input(path).await?;
            let event = TriggerEvent::from_notification_json(&json)
                .wrap_err_with(|| format!("parsing notification {}", path.display()))?;
            run_event(&cli, &event).await
        }
        Command::OpenReplica { path, key_id } => {
            let key = replica_key(&cli)?;
            let sealed = tokio::fs::read(path)
                .await
                .wrap_err_with(|| format!("reading replica {}", path.display()))?;
            let plaintext = replication::open_replica(&key, key_id, &sealed)?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&plaintext).await?;
            stdout.flush().await?;
            Ok(())
        }
        Command::GenerateKey => {
            println!("{}", hex::encode(keys::random_key().expose_secret()));
            Ok(())
        }
    }
}

fn replica_key(cli: &Cli) -> Result<keys::SecretKey> {
    let hex_key = cli
        .replica_key
        .as_deref()
        .ok_or_else(|| eyre!("--replica-key or TOKENVAULT_REPLICA_KEY is required"))?;
    Ok(keys::key_from_hex(hex_key, "replica key")?)
}

async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("reading {}", path.display()))
}

async fn run_event(cli: &Cli, event: &TriggerEvent) -> Result<()> {
    let config = PipelineConfig::from_env().wrap_err("loading pipeline configuration")?;
    match cli.token_key.as_deref() {
        Some(hex_key) => {
            let key = keys::key_from_hex(hex_key, "token key")?;
            run_pipeline(cli, &config, KeyedTokenGenerator::new(key), event).await
        }
        None => run_pipeline(cli, &config, RandomTokenGenerator::default(), event).await,
    }
}

async fn run_pipeline<G: TokenGenerator>(
    cli: &Cli,
    config: &PipelineConfig,
    generator: G,
    event: &TriggerEvent,
) -> Result<()> {
    let vault_path = cli
        .data_root
        .join(format!("{}.vault", config.vault_identifier));
    let store = FileVaultStore::open(&vault_path)
        .wrap_err_with(|| format!("opening vault {}", vault_path.display()))?;
    let client = TokenVaultClient::new(store, VaultLimits::from(config), config.retry)?;
    let tokenizer = Tokenizer::new(client, generator, Arc::new(TokenCache::new()), config.retry);

    let replicator = DirectoryReplicator::new(
        cli.data_root.join(&config.destination_location),
        config.encryption_key_identifier.clone(),
        replica_key(cli)?,
    );
    let work_dir = cli.work_dir.clone().unwrap_or_else(std::env::temp_dir);
    let driver = PipelineDriver::new(
        tokenizer,
        DirectoryObjectSource::new(&cli.data_root),
        replicator,
        RewriteOptions::from(config),
        work_dir,
    );

    let reports = driver.handle_event(event).await?;
    for report in &reports {
        info!(
            object = %report.object,
            replica = %report.replica.path.display(),
            records = report.records,
            "done"
        );
        println!(
            "{} -> {} ({} records, {} batches)",
            report.object,
            report.replica.path.display(),
            report.records,
            report.flushes
        );
    }
    Ok(())
}
