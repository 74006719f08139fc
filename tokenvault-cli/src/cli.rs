use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tokenize the account column of delimited files against a token vault.
#[derive(Parser, Debug)]
#[command(name = "tokenvault", version, about)]
pub struct Cli {
    /// Directory holding input locations, vault files and replica destinations
    #[arg(long, env = "TOKENVAULT_DATA_ROOT", default_value = ".")]
    pub data_root: PathBuf,

    /// Directory for working artifacts (defaults to the system temp dir)
    #[arg(long, env = "TOKENVAULT_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Hex-encoded 32-byte key sealing replicas
    #[arg(long, env = "TOKENVAULT_REPLICA_KEY", hide_env_values = true)]
    pub replica_key: Option<String>,

    /// Hex-encoded 32-byte key for deterministic keyed tokens; random tokens when unset
    #[arg(long, env = "TOKENVAULT_TOKEN_KEY", hide_env_values = true)]
    pub token_key: Option<String>,

    /// Tracing filter (e.g. "info,tokenvault_core=debug"); `RUST_LOG` takes precedence
    #[arg(long)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Tokenize a single object
    Process {
        /// Location (bucket) holding the object
        #[arg(long)]
        location: String,
        /// Object key within the location
        #[arg(long)]
        key: String,
    },
    /// Tokenize every object named in a change notification
    Event {
        /// Notification JSON file, or `-` for stdin
        path: PathBuf,
    },
    /// Decrypt a replica to stdout
    OpenReplica {
        /// Replica file
        path: PathBuf,
        /// Key identifier the replica was sealed under
        #[arg(long, env = "SENSIBLE_KEY_ID")]
        key_id: String,
    },
    /// Print a fresh hex-encoded 32-byte key
    GenerateKey,
}
