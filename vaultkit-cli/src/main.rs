//! vaultkit — developer CLI for the encrypted credential store.
//!
//! Drives the store end-to-end over the software-encrypted file backend:
//! useful for inspecting what an app stored and for exercising the engine
//! on hosts without a platform secure store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use tracing_subscriber::EnvFilter;
use vaultkit_core::auth::UnavailableAuthenticator;
use vaultkit_core::backend::{EncryptedFileService, SecureItemService};
use vaultkit_core::{SecureStore, StoreConfig, StoreError, DEFAULT_SERVICE_LABEL};

/// vaultkit — inspect and edit the encrypted credential store.
#[derive(Parser, Debug)]
#[command(name = "vaultkit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Store directory (defaults to the platform data directory).
    #[arg(long, env = "VAULTKIT_DIR")]
    dir: Option<PathBuf>,

    /// Logical store label scoping the keys.
    #[arg(long, default_value = DEFAULT_SERVICE_LABEL)]
    service: String,

    /// Log filter (e.g. `info`, `vaultkit_core=debug`).
    #[arg(long, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a string value under a key.
    Set {
        /// Key to store the value under.
        key: String,
        /// Value to store.
        value: String,
    },

    /// Print the value stored under a key.
    Get {
        /// Key to look up.
        key: String,
    },

    /// Delete the item stored under a key.
    Remove {
        /// Key to delete.
        key: String,
    },

    /// Print the store location and label.
    Info,

    /// Report biometric availability for this host.
    Biometrics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();
    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let dir = match &cli.dir {
        Some(dir) => dir.clone(),
        None => default_dir()?,
    };
    let backend = Arc::new(
        EncryptedFileService::open(&dir).wrap_err("open credential store")?,
    );
    tracing::debug!(dir = %backend.root().display(), "opened credential store");

    let config = StoreConfig {
        service: cli.service.clone(),
        ..StoreConfig::standard()
    };
    let store = SecureStore::new(
        Arc::clone(&backend) as Arc<dyn SecureItemService>,
        Arc::new(UnavailableAuthenticator),
        config,
    );

    match &cli.command {
        Command::Set { key, value } => {
            store.set(key, value)?;
            println!("stored {key}");
        }
        Command::Get { key } => match store.get::<String>(key) {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => println!("null"),
            Err(StoreError::ItemNotFound) => {
                return Err(eyre!("no item stored under {key}"));
            }
            Err(err) => return Err(err.into()),
        },
        Command::Remove { key } => {
            store.remove(key)?;
            println!("removed {key}");
        }
        Command::Info => {
            println!(
                "{}",
                serde_json::json!({
                    "dir": backend.root().display().to_string(),
                    "service": cli.service,
                })
            );
        }
        Command::Biometrics => {
            println!(
                "{}",
                serde_json::json!({
                    "biometrics": store.is_biometrics_available(),
                    "fingerprint": store.is_fingerprint_available(),
                    "face": store.is_face_available(),
                })
            );
        }
    }
    Ok(())
}

fn default_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("vaultkit"))
        .ok_or_else(|| eyre!("no platform data directory; pass --dir"))
}
