//! Key administration for a sealed journal database.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use journal_storage::{Journal, JournalConfig};
use journal_vault::KeyId;
use std::path::PathBuf;
use tracing::{error, info};
use zeroize::Zeroizing;

/// Read instead of prompting when set.
const PASSPHRASE_ENV: &str = "JOURNAL_PASSPHRASE";

#[derive(Parser)]
#[command(name = "journal-admin")]
#[command(about = "Manage encryption keys of a sealed journal", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long)]
    db: Option<PathBuf>,

    /// Blob directory, overriding the config
    #[arg(long)]
    blob_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keypair. New fields are sealed under the newest key.
    GenerateKey,

    /// List stored keys, newest first
    ListKeys,

    /// Write the public key and the wrapped private key to a directory
    ExportKeys {
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Key to export; defaults to the newest
        #[arg(long)]
        key: Option<String>,
    },

    /// Check that a passphrase unlocks the newest key
    VerifyPassphrase,

    /// Remove idle sessions
    PurgeSessions,
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(Cli::parse()) {
        error!(error = %format!("{e:#}"), "command failed");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<JournalConfig> {
    let mut config = match &cli.config {
        Some(path) => JournalConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => JournalConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(root) = &cli.blob_root {
        config.blob_root = Some(root.clone());
        config.blobs_in_database = false;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<()> {
    let journal = Journal::open(load_config(&cli)?)?;
    let vault = journal.vault();

    match cli.command {
        Commands::GenerateKey => {
            let passphrase = prompt_passphrase_twice("New passphrase: ")?;
            let record = vault.generate_and_store(&passphrase)?;
            info!(key = %record.id, "generated keypair");
            println!("{}", record.id);
        }
        Commands::ListKeys => {
            let records = vault.list()?;
            if records.is_empty() {
                println!("no keys");
            }
            for record in records {
                println!("{}  {}", record.id, record.created_at.to_rfc3339());
            }
        }
        Commands::ExportKeys { out, key } => {
            let id = match key {
                Some(text) => text.parse::<KeyId>()?,
                None => {
                    vault
                        .active_key()?
                        .ok_or_else(|| anyhow!("no keys to export"))?
                        .id
                }
            };
            let export = vault.export(&id)?;
            let (public_path, private_path) = export.write_to(&out)?;
            info!(key = %id, out = %out.display(), "exported key");
            println!("{}", public_path.display());
            println!("{}", private_path.display());
        }
        Commands::VerifyPassphrase => {
            let record = vault
                .active_key()?
                .ok_or_else(|| anyhow!("no keys in vault"))?;
            let passphrase = prompt_passphrase("Passphrase: ")?;
            match vault.unwrap_private_key(&record, &passphrase) {
                Ok(_) => println!("ok: passphrase unlocks key {}", record.id),
                Err(e) if e.is_invalid_password() => {
                    info!(key = %record.id, "passphrase rejected");
                    bail!("invalid password")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::PurgeSessions => {
            let purged = journal.purge_expired_sessions()?;
            info!(purged, "purged idle sessions");
            println!("purged {purged} sessions");
        }
    }
    Ok(())
}

fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        if !passphrase.is_empty() {
            return Ok(Zeroizing::new(passphrase));
        }
    }
    let passphrase = rpassword::prompt_password(prompt)
        .map_err(|e| anyhow!("passphrase prompt: {e}"))?;
    Ok(Zeroizing::new(passphrase))
}

fn prompt_passphrase_twice(prompt: &str) -> Result<Zeroizing<String>> {
    if std::env::var(PASSPHRASE_ENV).is_ok_and(|p| !p.is_empty()) {
        return prompt_passphrase(prompt);
    }
    let first = prompt_passphrase(prompt)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm passphrase: ")
            .map_err(|e| anyhow!("passphrase prompt: {e}"))?,
    );
    if *first != *second {
        bail!("passphrases do not match");
    }
    Ok(first)
}
