//! VaultGate CLI - serve encrypted vaults over HTTP.
//!
//! `serve` runs the web gateway, `check` validates a configuration file,
//! `ls` unlocks a configured vault locally and lists one directory, and
//! `init` creates an empty vault for the in-process adapter.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vaultgate_app::AppConfig;
use vaultgate_common::{Passphrase, VaultPath};
use vaultgate_crypto::KdfParams;
use vaultgate_vault::{format, VaultAdapter};

#[derive(Parser)]
#[command(name = "vaultgate")]
#[command(about = "VaultGate - Browse encrypted vaults from a web browser")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway.
    Serve {
        /// Configuration file.
        #[arg(short, long, env = "VAULTGATE_CONFIG")]
        config: PathBuf,
    },

    /// Validate a configuration file and print its vaults.
    Check {
        /// Configuration file.
        #[arg(short, long, env = "VAULTGATE_CONFIG")]
        config: PathBuf,
    },

    /// Unlock a configured vault and list a directory.
    Ls {
        /// Configuration file.
        #[arg(short, long, env = "VAULTGATE_CONFIG")]
        config: PathBuf,

        /// Vault id from the configuration.
        #[arg(long)]
        vault: String,

        /// Directory within the vault.
        #[arg(short, long, default_value = "/")]
        path: String,
    },

    /// Create an empty vault for the in-process adapter.
    Init {
        /// Directory to create the vault in.
        #[arg(short, long)]
        path: PathBuf,

        /// Key derivation strength.
        #[arg(short, long, value_enum, default_value = "moderate")]
        strength: Strength,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Strength {
    Interactive,
    Moderate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Serve { config } => cmd_serve(&config).await,
        Commands::Check { config } => cmd_check(&config),
        Commands::Ls {
            config,
            vault,
            path,
        } => cmd_ls(config, vault, path).await,
        Commands::Init { path, strength } => cmd_init(path, strength).await,
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("Invalid configuration {}", path.display()))
}

/// Prompt for a passphrase without echoing it.
fn prompt_passphrase(prompt: &str) -> Result<Passphrase> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(Passphrase::new(passphrase))
}

async fn cmd_serve(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    info!(config = %path.display(), "Starting VaultGate");
    vaultgate_http::run(config).await.context("Server failed")
}

fn cmd_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    println!("Configuration OK: {}", path.display());
    println!("  Bind: {}", config.bind);
    println!("  Adapter: {:?}", config.adapter);
    println!("  Session TTL: {}s", config.session_ttl_seconds);
    println!("  Vaults:");
    for vault in &config.vaults {
        let marker = if vault.path.is_dir() { "" } else { " (missing)" };
        println!("    {} -> {}{}", vault.id, vault.path.display(), marker);
    }
    Ok(())
}

async fn cmd_ls(config_path: PathBuf, vault_id: String, dir: String) -> Result<()> {
    let config = load_config(&config_path)?;
    let vault = config
        .vault(&vault_id)
        .with_context(|| format!("Vault '{}' is not configured", vault_id))?
        .clone();
    let dir_path = VaultPath::parse(&dir).context("Invalid directory path")?;
    let passphrase = prompt_passphrase("Passphrase: ")?;

    let adapter = VaultAdapter::from_kind(config.adapter, config.mount.clone());
    let entries = tokio::task::spawn_blocking(move || {
        let mut handle = adapter.open(&vault, &passphrase)?;
        let listed = adapter.list_dir(&handle, &dir_path);
        adapter.close(&mut handle);
        listed
    })
    .await
    .context("Listing task failed")?
    .context("Failed to list directory")?;

    if entries.is_empty() {
        println!("Directory is empty.");
    } else {
        println!("Contents of {}:", dir);
        for entry in entries {
            match entry.size {
                Some(size) if !entry.is_dir => println!("  [FILE] {} ({} bytes)", entry.name, size),
                _ => println!("  [DIR]  {}/", entry.name),
            }
        }
    }
    Ok(())
}

async fn cmd_init(path: PathBuf, strength: Strength) -> Result<()> {
    let passphrase = prompt_passphrase("Enter passphrase: ")?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;
    if passphrase.as_bytes() != confirm.as_bytes() {
        anyhow::bail!("Passphrases do not match");
    }
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }

    let kdf = match strength {
        Strength::Interactive => KdfParams::interactive(),
        Strength::Moderate => KdfParams::moderate(),
    };
    let root = path.clone();
    tokio::task::spawn_blocking(move || format::initialize(&root, &passphrase, kdf))
        .await
        .context("Init task failed")?
        .context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  Location: {}", path.display());
    Ok(())
}
