//! QuMail Command Line Interface
//!
//! Operator tool for checking the Key Manager, requesting quantum keys and
//! running the encryption engine on message bodies.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use qumail_core::{decrypt, encrypt_at_level, EncryptedEnvelope};
use qumail_km::{in_memory_stack, KmClient, KeyManagerApi, QuMailConfig, SealedMessage};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(
    name = "qumail",
    about = "QuMail - quantum key backed message encryption",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level for QuMail crates
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Check Key Manager liveness
    Status,
    /// Request a quantum key and show its summary.
    ///
    /// Keys live in an in-memory store that is dropped when the command
    /// exits, so the issued key is not kept; use this to check that issuance
    /// works end to end.
    RequestKey {
        /// Requesting party
        #[arg(long)]
        owner: String,
        /// Counterpart identity the key is shared with
        #[arg(long)]
        peer: String,
        /// Key length in bytes
        #[arg(short, long, default_value = "256")]
        length: usize,
    },
    /// Encrypt a message with the engine directly
    Encrypt {
        /// Security level (1-4)
        #[arg(short, long)]
        level: u8,
        /// Message text
        message: String,
        /// File holding hex-encoded quantum key material (levels 1 and 2)
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },
    /// Decrypt an envelope file
    Decrypt {
        /// Envelope JSON file
        envelope: PathBuf,
        /// File holding hex-encoded quantum key material (levels 1 and 2)
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },
    /// Encrypt a message, obtaining the quantum key from the Key Manager
    Seal {
        /// Sending party
        #[arg(long)]
        owner: String,
        /// Recipient identity
        #[arg(long)]
        peer: String,
        /// Security level (1-4)
        #[arg(short, long, default_value = "2")]
        level: u8,
        /// Message text
        message: String,
        /// Write the sealed message here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Decrypt a sealed message, retrieving its quantum key by id
    Open {
        /// Sealed message JSON file
        sealed: PathBuf,
        /// Identity of the sender as known to the Key Manager
        #[arg(long)]
        sender_sae_id: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "qumail_km={},qumail_core={}",
            cli.log_level, cli.log_level
        ))
        .init();

    // init writes the file that would otherwise be loaded here
    if let Commands::Config {
        action: ConfigAction::Init { output },
    } = &cli.command
    {
        if let Err(e) = handle_config_init(output.clone(), cli.config.as_deref()) {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Status => handle_status(&config).await,
        Commands::RequestKey {
            owner,
            peer,
            length,
        } => handle_request_key(&config, &owner, &peer, length).await,
        Commands::Encrypt {
            level,
            message,
            key_file,
        } => handle_encrypt(level, &message, key_file.as_deref()),
        Commands::Decrypt { envelope, key_file } => handle_decrypt(&envelope, key_file.as_deref()),
        Commands::Seal {
            owner,
            peer,
            level,
            message,
            output,
        } => handle_seal(&config, &owner, &peer, level, &message, output.as_deref()).await,
        Commands::Open {
            sealed,
            sender_sae_id,
        } => handle_open(&config, &sealed, &sender_sae_id).await,
        Commands::Config { action } => handle_config(&config, cli.config.as_deref(), action),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<QuMailConfig> {
    let mut config = match path {
        Some(path) => QuMailConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let default_path = QuMailConfig::default_config_path();
            if default_path.exists() {
                QuMailConfig::load_from_file(&default_path)
                    .context("Failed to load default configuration")?
            } else {
                QuMailConfig::default()
            }
        }
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn handle_status(config: &QuMailConfig) -> Result<()> {
    let client = KmClient::new(config.km.clone())?;
    let status = client.check_connection().await;

    println!("Key Manager: {}", config.km.base_url);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn handle_request_key(
    config: &QuMailConfig,
    owner: &str,
    peer: &str,
    length: usize,
) -> Result<()> {
    let crypto = in_memory_stack(config)?;
    let record = crypto.keys().get_key(owner, peer, length).await?;

    info!(key_id = %record.key_id(), "Key request complete");
    let summary = record.summary(Utc::now());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn handle_encrypt(level: u8, message: &str, key_file: Option<&Path>) -> Result<()> {
    let key = key_file.map(read_key_file).transpose()?;
    let envelope = encrypt_at_level(message.as_bytes(), level, key.as_ref().map(|k| k.as_slice()))?;
    if envelope.embeds_decryption_key() {
        eprintln!("Warning: level {level} envelopes carry their own decryption key");
    }
    println!("{}", envelope.to_json()?);
    Ok(())
}

fn handle_decrypt(envelope_path: &Path, key_file: Option<&Path>) -> Result<()> {
    let json = std::fs::read_to_string(envelope_path)
        .with_context(|| format!("Failed to read {}", envelope_path.display()))?;
    let envelope = EncryptedEnvelope::from_json(&json)?;
    let key = key_file.map(read_key_file).transpose()?;

    let plaintext = Zeroizing::new(decrypt(&envelope, key.as_ref().map(|k| k.as_slice()))?);
    println!("{}", String::from_utf8_lossy(&plaintext));
    Ok(())
}

async fn handle_seal(
    config: &QuMailConfig,
    owner: &str,
    peer: &str,
    level: u8,
    message: &str,
    output: Option<&Path>,
) -> Result<()> {
    let crypto = in_memory_stack(config)?;
    let sealed = crypto
        .seal_at_level(owner, peer, message.as_bytes(), level)
        .await?;
    let json = serde_json::to_string_pretty(&sealed)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Sealed message written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn handle_open(config: &QuMailConfig, sealed_path: &Path, sender_sae_id: &str) -> Result<()> {
    let json = std::fs::read_to_string(sealed_path)
        .with_context(|| format!("Failed to read {}", sealed_path.display()))?;
    let sealed: SealedMessage = serde_json::from_str(&json).context("Malformed sealed message")?;

    let crypto = in_memory_stack(config)?;
    let plaintext = Zeroizing::new(crypto.open(&sealed, sender_sae_id).await?);
    println!("{}", String::from_utf8_lossy(&plaintext));
    Ok(())
}

fn handle_config(config: &QuMailConfig, path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{config:#?}");
        }
        ConfigAction::Init { output } => {
            handle_config_init(output, path)?;
        }
        ConfigAction::Validate => {
            config.validate().map_err(|e| anyhow!(e))?;
            println!("Configuration is valid");
        }
    }
    Ok(())
}

fn handle_config_init(output: Option<PathBuf>, config_path: Option<&Path>) -> Result<PathBuf> {
    let output = output
        .or_else(|| config_path.map(Path::to_path_buf))
        .unwrap_or_else(QuMailConfig::default_config_path);
    if output.exists() {
        bail!("{} already exists", output.display());
    }
    QuMailConfig::default().save_to_file(&output)?;
    println!("Configuration written to {}", output.display());
    Ok(output)
}

fn read_key_file(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let encoded = Zeroizing::new(
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?,
    );
    let key = hex::decode(encoded.trim()).context("Key file must contain hex")?;
    Ok(Zeroizing::new(key))
}
