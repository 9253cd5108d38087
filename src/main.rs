//! SMS Relay CLI
//!
//! Classify messages, relay batches to the webhook and manage settings.

use clap::{Parser, Subcommand, ValueEnum};
use sms_relay::classifier::classify;
use sms_relay::clock::SystemClock;
use sms_relay::config::{Config, TIMESTAMP_FORMAT};
use sms_relay::delivery::{is_valid_webhook_url, DeliveryClient};
use sms_relay::dispatcher::{Dispatcher, TokioSpawner};
use sms_relay::messages::{read_messages, IncomingMessage};
use sms_relay::store::{ConfigStore, ExportedConfig, FileStore};
use sms_relay::{Error, Result};
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// SMS Relay - forward verification codes to a chat webhook
#[derive(Parser)]
#[command(name = "sms-relay")]
#[command(about = "Classify short messages and relay them to a chat webhook")]
struct Cli {
    /// State directory (defaults to ~/.sms-relay)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a message body and print the result as JSON
    Classify {
        /// Message text
        body: String,

        /// Sender number or short code
        #[arg(short, long, default_value = "")]
        sender: String,
    },

    /// Relay a batch of JSON-lines messages (stdin by default)
    Relay {
        /// Read messages from a file instead of stdin
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
    },

    /// Send a test notification to the configured webhook
    Test,

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show forward counters
    Stats,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print current settings
    Show,

    /// Set the webhook URL
    SetUrl { url: String },

    /// Enable forwarding
    Enable,

    /// Disable forwarding
    Disable,

    /// Forward only verification codes
    OnlyCodes {
        #[arg(value_enum)]
        mode: Toggle,
    },

    /// Print settings as JSON (without counters)
    Export,

    /// Load settings from a JSON file produced by `export`
    Import { file: PathBuf },

    /// Reset all settings and counters
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.home {
        Some(home) => Config::with_home(home),
        None => Config::default(),
    };

    match cli.command {
        Commands::Classify { body, sender } => cmd_classify(&body, &sender),
        Commands::Relay { file } => cmd_relay(&config, file.as_deref()),
        Commands::Test => cmd_test(&config),
        Commands::Config { action } => cmd_config(&config, action),
        Commands::Stats => cmd_stats(&config),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_classify(body: &str, sender: &str) -> Result<()> {
    let result = classify(body, sender);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn load_batch(file: Option<&Path>) -> Result<Vec<IncomingMessage>> {
    let messages = match file {
        Some(path) => {
            let f = fs::File::open(path).map_err(|e| {
                Error::Config(format!("Cannot open {}: {}", path.display(), e))
            })?;
            read_messages(BufReader::new(f))?
        }
        None => read_messages(io::stdin().lock())?,
    };
    Ok(messages)
}

fn cmd_relay(config: &Config, file: Option<&Path>) -> Result<()> {
    let messages = load_batch(file)?;
    let store = Arc::new(FileStore::open(config)?);

    let forward_config = store.get();
    if !forward_config.is_complete() {
        warn!("Relay is disabled or has no webhook URL; nothing will be sent");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(async {
        let client = Arc::new(DeliveryClient::from_config(config)?);
        let spawner = Arc::new(TokioSpawner::current());
        let dispatcher = Dispatcher::new(
            client,
            store.clone(),
            Arc::new(SystemClock),
            spawner.clone(),
        );

        info!("Relaying {} messages", messages.len());
        let summary = dispatcher.process_batch(&messages, &forward_config);
        spawner.drain().await;
        Ok::<_, Error>(summary)
    })?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    println!("Total forwarded: {}", store.stats().total_forwarded);
    Ok(())
}

fn cmd_test(config: &Config) -> Result<()> {
    let store = FileStore::open(config)?;
    let forward_config = store.get();
    if !forward_config.is_complete() {
        return Err(Error::Config(
            "Relay is disabled or has no webhook URL (use `config set-url` and `config enable`)"
                .to_string(),
        ));
    }
    let url = forward_config.destination_url;

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async {
        let client = DeliveryClient::from_config(config)?;
        Ok::<_, Error>(client.send_test_message(&url, &SystemClock).await)
    })?;

    let attempts = outcome.attempts_made;
    outcome.into_result()?;
    println!("Test message delivered ({} attempt(s))", attempts);
    Ok(())
}

fn cmd_config(config: &Config, action: ConfigAction) -> Result<()> {
    let store = FileStore::open(config)?;

    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
        }
        ConfigAction::SetUrl { url } => {
            let url = url.trim().to_string();
            if !is_valid_webhook_url(&url) {
                return Err(Error::Config(format!("Not a recognized webhook URL: {}", url)));
            }
            store.update(|s| s.webhook_url = url)?;
            println!("Webhook URL saved");
        }
        ConfigAction::Enable => {
            store.update(|s| s.enabled = true)?;
            println!("Forwarding enabled");
        }
        ConfigAction::Disable => {
            store.update(|s| s.enabled = false)?;
            println!("Forwarding disabled");
        }
        ConfigAction::OnlyCodes { mode } => {
            let on = matches!(mode, Toggle::On);
            store.update(|s| s.only_verification_codes = on)?;
            println!("Verification-only mode {}", if on { "on" } else { "off" });
        }
        ConfigAction::Export => {
            println!("{}", serde_json::to_string_pretty(&store.export_config())?);
        }
        ConfigAction::Import { file } => {
            let content = fs::read_to_string(&file).map_err(|e| {
                Error::Config(format!("Cannot read {}: {}", file.display(), e))
            })?;
            let imported: ExportedConfig = serde_json::from_str(&content)?;
            store.import_config(&imported)?;
            println!("Settings imported from {}", file.display());
        }
        ConfigAction::Clear => {
            store.clear()?;
            println!("Settings cleared");
        }
    }

    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    let store = FileStore::open(config)?;
    let stats = store.stats();

    println!("Total forwarded: {}", stats.total_forwarded);
    match stats.last_forward_time {
        Some(at) => println!("Last forward:    {}", at.format(TIMESTAMP_FORMAT)),
        None => println!("Last forward:    never"),
    }
    println!("Enabled:         {}", stats.enabled);
    println!("Config complete: {}", stats.config_complete);
    Ok(())
}
