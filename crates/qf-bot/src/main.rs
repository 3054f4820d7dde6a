//! qf-bot: forwards quoted images back to your own WhatsApp chat
//!
//! Usage:
//!   qf-bot                  - Link with a pairing code and run
//!   qf-bot --qr             - Link by scanning a QR code instead
//!   qf-bot --config <path>  - Use a specific configuration file
//!   qf-bot --help           - Show help

mod prompt;

use std::sync::Arc;

use qf_core::{Config, MultiFileAuthStore, PairingMode};
use qf_whatsapp::{WebConnector, WhatsAppBot, WhatsAppError};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    Run {
        qr: bool,
        config_path: Option<String>,
    },
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (qr, config_path) = match parse_args(&args)? {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("qf-bot {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Run { qr, config_path } => (qr, config_path),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenvy::dotenv().ok();

    let mut config = match &config_path {
        Some(path) => Config::from_toml_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    if qr {
        config.whatsapp.pairing_mode = PairingMode::Qr;
    }

    let Some(input) = prompt::read_phone_number()? else {
        return Ok(());
    };
    let operator = match prompt::parse_operator(&input) {
        Ok(operator) => operator,
        Err(message) => {
            println!("{}", message);
            return Ok(());
        }
    };
    println!("Your JID is: {}", operator.jid());

    tracing::info!("Starting qf-bot...");
    tracing::info!("Auth directory: {}", config.whatsapp.auth_dir);
    tracing::info!("Linking with: {}", config.whatsapp.pairing_mode);

    let store = MultiFileAuthStore::new(&config.whatsapp.auth_dir);
    let connector = WebConnector::new(&config.whatsapp.version_url, store.session_db())
        .map_err(|e| anyhow::anyhow!("Failed to create WhatsApp client: {}", e))?;

    let bot = WhatsAppBot::new(Arc::new(connector), operator, &config);

    tokio::select! {
        result = bot.run() => match result {
            Ok(()) => Ok(()),
            Err(WhatsAppError::PairingTimeout) => {
                tracing::error!("Pairing code expired");
                std::process::exit(1);
            }
            Err(e) => Err(anyhow::anyhow!("WhatsApp bot error: {}", e)),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            Ok(())
        }
    }
}

/// Parse command line arguments (without the program name)
fn parse_args(args: &[String]) -> anyhow::Result<RunMode> {
    let mut qr = false;
    let mut config_path = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--qr" => qr = true,
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(path.clone());
            }
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(RunMode::Run { qr, config_path })
}

/// Print help message
fn print_help() {
    println!("qf-bot - forward quoted images to your own WhatsApp chat");
    println!();
    println!("Usage:");
    println!("  qf-bot                  Link with a pairing code and run");
    println!("  qf-bot --qr             Link by scanning a QR code");
    println!("  qf-bot --config <path>  Read configuration from <path> (default: qf-bot.toml)");
    println!("  qf-bot --help           Show this help message");
    println!("  qf-bot --version        Show version");
    println!();
    println!("Environment Variables:");
    println!("  WA_AUTH_DIR               Credential directory (default: auth_info)");
    println!("  WA_PAIRING_MODE           code or qr (default: code)");
    println!("  FORWARD_DELAY_MS          Delay before forwarding an image (default: 1000)");
    println!("  RECONNECT_DELAY_MS        Delay before reconnecting (default: 5000)");
    println!("  PAIRING_TIMEOUT_SECS      Time allowed to enter a pairing code (default: 60)");
    println!("  WA_VERSION_URL            Where the WhatsApp Web version is read (default: https://web.whatsapp.com/sw.js)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_mode() {
        assert_eq!(
            parse_args(&[]).unwrap(),
            RunMode::Run {
                qr: false,
                config_path: None
            }
        );
    }

    #[test]
    fn test_qr_and_config() {
        assert_eq!(
            parse_args(&args(&["--qr", "--config", "bot.toml"])).unwrap(),
            RunMode::Run {
                qr: true,
                config_path: Some("bot.toml".to_string())
            }
        );
    }

    #[test]
    fn test_help_and_version() {
        assert_eq!(parse_args(&args(&["-h"])).unwrap(), RunMode::Help);
        assert_eq!(parse_args(&args(&["--version"])).unwrap(), RunMode::Version);
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse_args(&args(&["--config"])).is_err());
        assert!(parse_args(&args(&["--mobile"])).is_err());
    }
}
