use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use request_guard::clock::SystemClock;
use request_guard::config::{self, GuardConfig};
use request_guard::crypto::EncryptionManager;
use request_guard::observability::NoopMetrics;
use request_guard::security::{InputValidator, PatternMatcher, ValidationResult};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Operator CLI for the request guard", long_about = None)]
struct Cli {
    /// Base URL of a running request-guard service.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Configuration file for local commands. Defaults plus GUARD_* overrides when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the security posture report
    Report,
    /// Check service health
    Health,
    /// Generate an RSA-2048 key pair (PEM) on stdout
    Keygen,
    /// Run text through the input validator
    CheckText { text: String },
    /// Validate an email address
    CheckEmail { email: String },
    /// Check an address against the configured IP lists
    CheckIp { ip: String },
    /// Ask the running service to remove audit events older than its retention period
    CleanupAudit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Report => get_json(&format!("{}/security/report", cli.url)).await?,
        Commands::Health => get_json(&format!("{}/health", cli.url)).await?,
        Commands::Keygen => {
            let config = load(cli.config.as_deref())?;
            let manager = EncryptionManager::from_config(
                &config.encryption,
                Arc::new(SystemClock),
                Arc::new(NoopMetrics),
            )?;
            let pair = tokio::task::spawn_blocking(move || manager.generate_key_pair()).await??;
            print!("{}", pair.private_pem.as_str());
            print!("{}", pair.public_pem);
        }
        Commands::CheckText { text } => {
            let config = load(cli.config.as_deref())?;
            print_result(&validator(&config).validate_text(&text, None))?;
        }
        Commands::CheckEmail { email } => {
            let config = load(cli.config.as_deref())?;
            print_result(&validator(&config).validate_email(&email))?;
        }
        Commands::CheckIp { ip } => {
            let config = load(cli.config.as_deref())?;
            print_result(&validator(&config).validate_ip(&ip))?;
        }
        Commands::CleanupAudit => {
            let res = reqwest::Client::new()
                .post(format!("{}/audit/cleanup", cli.url))
                .send()
                .await?;
            print_json(res).await?;
        }
    }

    Ok(())
}

fn load(path: Option<&std::path::Path>) -> Result<GuardConfig, config::ConfigError> {
    match path {
        Some(path) => config::load_config(path),
        None => config::loader::load_from_env(),
    }
}

fn validator(config: &GuardConfig) -> InputValidator {
    InputValidator::new(&config.validation, &config.network, Arc::new(PatternMatcher::new()))
}

fn print_result(result: &ValidationResult) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if !result.accepted {
        std::process::exit(1);
    }
    Ok(())
}

async fn get_json(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    print_json(reqwest::get(url).await?).await
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
