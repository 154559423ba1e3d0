//! Main entry point for the faucet server.

use anyhow::Result;
use clap::Parser;
use chrono::Utc;
use email_faucet::{
    config::FaucetConfig, eth::EthereumTransfer, http::start_server, DisbursementCoordinator,
    MemoryIdentityStore,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sepolia test ETH faucet gated by email verification
#[derive(Parser, Debug)]
#[command(name = "email-faucet", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "faucet-config.toml")]
    config: String,

    /// Generate a default configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Release the hold left by an unconfirmed payout and exit.
    /// Run with the server stopped.
    #[arg(long, num_args = 2, value_names = ["EMAIL", "WALLET"])]
    resolve_payout: Option<Vec<String>>,

    /// With --resolve-payout: the held transfer landed, record it as a claim now
    #[arg(long, requires = "resolve_payout")]
    paid: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    if args.generate_config {
        return generate_config(&args.config);
    }

    info!("Starting email faucet v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", args.config);

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Use --generate-config to create a default configuration file");
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if let Some(pair) = &args.resolve_payout {
        return resolve_payout(&config, &pair[0], &pair[1], args.paid).await;
    }

    info!("Server will bind to: {}:{}", config.http.bind_address, config.http.port);
    info!("Ethereum RPC: {}", config.ethereum.rpc_url);
    info!("SMTP server: {}:{}", config.smtp.server, config.smtp.port);

    if let Err(e) = start_server(&config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Load configuration from file
fn load_config(path: &str) -> Result<FaucetConfig> {
    if !Path::new(path).exists() {
        return Err(anyhow::anyhow!(
            "Configuration file '{}' not found. Use --generate-config to create one.",
            path
        ));
    }

    FaucetConfig::from_file(path).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
}

/// Clear a payout hold in the identity snapshot
async fn resolve_payout(config: &FaucetConfig, email: &str, wallet: &str, paid: bool) -> Result<()> {
    let path = config
        .storage
        .snapshot_path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("storage.snapshot_path is not set, there is nothing to resolve"))?;

    let store = Arc::new(MemoryIdentityStore::open(path)?);
    let chain = Arc::new(EthereumTransfer::new(&config.ethereum)?);
    let coordinator = DisbursementCoordinator::new(store, chain);

    let identity = coordinator
        .resolve_pending_payout(email, wallet, paid.then(Utc::now))
        .await?;
    info!(
        "Resolved payout hold for {} ({} claims on record)",
        identity.email,
        identity.claim_history.len()
    );

    Ok(())
}

/// Generate a default configuration file
fn generate_config(path: &str) -> Result<()> {
    FaucetConfig::default().save_to_file(path)?;

    println!("Generated default configuration file: {}", path);
    println!();
    println!("Edit the configuration file before running the server:");
    println!("1. Set the faucet wallet private key (ethereum.private_key)");
    println!("2. Configure SMTP credentials and the front end URL (smtp section)");
    println!("3. Choose where identities are stored (storage.snapshot_path)");
    println!();
    println!("  email-faucet --config {}", path);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_load_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("faucet-config.toml");
        let path = path.to_str().unwrap();

        generate_config(path)?;
        let config = load_config(path)?;

        assert_eq!(config.http.port, 4000);
        // Placeholders must be replaced before the server will start
        assert!(config.validate().is_err());

        Ok(())
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = load_config("nonexistent-file.toml");
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["email-faucet", "--config", "x.toml", "--generate-config"]);
        assert_eq!(args.config, "x.toml");
        assert!(args.generate_config);
        assert!(args.resolve_payout.is_none());
    }

    #[test]
    fn test_resolve_args_parse() {
        let args = Args::parse_from(["email-faucet", "--resolve-payout", "a@x.com", "0xabc", "--paid"]);
        assert_eq!(args.resolve_payout, Some(vec!["a@x.com".to_string(), "0xabc".to_string()]));
        assert!(args.paid);

        assert!(Args::try_parse_from(["email-faucet", "--paid"]).is_err());
    }

    #[tokio::test]
    async fn test_resolve_payout_clears_snapshot_hold() -> Result<()> {
        use email_faucet::IdentityStore;

        let wallet = &email_faucet::eth::normalize_address("0x742d35cc6634c0532925a3b8d404cb8b3d3a5d3a")?;
        let dir = tempfile::tempdir()?;
        let snapshot = dir.path().join("identities.json");

        let store = MemoryIdentityStore::open(&snapshot)?;
        store.upsert_pending("a@x.com", None).await?;
        store.mark_verified("a@x.com").await?;
        store.hold_payout("a@x.com", wallet, "0xfeed").await?;
        drop(store);

        let mut config = FaucetConfig::default();
        config.storage.snapshot_path = Some(snapshot.to_str().unwrap().to_string());
        config.ethereum.private_key =
            "abcd1234567890abcd1234567890abcd1234567890abcd1234567890abcd1234".to_string();

        resolve_payout(&config, "a@x.com", wallet, true).await?;

        let reopened = MemoryIdentityStore::open(&snapshot)?;
        let identity = reopened.find_by_email("a@x.com").await?.unwrap();
        assert!(identity.pending_payouts.is_empty());
        assert_eq!(identity.claim_history.len(), 1);

        // Nothing left to resolve
        assert!(resolve_payout(&config, "a@x.com", wallet, false).await.is_err());
        Ok(())
    }
}
