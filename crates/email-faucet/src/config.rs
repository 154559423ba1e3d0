//! Configuration management for the faucet.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the faucet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetConfig {
    /// HTTP server configuration
    pub http: HttpConfig,

    /// Ethereum transfer configuration
    pub ethereum: EthereumConfig,

    /// SMTP email configuration
    pub smtp: SmtpConfig,

    /// Identity persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Housekeeping
    pub security: SecurityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port to bind to
    pub port: u16,

    /// Address to bind to
    pub bind_address: String,
}

/// Ethereum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    /// RPC endpoint URL
    pub rpc_url: String,

    /// Private key for the faucet wallet (hex string, 0x prefix optional)
    pub private_key: String,

    /// Blocks on top of the inclusion block before a payout counts as confirmed
    pub required_confirmations: u64,

    /// How long to wait for a receipt before escalating
    pub confirmation_timeout_secs: u64,

    /// Delay between receipt polls
    pub poll_interval_ms: u64,

    /// Minimum balance required in faucet wallet (in ETH)
    pub min_faucet_balance_eth: f64,
}

/// SMTP configuration for sending verification emails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname
    pub server: String,

    /// SMTP server port
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// From email address
    pub from_address: String,

    /// Email subject line
    pub subject: String,

    /// Public URL of the web front end, used for verification links and redirects
    pub frontend_url: String,
}

/// Identity storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot file. Identities are kept in memory only when unset.
    pub snapshot_path: Option<String>,
}

/// Housekeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// How often idle claim locks are pruned, in minutes
    pub cleanup_interval_minutes: u64,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                port: 4000,
                bind_address: "127.0.0.1".to_string(),
            },
            ethereum: EthereumConfig {
                rpc_url: "https://rpc.sepolia.org".to_string(),
                private_key: "your_private_key_here".to_string(),
                required_confirmations: 1,
                confirmation_timeout_secs: 180,
                poll_interval_ms: 2000,
                min_faucet_balance_eth: 0.1,
            },
            smtp: SmtpConfig {
                server: "smtp.gmail.com".to_string(),
                port: 587,
                username: "your_email@gmail.com".to_string(),
                password: "your_app_password".to_string(),
                from_address: "your_email@gmail.com".to_string(),
                subject: "Verify your email for Sepolia Faucet".to_string(),
                frontend_url: "http://localhost:3000".to_string(),
            },
            storage: StorageConfig {
                snapshot_path: Some("faucet-identities.json".to_string()),
            },
            security: SecurityConfig {
                cleanup_interval_minutes: 30,
            },
        }
    }
}

impl FaucetConfig {
    /// Load configuration from a TOML file, with `FAUCET_*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("FAUCET").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ethereum.private_key == "your_private_key_here" {
            return Err(anyhow::anyhow!("Private key must be configured"));
        }

        let key = self.ethereum.private_key.strip_prefix("0x").unwrap_or(&self.ethereum.private_key);
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!("Private key must be 64 hex characters"));
        }

        url::Url::parse(&self.ethereum.rpc_url)
            .map_err(|e| anyhow::anyhow!("Invalid RPC URL: {}", e))?;

        if self.ethereum.confirmation_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Confirmation timeout must be greater than 0"));
        }

        if self.ethereum.min_faucet_balance_eth < 0.0 {
            return Err(anyhow::anyhow!("Minimum faucet balance cannot be negative"));
        }

        if self.smtp.username == "your_email@gmail.com" {
            return Err(anyhow::anyhow!("SMTP configuration must be set"));
        }

        url::Url::parse(&self.smtp.frontend_url)
            .map_err(|e| anyhow::anyhow!("Invalid frontend URL: {}", e))?;

        if self.security.cleanup_interval_minutes == 0 {
            return Err(anyhow::anyhow!("Cleanup interval must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "abcd1234567890abcd1234567890abcd1234567890abcd1234567890abcd1234";

    fn configured() -> FaucetConfig {
        let mut config = FaucetConfig::default();
        config.ethereum.private_key = TEST_KEY.to_string();
        config.smtp.username = "test@example.com".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = FaucetConfig::default();

        assert_eq!(config.http.port, 4000);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.ethereum.required_confirmations, 1);
        assert_eq!(config.security.cleanup_interval_minutes, 30);
    }

    #[test]
    fn test_config_from_file() -> anyhow::Result<()> {
        let toml_content = r#"
[http]
port = 8080
bind_address = "0.0.0.0"

[ethereum]
rpc_url = "https://sepolia.infura.io/v3/key"
private_key = "abcd1234567890abcd1234567890abcd1234567890abcd1234567890abcd1234"
required_confirmations = 2
confirmation_timeout_secs = 60
poll_interval_ms = 500
min_faucet_balance_eth = 1.5

[smtp]
server = "smtp.example.com"
port = 465
username = "test@example.com"
password = "password123"
from_address = "faucet@example.com"
subject = "Verify"
frontend_url = "https://faucet.example.com"

[storage]
snapshot_path = "/var/lib/faucet/identities.json"

[security]
cleanup_interval_minutes = 60
"#;

        let temp_dir = tempfile::tempdir()?;
        let temp_path = temp_dir.path().join("test_config.toml");
        std::fs::write(&temp_path, toml_content)?;

        let config = FaucetConfig::from_file(&temp_path)?;

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.ethereum.required_confirmations, 2);
        assert_eq!(config.smtp.frontend_url, "https://faucet.example.com");
        assert_eq!(
            config.storage.snapshot_path.as_deref(),
            Some("/var/lib/faucet/identities.json")
        );
        assert!(config.validate().is_ok());

        Ok(())
    }

    #[test]
    fn test_config_validation() {
        // Placeholders are rejected
        assert!(FaucetConfig::default().validate().is_err());

        let mut config = configured();
        assert!(config.validate().is_ok());

        config.ethereum.private_key = format!("0x{}", TEST_KEY);
        assert!(config.validate().is_ok());

        config.ethereum.private_key = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = configured();
        config.ethereum.private_key = "z".repeat(64);
        assert!(config.validate().is_err());

        let mut config = configured();
        config.ethereum.confirmation_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.smtp.frontend_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_config() -> anyhow::Result<()> {
        let mut config = configured();
        config.http.port = 8080;
        config.storage.snapshot_path = None;

        let temp_dir = tempfile::tempdir()?;
        let temp_path = temp_dir.path().join("test_save_config.toml");
        config.save_to_file(&temp_path)?;

        let loaded_config = FaucetConfig::from_file(&temp_path)?;

        assert_eq!(config.http.port, loaded_config.http.port);
        assert_eq!(config.ethereum.private_key, loaded_config.ethereum.private_key);
        assert_eq!(loaded_config.storage.snapshot_path, None);

        Ok(())
    }
}
