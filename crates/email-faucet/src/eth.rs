//! On-chain transfers for the faucet.

use crate::config::EthereumConfig;
use crate::error::{FaucetError, FaucetResult};
use alloy::{
    network::{EthereumWallet, ReceiptResponse},
    primitives::{utils::format_ether, Address, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed payout per claim: 0.02 ETH.
pub const DRIP_AMOUNT_WEI: U256 = U256::from_limbs([20_000_000_000_000_000, 0, 0, 0]);

/// A transfer that has been broadcast but not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub tx_reference: String,
    pub destination: String,
    pub amount: U256,
}

/// A transfer that was included on chain and succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_reference: String,
    pub block_number: Option<u64>,
}

/// Submits and confirms payouts.
///
/// `submit` failures and reverted transfers are reported as
/// [`FaucetError::TransferFailed`]; in both cases no funds left the faucet.
#[async_trait]
pub trait TransferCapability: Send + Sync {
    async fn submit(&self, destination: &str, amount: U256) -> FaucetResult<PendingTransfer>;

    async fn await_confirmation(&self, pending: &PendingTransfer) -> FaucetResult<TransferReceipt>;
}

/// Parse a wallet address and return its checksummed form
pub fn normalize_address(address: &str) -> FaucetResult<String> {
    let trimmed = address.trim();
    if !trimmed.starts_with("0x") && !trimmed.starts_with("0X") {
        return Err(FaucetError::InvalidWalletAddress(address.to_string()));
    }
    Address::from_str(trimmed)
        .map(|parsed| parsed.to_checksum(None))
        .map_err(|_| FaucetError::InvalidWalletAddress(address.to_string()))
}

/// Ethereum transfer capability backed by an alloy HTTP provider.
///
/// One signing provider is built up front and shared by every call. Submits
/// are serialised so each one fills its nonce from the pending pool after the
/// previous broadcast has landed there.
pub struct EthereumTransfer {
    faucet_address: Address,
    min_faucet_balance: U256,
    required_confirmations: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    rpc_url: url::Url,
    provider: DynProvider,
    submit_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for EthereumTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumTransfer")
            .field("faucet_address", &self.faucet_address)
            .field("min_faucet_balance", &self.min_faucet_balance)
            .field("required_confirmations", &self.required_confirmations)
            .field("rpc_url", &self.rpc_url.as_str())
            .finish()
    }
}

impl EthereumTransfer {
    /// Create a new transfer client
    pub fn new(config: &EthereumConfig) -> FaucetResult<Self> {
        let private_key = config.private_key.strip_prefix("0x").unwrap_or(&config.private_key);
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Invalid private key: {}", e)))?;

        let rpc_url = url::Url::parse(&config.rpc_url)
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Invalid RPC URL: {}", e)))?;
        let faucet_address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.clone())
            .erased();

        Ok(Self {
            faucet_address,
            min_faucet_balance: eth_to_wei(config.min_faucet_balance_eth),
            required_confirmations: config.required_confirmations.max(1),
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            rpc_url,
            provider,
            submit_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn faucet_address(&self) -> Address {
        self.faucet_address
    }

    /// Check that the faucet wallet holds at least the configured floor
    pub async fn check_faucet_balance(&self) -> FaucetResult<U256> {
        let balance = self.provider.get_balance(self.faucet_address).await
            .map_err(|e| FaucetError::TransferFailed(format!("Failed to get faucet balance: {}", e)))?;

        if balance < self.min_faucet_balance || balance < DRIP_AMOUNT_WEI {
            return Err(FaucetError::TransferFailed(format!(
                "Faucet balance {} ETH is below minimum required {} ETH",
                format_ether(balance),
                format_ether(self.min_faucet_balance)
            )));
        }

        debug!("Faucet balance: {} ETH", format_ether(balance));
        Ok(balance)
    }

    /// Health check - verify connection to the network and the faucet balance
    pub async fn health_check(&self) -> FaucetResult<()> {
        let block_number = self.provider.get_block_number().await
            .map_err(|e| FaucetError::TransferFailed(format!("RPC unreachable: {}", e)))?;
        info!("Ethereum health check: latest block {}", block_number);

        self.check_faucet_balance().await?;
        Ok(())
    }

    async fn confirmations_since(&self, block_number: u64) -> Option<u64> {
        match self.provider.get_block_number().await {
            Ok(head) => Some(head.saturating_sub(block_number) + 1),
            Err(e) => {
                warn!("Failed to read block number: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl TransferCapability for EthereumTransfer {
    async fn submit(&self, destination: &str, amount: U256) -> FaucetResult<PendingTransfer> {
        let to = Address::from_str(destination)
            .map_err(|_| FaucetError::InvalidWalletAddress(destination.to_string()))?;

        let tx_request = alloy::rpc::types::TransactionRequest::default()
            .from(self.faucet_address)
            .to(to)
            .value(amount);

        let pending_tx = {
            let _guard = self.submit_lock.lock().await;
            self.provider.send_transaction(tx_request).await
                .map_err(|e| FaucetError::TransferFailed(format!("Failed to send transaction: {}", e)))?
        };

        let tx_hash = *pending_tx.tx_hash();
        info!("Transaction sent: {:#x} ({} ETH to {})", tx_hash, format_ether(amount), destination);

        Ok(PendingTransfer {
            tx_reference: format!("{:#x}", tx_hash),
            destination: destination.to_string(),
            amount,
        })
    }

    async fn await_confirmation(&self, pending: &PendingTransfer) -> FaucetResult<TransferReceipt> {
        let tx_hash = TxHash::from_str(&pending.tx_reference)
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Bad transaction hash: {}", e)))?;

        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.status() {
                        return Err(FaucetError::TransferFailed(format!(
                            "Transaction {} reverted",
                            pending.tx_reference
                        )));
                    }

                    let block_number = receipt.block_number();
                    let confirmed = match block_number {
                        Some(included) => self
                            .confirmations_since(included)
                            .await
                            .is_some_and(|n| n >= self.required_confirmations),
                        None => false,
                    };

                    if confirmed {
                        info!("Transaction confirmed: {} (block: {:?})", pending.tx_reference, block_number);
                        return Ok(TransferReceipt {
                            tx_reference: pending.tx_reference.clone(),
                            block_number,
                        });
                    }
                }
                Ok(None) => debug!("Transaction {} not yet mined", pending.tx_reference),
                Err(e) => warn!("Failed to fetch receipt for {}: {}", pending.tx_reference, e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(FaucetError::ConfirmationTimeout {
                    tx_reference: pending.tx_reference.clone(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Convert ETH to Wei
fn eth_to_wei(eth_amount: f64) -> U256 {
    U256::from((eth_amount * 1e18) as u128)
}
