//! Fakes for the external collaborators, shared by unit tests.

use crate::email::Mailer;
use crate::error::{FaucetError, FaucetResult};
use crate::eth::{PendingTransfer, TransferCapability, TransferReceipt};
use crate::identity::{Identity, IdentityStore, MemoryIdentityStore};
use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mailer that remembers what it was asked to send
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// `(to, link)` pairs in send order
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification(
        &self,
        to_email: &str,
        _display_name: Option<&str>,
        verification_link: &str,
    ) -> FaucetResult<()> {
        if self.fail {
            return Err(FaucetError::EmailDelivery("connection refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to_email.to_string(), verification_link.to_string()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Succeed,
    RejectSubmit,
    Revert,
    NeverConfirm,
}

/// Transfer capability that counts payouts instead of touching a chain
#[derive(Debug)]
pub struct FakeTransfer {
    mode: Mutex<TransferMode>,
    confirmation_delay: Duration,
    submitted: AtomicUsize,
    confirmed: AtomicUsize,
}

impl FakeTransfer {
    pub fn new(mode: TransferMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            confirmation_delay: Duration::ZERO,
            submitted: AtomicUsize::new(0),
            confirmed: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    pub fn set_mode(&self, mode: TransferMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn confirmed(&self) -> usize {
        self.confirmed.load(Ordering::SeqCst)
    }

    fn mode(&self) -> TransferMode {
        *self.mode.lock().unwrap()
    }
}

#[async_trait]
impl TransferCapability for FakeTransfer {
    async fn submit(&self, destination: &str, amount: U256) -> FaucetResult<PendingTransfer> {
        if self.mode() == TransferMode::RejectSubmit {
            return Err(FaucetError::TransferFailed("nonce too low".to_string()));
        }
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PendingTransfer {
            tx_reference: format!("0x{:064x}", n),
            destination: destination.to_string(),
            amount,
        })
    }

    async fn await_confirmation(&self, pending: &PendingTransfer) -> FaucetResult<TransferReceipt> {
        tokio::time::sleep(self.confirmation_delay).await;
        match self.mode() {
            TransferMode::Revert => Err(FaucetError::TransferFailed(format!(
                "Transaction {} reverted",
                pending.tx_reference
            ))),
            TransferMode::NeverConfirm => Err(FaucetError::ConfirmationTimeout {
                tx_reference: pending.tx_reference.clone(),
            }),
            _ => {
                self.confirmed.fetch_add(1, Ordering::SeqCst);
                Ok(TransferReceipt {
                    tx_reference: pending.tx_reference.clone(),
                    block_number: Some(1),
                })
            }
        }
    }
}

/// Identity store whose claim writes never become durable
#[derive(Debug, Default)]
pub struct BrokenClaimStore {
    pub inner: MemoryIdentityStore,
}

#[async_trait]
impl IdentityStore for BrokenClaimStore {
    async fn upsert_pending(&self, email: &str, display_name: Option<String>) -> FaucetResult<Identity> {
        self.inner.upsert_pending(email, display_name).await
    }

    async fn find_by_email(&self, email: &str) -> FaucetResult<Option<Identity>> {
        self.inner.find_by_email(email).await
    }

    async fn find_by_verification_token(&self, token: &str) -> FaucetResult<Option<Identity>> {
        self.inner.find_by_verification_token(token).await
    }

    async fn mark_verified(&self, email: &str) -> FaucetResult<Identity> {
        self.inner.mark_verified(email).await
    }

    async fn mark_verified_by_token(&self, token: &str) -> FaucetResult<Option<Identity>> {
        self.inner.mark_verified_by_token(token).await
    }

    async fn record_claim(
        &self,
        _email: &str,
        _wallet: &str,
        _timestamp: DateTime<Utc>,
    ) -> FaucetResult<Identity> {
        Err(FaucetError::Storage("disk full".to_string()))
    }

    async fn hold_payout(&self, email: &str, wallet: &str, tx_reference: &str) -> FaucetResult<Identity> {
        self.inner.hold_payout(email, wallet, tx_reference).await
    }

    async fn release_payout(
        &self,
        email: &str,
        wallet: &str,
        paid_at: Option<DateTime<Utc>>,
    ) -> FaucetResult<Identity> {
        self.inner.release_payout(email, wallet, paid_at).await
    }

    async fn count(&self) -> FaucetResult<usize> {
        self.inner.count().await
    }
}
