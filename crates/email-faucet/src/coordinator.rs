//! Disbursement coordination.
//!
//! A claim runs eligibility check, transfer, confirmation and bookkeeping under
//! a lock scoped to the `(email, wallet)` pair. A concurrent claim for the same
//! pair waits for the first one to finish and is then re-evaluated against the
//! freshly recorded cooldown.
//!
//! The claim is recorded only after the transfer is confirmed. If that record
//! cannot be written the payout is real but unrecorded; this is reported as
//! [`FaucetError::UnrecordedPayout`] and logged on the `faucet::reconcile`
//! target. It is never retried.
//!
//! A transfer that was broadcast but whose outcome stays unknown (no receipt
//! before the confirmation deadline) puts the pair on hold. The hold is kept
//! in memory and written to the identity record, and every later claim for
//! the pair fails with [`FaucetError::PayoutPending`] until an operator calls
//! [`DisbursementCoordinator::resolve_pending_payout`].

use crate::cooldown::is_eligible;
use crate::error::{FaucetError, FaucetResult};
use crate::eth::{normalize_address, TransferCapability, DRIP_AMOUNT_WEI};
use crate::identity::IdentityStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of a successful claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimReceipt {
    pub tx_reference: String,
    pub wallet: String,
    pub claimed_at: DateTime<Utc>,
}

type ClaimKey = (String, String);

pub struct DisbursementCoordinator {
    store: Arc<dyn IdentityStore>,
    transfer: Arc<dyn TransferCapability>,
    locks: DashMap<ClaimKey, Arc<Mutex<()>>>,
    /// Pairs with an unresolved payout, by transaction reference.
    holds: DashMap<ClaimKey, String>,
}

impl DisbursementCoordinator {
    pub fn new(store: Arc<dyn IdentityStore>, transfer: Arc<dyn TransferCapability>) -> Self {
        Self {
            store,
            transfer,
            locks: DashMap::new(),
            holds: DashMap::new(),
        }
    }

    fn lock_for(&self, email: &str, wallet: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(claim_key(email, wallet))
            .or_default()
            .clone()
    }

    /// Pay the fixed drip amount to `wallet` on behalf of `email`.
    pub async fn claim(&self, email: &str, wallet: &str, now: DateTime<Utc>) -> FaucetResult<ClaimReceipt> {
        if email.is_empty() {
            return Err(FaucetError::MissingField("Email"));
        }
        if wallet.trim().is_empty() {
            return Err(FaucetError::MissingField("Wallet"));
        }
        let wallet = normalize_address(wallet)?;

        let lock = self.lock_for(email, &wallet);
        let _guard = lock.lock().await;

        let identity = self
            .store
            .find_by_email(email)
            .await?
            .ok_or_else(|| FaucetError::UnknownIdentity(email.to_string()))?;

        if !identity.verified {
            return Err(FaucetError::NotVerified);
        }

        let key = claim_key(email, &wallet);
        let held = self
            .holds
            .get(&key)
            .map(|tx| tx.value().clone())
            .or_else(|| identity.pending_payouts.get(&wallet).cloned());
        if let Some(tx_reference) = held {
            warn!("Claim for {} by {} refused, payout {} unresolved", wallet, email, tx_reference);
            return Err(FaucetError::PayoutPending { tx_reference });
        }

        let eligibility = is_eligible(identity.last_claim(&wallet), now);
        if !eligibility.eligible {
            debug!("Claim for {} by {} rejected, cooldown active", wallet, email);
            return Err(FaucetError::CooldownActive {
                retry_after_hours: eligibility.retry_after_hours(),
            });
        }

        let pending = self
            .transfer
            .submit(&wallet, DRIP_AMOUNT_WEI)
            .await
            .map_err(|e| match e {
                FaucetError::TransferFailed(_) => e,
                other => FaucetError::TransferFailed(other.to_string()),
            })?;

        let receipt = match self.transfer.await_confirmation(&pending).await {
            Ok(receipt) => receipt,
            Err(FaucetError::TransferFailed(reason)) => {
                warn!("Transfer {} to {} failed: {}", pending.tx_reference, wallet, reason);
                return Err(FaucetError::TransferFailed(reason));
            }
            Err(e) => {
                self.holds.insert(key, pending.tx_reference.clone());
                error!(
                    target: "faucet::reconcile",
                    email = %email,
                    wallet = %wallet,
                    tx = %pending.tx_reference,
                    "Payout outcome unknown, pair held until resolved: {}", e
                );
                if let Err(hold_err) = self.store.hold_payout(email, &wallet, &pending.tx_reference).await {
                    error!(
                        target: "faucet::reconcile",
                        email = %email,
                        wallet = %wallet,
                        tx = %pending.tx_reference,
                        "Payout hold kept in memory only: {}", hold_err
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = self.store.record_claim(email, &wallet, now).await {
            error!(
                target: "faucet::reconcile",
                email = %email,
                wallet = %wallet,
                tx = %receipt.tx_reference,
                "Payout confirmed but claim not recorded: {}", e
            );
            return Err(FaucetError::UnrecordedPayout {
                email: email.to_string(),
                wallet,
                tx_reference: receipt.tx_reference,
                reason: e.to_string(),
            });
        }

        info!("Paid {} for {} (tx: {})", wallet, email, receipt.tx_reference);
        Ok(ClaimReceipt {
            tx_reference: receipt.tx_reference,
            wallet,
            claimed_at: now,
        })
    }

    /// Clear the hold on a pair once the held transfer has been checked by hand.
    ///
    /// `paid_at` is the time the transfer landed; it is recorded as a claim so
    /// the cooldown applies. `None` means the transfer never went through.
    pub async fn resolve_pending_payout(
        &self,
        email: &str,
        wallet: &str,
        paid_at: Option<DateTime<Utc>>,
    ) -> FaucetResult<crate::identity::Identity> {
        let wallet = normalize_address(wallet)?;
        let lock = self.lock_for(email, &wallet);
        let _guard = lock.lock().await;

        let key = claim_key(email, &wallet);
        let identity = self
            .store
            .find_by_email(email)
            .await?
            .ok_or_else(|| FaucetError::UnknownIdentity(email.to_string()))?;

        let tx_reference = self
            .holds
            .get(&key)
            .map(|tx| tx.value().clone())
            .or_else(|| identity.pending_payouts.get(&wallet).cloned())
            .ok_or_else(|| FaucetError::NoPendingPayout { wallet: wallet.clone() })?;

        let identity = self.store.release_payout(email, &wallet, paid_at).await?;
        self.holds.remove(&key);

        info!(
            target: "faucet::reconcile",
            "Released hold on {} for {} (tx: {}, paid: {})",
            wallet, email, tx_reference, paid_at.is_some()
        );
        Ok(identity)
    }

    /// Drop locks no claim is holding or waiting on. Returns how many remain.
    pub fn prune_idle_locks(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks.len()
    }
}

fn claim_key(email: &str, wallet: &str) -> ClaimKey {
    (email.to_string(), wallet.to_string())
}
