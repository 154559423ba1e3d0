//! Subscriber records and the store that keeps them.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// One registered email and its verification and claim state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub display_name: Option<String>,
    pub verification_token: Option<String>,
    pub verified: bool,
    /// Every wallet ever paid, in payout order.
    pub claim_history: Vec<String>,
    pub last_claim_by_wallet: HashMap<String, DateTime<Utc>>,
    /// wallet -> transaction whose outcome is still unknown. Claims for these
    /// wallets are refused until an operator releases the hold.
    #[serde(default)]
    pub pending_payouts: HashMap<String, String>,
}

impl Identity {
    fn pending(email: &str, display_name: Option<String>) -> Self {
        Self {
            email: email.to_string(),
            display_name,
            verification_token: Some(Uuid::new_v4().to_string()),
            verified: false,
            claim_history: Vec::new(),
            last_claim_by_wallet: HashMap::new(),
            pending_payouts: HashMap::new(),
        }
    }

    pub fn last_claim(&self, wallet: &str) -> Option<DateTime<Utc>> {
        self.last_claim_by_wallet.get(wallet).copied()
    }
}

/// Persistent keyed storage of identities.
///
/// Every mutation must be durable before it returns. A failed write leaves the
/// previously stored record untouched.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create a pending record, or refresh an unverified one with a new token.
    /// Fails with [`FaucetError::AlreadyVerified`] for verified records.
    async fn upsert_pending(&self, email: &str, display_name: Option<String>) -> FaucetResult<Identity>;

    async fn find_by_email(&self, email: &str) -> FaucetResult<Option<Identity>>;

    async fn find_by_verification_token(&self, token: &str) -> FaucetResult<Option<Identity>>;

    /// Flip `verified` to true. No-op for records that are already verified.
    async fn mark_verified(&self, email: &str) -> FaucetResult<Identity>;

    /// Verify the identity currently holding `token`, resolving the token and
    /// flipping the flag as one step. `None` if no record holds the token.
    async fn mark_verified_by_token(&self, token: &str) -> FaucetResult<Option<Identity>>;

    /// Append `wallet` to the claim history and stamp its last claim time.
    async fn record_claim(
        &self,
        email: &str,
        wallet: &str,
        timestamp: DateTime<Utc>,
    ) -> FaucetResult<Identity>;

    /// Remember a broadcast transfer whose outcome is unknown.
    async fn hold_payout(&self, email: &str, wallet: &str, tx_reference: &str) -> FaucetResult<Identity>;

    /// Clear the hold on `wallet`. With `paid_at` the payout is also recorded
    /// as a claim at that time.
    async fn release_payout(
        &self,
        email: &str,
        wallet: &str,
        paid_at: Option<DateTime<Utc>>,
    ) -> FaucetResult<Identity>;

    async fn count(&self) -> FaucetResult<usize>;
}

/// In-memory identity store with an optional JSON snapshot on disk
#[derive(Debug)]
pub struct MemoryIdentityStore {
    records: DashMap<String, Identity>,
    /// verification token -> email
    tokens: DashMap<String, String>,
    snapshot_path: Option<PathBuf>,
    /// Serialises mutations so a failed snapshot can be rolled back.
    write_lock: Mutex<()>,
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityStore {
    /// Create a store that lives only in memory
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            tokens: DashMap::new(),
            snapshot_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open a store backed by a snapshot file, loading it if it exists
    pub fn open<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| FaucetError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
            let identities: Vec<Identity> = serde_json::from_str(&raw)
                .map_err(|e| FaucetError::Storage(format!("Corrupt snapshot {}: {}", path.display(), e)))?;

            for identity in identities {
                if let Some(token) = &identity.verification_token {
                    store.tokens.insert(token.clone(), identity.email.clone());
                }
                store.records.insert(identity.email.clone(), identity);
            }
            info!("Loaded {} identities from {}", store.records.len(), path.display());
        }

        store.snapshot_path = Some(path);
        Ok(store)
    }

    async fn persist(&self) -> FaucetResult<()> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };

        let mut identities: Vec<Identity> = self.records.iter().map(|entry| entry.value().clone()).collect();
        identities.sort_by(|a, b| a.email.cmp(&b.email));

        let json = serde_json::to_vec_pretty(&identities)
            .map_err(|e| FaucetError::Storage(format!("Failed to serialise identities: {}", e)))?;

        // File IO is blocking
        tokio::task::spawn_blocking(move || write_snapshot(&path, &json))
            .await
            .map_err(|e| FaucetError::Storage(format!("Snapshot task failed: {}", e)))?
    }

    /// Replace the record for `email` with `updated`, undoing the change if the
    /// snapshot cannot be written. Caller must hold `write_lock`.
    async fn commit(&self, previous: Option<Identity>, updated: Identity) -> FaucetResult<Identity> {
        let email = updated.email.clone();
        let old_token = previous.as_ref().and_then(|p| p.verification_token.clone());
        let new_token = updated.verification_token.clone();

        self.records.insert(email.clone(), updated.clone());
        if old_token != new_token {
            if let Some(token) = &old_token {
                self.tokens.remove(token);
            }
            if let Some(token) = &new_token {
                self.tokens.insert(token.clone(), email.clone());
            }
        }

        if let Err(e) = self.persist().await {
            match previous {
                Some(previous) => {
                    self.records.insert(email.clone(), previous);
                }
                None => {
                    self.records.remove(&email);
                }
            }
            if old_token != new_token {
                if let Some(token) = &new_token {
                    self.tokens.remove(token);
                }
                if let Some(token) = old_token {
                    self.tokens.insert(token, email);
                }
            }
            return Err(e);
        }

        Ok(updated)
    }

    fn existing(&self, email: &str) -> FaucetResult<Identity> {
        self.records
            .get(email)
            .map(|r| r.value().clone())
            .ok_or_else(|| FaucetError::UnknownIdentity(email.to_string()))
    }
}

/// Write `contents` to a temp file, fsync it, then rename over `path`.
fn write_snapshot(path: &Path, contents: &[u8]) -> FaucetResult<()> {
    let tmp = path.with_extension("tmp");

    let result = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|_| std::fs::rename(&tmp, path));

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(FaucetError::Storage(format!("Failed to write {}: {}", path.display(), e)));
    }

    // Persist the rename itself
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn upsert_pending(&self, email: &str, display_name: Option<String>) -> FaucetResult<Identity> {
        let _guard = self.write_lock.lock().await;
        let previous = self.records.get(email).map(|r| r.value().clone());

        let updated = match &previous {
            Some(existing) if existing.verified => return Err(FaucetError::AlreadyVerified),
            Some(existing) => Identity {
                display_name,
                verification_token: Some(Uuid::new_v4().to_string()),
                ..existing.clone()
            },
            None => Identity::pending(email, display_name),
        };

        debug!("Issued verification token for {}", email);
        self.commit(previous, updated).await
    }

    async fn find_by_email(&self, email: &str) -> FaucetResult<Option<Identity>> {
        Ok(self.records.get(email).map(|r| r.value().clone()))
    }

    async fn find_by_verification_token(&self, token: &str) -> FaucetResult<Option<Identity>> {
        let Some(email) = self.tokens.get(token).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        self.find_by_email(&email).await
    }

    async fn mark_verified(&self, email: &str) -> FaucetResult<Identity> {
        let _guard = self.write_lock.lock().await;
        let previous = self.existing(email)?;

        if previous.verified {
            return Ok(previous);
        }

        let updated = Identity {
            verified: true,
            ..previous.clone()
        };
        self.commit(Some(previous), updated).await
    }

    async fn mark_verified_by_token(&self, token: &str) -> FaucetResult<Option<Identity>> {
        let _guard = self.write_lock.lock().await;
        let Some(email) = self.tokens.get(token).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let previous = self.existing(&email)?;

        if previous.verified {
            return Ok(Some(previous));
        }

        let updated = Identity {
            verified: true,
            ..previous.clone()
        };
        self.commit(Some(previous), updated).await.map(Some)
    }

    async fn record_claim(
        &self,
        email: &str,
        wallet: &str,
        timestamp: DateTime<Utc>,
    ) -> FaucetResult<Identity> {
        let _guard = self.write_lock.lock().await;
        let previous = self.existing(email)?;

        let mut updated = previous.clone();
        updated.claim_history.push(wallet.to_string());
        updated.last_claim_by_wallet.insert(wallet.to_string(), timestamp);

        self.commit(Some(previous), updated).await
    }

    async fn hold_payout(&self, email: &str, wallet: &str, tx_reference: &str) -> FaucetResult<Identity> {
        let _guard = self.write_lock.lock().await;
        let previous = self.existing(email)?;

        let mut updated = previous.clone();
        updated
            .pending_payouts
            .insert(wallet.to_string(), tx_reference.to_string());

        self.commit(Some(previous), updated).await
    }

    async fn release_payout(
        &self,
        email: &str,
        wallet: &str,
        paid_at: Option<DateTime<Utc>>,
    ) -> FaucetResult<Identity> {
        let _guard = self.write_lock.lock().await;
        let previous = self.existing(email)?;

        let mut updated = previous.clone();
        updated.pending_payouts.remove(wallet);
        if let Some(paid_at) = paid_at {
            updated.claim_history.push(wallet.to_string());
            updated.last_claim_by_wallet.insert(wallet.to_string(), paid_at);
        }

        self.commit(Some(previous), updated).await
    }

    async fn count(&self) -> FaucetResult<usize> {
        Ok(self.records.len())
    }
}
