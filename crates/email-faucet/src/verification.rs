//! Email verification: registration, token redemption and status lookups.
//!
//! An email moves through three states:
//!
//! - `Unregistered`: no record exists
//! - `PendingVerification`: a record exists and a token has been mailed
//! - `Verified`: the token was presented; this state is terminal
//!
//! Tokens are kept after use. Presenting a token that belongs to an already
//! verified identity succeeds without changing anything, so repeated visits to
//! the verification link are harmless.

use crate::email::{validate_email, Mailer};
use crate::error::{FaucetError, FaucetResult};
use crate::identity::{Identity, IdentityStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Verification state of an email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationState {
    Unregistered,
    PendingVerification,
    Verified,
}

impl VerificationState {
    pub fn of(identity: Option<&Identity>) -> Self {
        match identity {
            None => VerificationState::Unregistered,
            Some(identity) if identity.verified => VerificationState::Verified,
            Some(_) => VerificationState::PendingVerification,
        }
    }
}

/// Answer to a subscription status lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Only disclosed while the identity is still pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
}

/// Drives identities from registration to verified
pub struct VerificationService {
    store: Arc<dyn IdentityStore>,
    mailer: Arc<dyn Mailer>,
    frontend_url: url::Url,
}

impl VerificationService {
    pub fn new(store: Arc<dyn IdentityStore>, mailer: Arc<dyn Mailer>, frontend_url: url::Url) -> Self {
        Self {
            store,
            mailer,
            frontend_url,
        }
    }

    /// Register `email` (or refresh a pending registration) and mail a verification link.
    ///
    /// The registration only counts as successful once the email was handed to
    /// the mail server.
    pub async fn register(&self, email: &str, display_name: Option<&str>) -> FaucetResult<Identity> {
        if email.is_empty() {
            return Err(FaucetError::MissingField("Email"));
        }
        validate_email(email)?;

        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let identity = self.store.upsert_pending(email, display_name).await?;
        let token = identity
            .verification_token
            .as_deref()
            .ok_or_else(|| FaucetError::Internal(anyhow::anyhow!("Pending identity has no token")))?;

        let link = self.verification_link(token)?;
        if let Err(e) = self
            .mailer
            .send_verification(email, identity.display_name.as_deref(), link.as_str())
            .await
        {
            warn!("Registration for {} not completed: {}", email, e);
            return Err(match e {
                FaucetError::EmailDelivery(_) => e,
                other => FaucetError::EmailDelivery(other.to_string()),
            });
        }

        info!("Verification email sent to {}", email);
        Ok(identity)
    }

    /// Redeem a verification token, returning the (now verified) identity.
    pub async fn verify(&self, token: &str) -> FaucetResult<Identity> {
        if token.trim().is_empty() {
            return Err(FaucetError::InvalidToken);
        }

        let identity = self
            .store
            .mark_verified_by_token(token)
            .await?
            .ok_or(FaucetError::InvalidToken)?;

        info!("User {} verified, token retained", identity.email);
        Ok(identity)
    }

    pub async fn state(&self, email: &str) -> FaucetResult<VerificationState> {
        let identity = self.store.find_by_email(email).await?;
        Ok(VerificationState::of(identity.as_ref()))
    }

    pub async fn check_status(&self, email: &str) -> FaucetResult<SubscriptionStatus> {
        if email.is_empty() {
            return Err(FaucetError::MissingField("Email"));
        }

        let status = match self.store.find_by_email(email).await? {
            None => SubscriptionStatus {
                exists: false,
                verified: None,
                email: None,
                verification_token: None,
            },
            Some(identity) => SubscriptionStatus {
                exists: true,
                verified: Some(identity.verified),
                verification_token: if identity.verified {
                    None
                } else {
                    identity.verification_token
                },
                email: Some(identity.email),
            },
        };
        Ok(status)
    }

    /// `{frontend}/verify?token=...`
    pub fn verification_link(&self, token: &str) -> FaucetResult<url::Url> {
        let mut link = self
            .frontend_url
            .join("verify")
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Bad frontend URL: {}", e)))?;
        link.query_pairs_mut().append_pair("token", token);
        Ok(link)
    }

    /// `{frontend}/faucet?verified=true&email=...`
    pub fn faucet_redirect(&self, email: &str) -> FaucetResult<url::Url> {
        let mut link = self
            .frontend_url
            .join("faucet")
            .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Bad frontend URL: {}", e)))?;
        link.query_pairs_mut()
            .append_pair("verified", "true")
            .append_pair("email", email);
        Ok(link)
    }
}
