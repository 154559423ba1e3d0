//! Error handling for the faucet.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Faucet error types
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("{0} required")]
    MissingField(&'static str),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid wallet address: {0}")]
    InvalidWalletAddress(String),

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Email already subscribed and verified")]
    AlreadyVerified,

    #[error("Unknown email: {0}")]
    UnknownIdentity(String),

    #[error("User not verified")]
    NotVerified,

    #[error("You can claim again after {retry_after_hours} hours.")]
    CooldownActive { retry_after_hours: i64 },

    #[error("A previous payout to this wallet ({tx_reference}) is awaiting confirmation")]
    PayoutPending { tx_reference: String },

    #[error("No pending payout for {wallet}")]
    NoPendingPayout { wallet: String },

    #[error("Failed to send verification email: {0}")]
    EmailDelivery(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Transfer {tx_reference} was not confirmed in time")]
    ConfirmationTimeout { tx_reference: String },

    #[error("Payout {tx_reference} to {wallet} for {email} succeeded but was not recorded: {reason}")]
    UnrecordedPayout {
        email: String,
        wallet: String,
        tx_reference: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FaucetError {
    /// Whether the caller may simply try the same request again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FaucetError::EmailDelivery(_) | FaucetError::TransferFailed(_) | FaucetError::Storage(_)
        )
    }

    /// Funds may have left the faucet without a matching claim record.
    /// These need manual reconciliation and must never be retried automatically.
    pub fn is_consistency_fatal(&self) -> bool {
        matches!(
            self,
            FaucetError::UnrecordedPayout { .. } | FaucetError::ConfirmationTimeout { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::MissingField(_)
            | FaucetError::InvalidEmail(_)
            | FaucetError::InvalidWalletAddress(_)
            | FaucetError::InvalidToken
            | FaucetError::AlreadyVerified
            | FaucetError::NoPendingPayout { .. } => StatusCode::BAD_REQUEST,
            FaucetError::UnknownIdentity(_) | FaucetError::NotVerified => StatusCode::UNAUTHORIZED,
            FaucetError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
            FaucetError::PayoutPending { .. } => StatusCode::CONFLICT,
            FaucetError::TransferFailed(_) | FaucetError::Storage(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FaucetError::EmailDelivery(_)
            | FaucetError::ConfirmationTimeout { .. }
            | FaucetError::UnrecordedPayout { .. }
            | FaucetError::ConfigError(_)
            | FaucetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let error_message = match &self {
            FaucetError::UnknownIdentity(_) => FaucetError::NotVerified.to_string(),
            FaucetError::EmailDelivery(_) => "Failed to send verification email".to_string(),
            FaucetError::TransferFailed(_) | FaucetError::Storage(_) => {
                "Failed to send test ETH, please try again".to_string()
            }
            FaucetError::ConfirmationTimeout { .. } | FaucetError::UnrecordedPayout { .. } => {
                "Payout needs operator review, do not retry".to_string()
            }
            FaucetError::ConfigError(_) => "Configuration error".to_string(),
            FaucetError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "retryable": self.is_retryable(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for faucet operations
pub type FaucetResult<T> = Result<T, FaucetError>;
