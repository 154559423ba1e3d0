//! Email-verified testnet faucet
//!
//! 1. A user registers an email and receives a verification link
//! 2. Presenting the link's token marks the email as verified
//! 3. A verified user may claim a fixed 0.02 ETH per wallet every 24 hours
//!
//! Claims are paid first and recorded after the transfer confirms, with one
//! in-flight claim per `(email, wallet)` pair.

pub mod config;
pub mod cooldown;
pub mod coordinator;
pub mod email;
pub mod error;
pub mod eth;
pub mod http;
pub mod identity;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

pub use config::FaucetConfig;
pub use coordinator::{ClaimReceipt, DisbursementCoordinator};
pub use error::{FaucetError, FaucetResult};
pub use identity::{Identity, IdentityStore, MemoryIdentityStore};
pub use verification::{VerificationService, VerificationState};
