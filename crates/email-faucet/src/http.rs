//! HTTP server and API endpoints for the faucet.

use crate::{
    config::FaucetConfig,
    coordinator::DisbursementCoordinator,
    email::SmtpMailer,
    error::{FaucetError, FaucetResult},
    eth::EthereumTransfer,
    identity::{IdentityStore, MemoryIdentityStore},
    verification::{SubscriptionStatus, VerificationService},
};
use axum::{
    extract::{Query, State},
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct SharedState {
    pub store: Arc<dyn IdentityStore>,
    pub verification: Arc<VerificationService>,
    pub coordinator: Arc<DisbursementCoordinator>,
    /// Used for health reporting only
    pub chain: Option<Arc<EthereumTransfer>>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub wallet_address: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub message: String,
    pub tx_hash: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub ethereum_connected: bool,
    pub identities: usize,
}

/// Create the HTTP router with all endpoints
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/subscribe", post(subscribe))
        .route("/api/verify", get(verify))
        .route("/api/check-subscription", get(check_subscription))
        .route("/api/faucet", post(claim))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Sepolia Email Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /api/subscribe": "Register an email (name, email)",
            "GET /api/verify": "Confirm an email (token)",
            "GET /api/check-subscription": "Look up an email (email)",
            "POST /api/faucet": "Claim test ETH (walletAddress, email)",
            "GET /health": "Health check",
        }
    }))
}

async fn health(State(state): State<SharedState>) -> FaucetResult<Json<HealthResponse>> {
    let ethereum_connected = match &state.chain {
        Some(chain) => chain.health_check().await.is_ok(),
        None => false,
    };

    let response = HealthResponse {
        status: if ethereum_connected { "healthy" } else { "degraded" }.to_string(),
        ethereum_connected,
        identities: state.store.count().await?,
    };

    info!("Health check completed: {:?}", response);
    Ok(Json(response))
}

async fn subscribe(
    State(state): State<SharedState>,
    Json(request): Json<SubscribeRequest>,
) -> FaucetResult<Json<MessageResponse>> {
    let (Some(name), Some(email)) = (non_empty(request.name), non_empty(request.email)) else {
        return Err(FaucetError::MissingField("Name and Email"));
    };

    info!("Subscribe request for {}", email);
    state.verification.register(&email, Some(name.as_str())).await?;

    Ok(Json(MessageResponse {
        message: "Verification email sent".to_string(),
    }))
}

async fn verify(
    State(state): State<SharedState>,
    Query(query): Query<VerifyQuery>,
) -> FaucetResult<Redirect> {
    let token = non_empty(query.token).ok_or(FaucetError::InvalidToken)?;

    let identity = state.verification.verify(&token).await?;
    let target = state.verification.faucet_redirect(&identity.email)?;

    Ok(Redirect::to(target.as_str()))
}

async fn check_subscription(
    State(state): State<SharedState>,
    Query(query): Query<StatusQuery>,
) -> FaucetResult<Json<SubscriptionStatus>> {
    let email = non_empty(query.email).ok_or(FaucetError::MissingField("Email"))?;
    Ok(Json(state.verification.check_status(&email).await?))
}

async fn claim(
    State(state): State<SharedState>,
    Json(request): Json<ClaimRequest>,
) -> FaucetResult<Json<ClaimResponse>> {
    let (Some(wallet), Some(email)) = (non_empty(request.wallet_address), non_empty(request.email)) else {
        return Err(FaucetError::MissingField("Wallet and Email"));
    };

    info!("Faucet request: {} -> {}", email, wallet);
    let receipt = state
        .coordinator
        .claim(&email, &wallet, Utc::now())
        .await
        .inspect_err(|e| {
            if !e.is_consistency_fatal() {
                warn!("Claim by {} for {} rejected: {}", email, wallet, e);
            }
        })?;

    Ok(Json(ClaimResponse {
        message: "Test ETH sent!".to_string(),
        tx_hash: receipt.tx_reference,
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the collaborators from configuration and serve until shutdown
pub async fn start_server(config: &FaucetConfig) -> FaucetResult<()> {
    info!("Starting faucet server...");

    let store: Arc<dyn IdentityStore> = match &config.storage.snapshot_path {
        Some(path) => Arc::new(MemoryIdentityStore::open(path)?),
        None => {
            warn!("No snapshot path configured, identities will not survive a restart");
            Arc::new(MemoryIdentityStore::new())
        }
    };

    let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
    let chain = Arc::new(EthereumTransfer::new(&config.ethereum)?);

    info!("Testing email connection...");
    mailer.test_connection().await?;

    info!("Testing Ethereum connection...");
    chain.health_check().await?;
    info!("Faucet wallet: {}", chain.faucet_address());

    let frontend_url = url::Url::parse(&config.smtp.frontend_url)
        .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Invalid frontend URL: {}", e)))?;

    let verification = Arc::new(VerificationService::new(store.clone(), mailer, frontend_url));
    let coordinator = Arc::new(DisbursementCoordinator::new(store.clone(), chain.clone()));

    // Prune idle claim locks
    let cleanup_coordinator = coordinator.clone();
    let cleanup_interval = config.security.cleanup_interval_minutes;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(cleanup_interval * 60));

        loop {
            interval.tick().await;
            let remaining = cleanup_coordinator.prune_idle_locks();
            info!("Cleanup completed: {} claim locks in use", remaining);
        }
    });

    let app = create_router(SharedState {
        store,
        verification,
        coordinator,
        chain: Some(chain),
    });

    let bind_addr = format!("{}:{}", config.http.bind_address, config.http.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await
        .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e)))?;

    info!("Faucet server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| FaucetError::Internal(anyhow::anyhow!("Server error: {}", e)))?;

    Ok(())
}
