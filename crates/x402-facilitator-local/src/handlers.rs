//! C8 API Surface: axum handlers for the facilitator's HTTP endpoints
//! (spec §6).
//!
//! Three principal kinds gate these routes (spec §4.8): [`crate::auth::ApiKeyPrincipal`]
//! for `/verify`/`/settle` (the resource server's own key), the cron secret
//! for `/capture`, and [`crate::auth::PayerPrincipal`] (a payer-scoped JWT)
//! for the `/payer/*` dashboard endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use x402_chain_eip155::provider::Eip155Provider;
use x402_store::Store;
use x402_types::chain::ChainRegistry;
use x402_types::error::ErrorCode;
use x402_types::proto::{SettleRequest, SupportedResponse, VerifyRequest};

use crate::auth::{ApiKeyPrincipal, PayerPrincipal};
use crate::capture_scheduler::CaptureScheduler;
use crate::config::EngineConfig;
use crate::error::ApiError;
use crate::rate_limit::RateLimiters;
use crate::reclaim::ReclaimOrchestrator;
use crate::scheme_router::SchemeRouter;
use crate::session_engine::SessionEngine;

/// Everything a handler needs: the store, the three engine components, and
/// the ambient config/secrets/rate limiters (spec §5/§9).
pub struct AppState<S: Store> {
    pub store: Arc<S>,
    pub chains: Arc<ChainRegistry<Eip155Provider>>,
    pub engine: Arc<SessionEngine<S>>,
    pub router: Arc<SchemeRouter<S>>,
    pub scheduler: Arc<CaptureScheduler<S>>,
    pub reclaim: Arc<ReclaimOrchestrator<S>>,
    pub config: Arc<EngineConfig>,
    pub rate_limiters: Arc<RateLimiters>,
    pub jwt_secret: Arc<String>,
    pub cron_secret: Arc<String>,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            chains: self.chains.clone(),
            engine: self.engine.clone(),
            router: self.router.clone(),
            scheduler: self.scheduler.clone(),
            reclaim: self.reclaim.clone(),
            config: self.config.clone(),
            rate_limiters: self.rate_limiters.clone(),
            jwt_secret: self.jwt_secret.clone(),
            cron_secret: self.cron_secret.clone(),
        }
    }
}

/// Lets [`crate::auth::PayerPrincipal`]'s `FromRequestParts` impl read the
/// JWT secret off whatever concrete state type the router uses.
pub trait JwtSecretProvider {
    fn jwt_secret(&self) -> &str;
}

impl<S: Store> JwtSecretProvider for AppState<S> {
    fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}

pub fn routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify::<S>))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle::<S>))
        .route("/health", get(get_health::<S>))
        .route("/supported", get(get_supported::<S>))
        .route("/capture", post(post_capture::<S>))
        .route("/payer/sessions", get(get_payer_sessions::<S>))
        .route("/payer/sessions/{id}", get(get_payer_session::<S>))
        .route("/payer/sessions/{id}/reclaim", post(post_payer_reclaim::<S>))
        .route("/payer/sessions/reclaim-all", post(post_payer_reclaim_all::<S>))
        .route("/payer/stats", get(get_payer_stats::<S>))
}

async fn get_root() -> impl IntoResponse {
    (StatusCode::OK, format!("Hello from {}!", env!("CARGO_PKG_NAME")))
}

async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify an x402 payment payload (exact or escrow scheme)",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle an x402 payment: exact transfers immediately, escrow creates or debits a session",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

async fn get_health<S: Store>(State(state): State<AppState<S>>) -> impl IntoResponse {
    get_supported(State(state)).await
}

async fn get_supported<S: Store>(State(state): State<AppState<S>>) -> impl IntoResponse {
    let networks = match state.store.list_active_networks().await {
        Ok(n) => n,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let mut kinds = Vec::new();
    let mut signers = std::collections::HashMap::new();
    for network in networks {
        let Ok(chain_id) = network.id.parse::<x402_types::chain::ChainId>() else { continue };
        kinds.push(x402_types::proto::SupportedKind {
            x402_version: 1,
            scheme: x402_types::proto::Scheme::Escrow,
            network: chain_id.clone(),
            extra: None,
        });
        kinds.push(x402_types::proto::SupportedKind {
            x402_version: 1,
            scheme: x402_types::proto::Scheme::Exact,
            network: chain_id.clone(),
            extra: None,
        });
        let operator = state.chains.by_chain_id(chain_id.clone()).map(|p| p.operator_address());
        signers.insert(chain_id, operator.into_iter().collect());
    }

    (StatusCode::OK, Json(SupportedResponse { kinds, signers })).into_response()
}

async fn post_verify<S: Store>(
    State(state): State<AppState<S>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<VerifyRequest>,
) -> Response {
    let header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Err(err) = ApiKeyPrincipal::authenticate(state.store.as_ref(), header).await {
        return err.into_response();
    }
    match tokio::time::timeout(state.config.verify_timeout, state.router.verify(&body)).await {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(err)) => {
            tracing::warn!(error = ?err, "verify failed");
            err.into_response()
        }
        Err(_) => ApiError::new(ErrorCode::RequestTimeout).into_response(),
    }
}

async fn post_settle<S: Store>(
    State(state): State<AppState<S>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<SettleRequest>,
) -> Response {
    let header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let principal = match ApiKeyPrincipal::authenticate(state.store.as_ref(), header).await {
        Ok(p) => p,
        Err(err) => return err.into_response(),
    };
    if !state.rate_limiters.authenticated.check(&principal.api_key.id.to_string()) {
        return ApiError::new(ErrorCode::RateLimited).into_response();
    }

    match tokio::time::timeout(state.config.settle_timeout, state.router.settle(&body, principal.api_key.user_id)).await {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(err)) => {
            tracing::warn!(error = ?err, "settle failed");
            err.into_response()
        }
        Err(_) => ApiError::new(ErrorCode::RequestTimeout).into_response(),
    }
}

/// `POST /capture`: cron-triggered sweep of tier-1/tier-2 sessions (spec §4.6).
async fn post_capture<S: Store>(State(state): State<AppState<S>>, headers: axum::http::HeaderMap) -> Response {
    if let Err(err) = crate::auth::verify_cron_secret(&headers, &state.cron_secret) {
        return err.into_response();
    }

    let now_secs = x402_types::timestamp::UnixTimestamp::now().as_secs() as i64;
    match state.scheduler.run_once(now_secs).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "attempted": summary.attempted,
                "captured": summary.captured,
                "failed": summary.failed,
            })),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionSummary {
    id: String,
    network: String,
    status: String,
    authorized_amount: String,
    authorization_expiry: i64,
}

impl From<x402_store::models::Session> for SessionSummary {
    fn from(s: x402_store::models::Session) -> Self {
        Self {
            id: s.id,
            network: s.network_id,
            status: format!("{:?}", s.status).to_lowercase(),
            authorized_amount: s.authorized_amount,
            authorization_expiry: s.authorization_expiry,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageLogView {
    id: uuid::Uuid,
    request_id: String,
    amount: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<x402_store::models::UsageLog> for UsageLogView {
    fn from(log: x402_store::models::UsageLog) -> Self {
        Self {
            id: log.id,
            request_id: log.request_id,
            amount: log.amount,
            status: format!("{:?}", log.status).to_lowercase(),
            created_at: log.created_at,
        }
    }
}

/// `GET /payer/sessions/{id}` response: the session plus its usage logs
/// (≤50) and capture tx hashes (spec §6).
#[derive(Debug, Serialize, Deserialize)]
struct SessionDetail {
    #[serde(flatten)]
    summary: SessionSummary,
    usage_logs: Vec<UsageLogView>,
    capture_tx_hashes: Vec<String>,
}

/// `GET /payer/sessions`: a payer's reclaimable sessions. Reuses
/// `active_sessions_for_payer` (the only payer-keyed query the store
/// exposes) rather than a full history: voided/captured sessions aren't
/// actionable from this dashboard, only active ones are.
async fn get_payer_sessions<S: Store>(State(state): State<AppState<S>>, payer: PayerPrincipal) -> Response {
    match state.store.active_sessions_for_payer(&payer.payer).await {
        Ok(sessions) => {
            let summaries: Vec<SessionSummary> = sessions.into_iter().map(SessionSummary::from).collect();
            (StatusCode::OK, Json(summaries)).into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// `GET /payer/sessions/{id}`: detailed session view, including its usage
/// logs (≤50, most recent first per the store's ordering) and capture tx
/// hashes (spec §6).
async fn get_payer_session<S: Store>(
    State(state): State<AppState<S>>,
    payer: PayerPrincipal,
    Path(id): Path<String>,
) -> Response {
    let session = match state.store.get_session(&id).await {
        Ok(Some(session)) if session.payer.eq_ignore_ascii_case(&payer.payer) => session,
        Ok(Some(_)) => return ApiError::new(ErrorCode::Unauthorized).into_response(),
        Ok(None) => return ApiError::new(ErrorCode::SessionNotFound).into_response(),
        Err(err) => return ApiError::from(err).into_response(),
    };

    let usage_logs = match state.store.usage_logs_for_session(&id, 50).await {
        Ok(logs) => logs,
        Err(err) => return ApiError::from(err).into_response(),
    };
    let capture_logs = match state.store.capture_logs_for_session(&id).await {
        Ok(logs) => logs,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let detail = SessionDetail {
        summary: SessionSummary::from(session),
        usage_logs: usage_logs.into_iter().map(UsageLogView::from).collect(),
        capture_tx_hashes: capture_logs.into_iter().map(|log| log.tx_hash).collect(),
    };
    (StatusCode::OK, Json(detail)).into_response()
}

async fn post_payer_reclaim<S: Store>(
    State(state): State<AppState<S>>,
    payer: PayerPrincipal,
    Path(id): Path<String>,
) -> Response {
    let now_secs = x402_types::timestamp::UnixTimestamp::now().as_secs() as i64;
    let result = tokio::time::timeout(state.config.reclaim_timeout, state.engine.reclaim_session(&id, &payer.payer, now_secs)).await;
    match result {
        Ok(Ok(balance)) => (StatusCode::OK, Json(json!({ "available": balance.available.to_string() }))).into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(_) => ApiError::new(ErrorCode::RequestTimeout).into_response(),
    }
}

async fn post_payer_reclaim_all<S: Store>(State(state): State<AppState<S>>, payer: PayerPrincipal) -> Response {
    if !state.rate_limiters.reclaim.check(&payer.payer) {
        return ApiError::new(ErrorCode::RateLimited).into_response();
    }
    let now_secs = x402_types::timestamp::UnixTimestamp::now().as_secs() as i64;
    let result = tokio::time::timeout(state.config.reclaim_all_timeout, state.reclaim.reclaim_all(&payer.payer, now_secs)).await;
    match result {
        Ok(Ok(summary)) => (
            StatusCode::OK,
            Json(json!({
                "attempted": summary.attempted,
                "reclaimed": summary.reclaimed,
                "failed": summary.failed,
                "totalReclaimed": summary.total_reclaimed.to_string(),
                "txHashes": summary.tx_hashes,
                "errors": summary.errors,
            })),
        )
            .into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(_) => ApiError::new(ErrorCode::RequestTimeout).into_response(),
    }
}

async fn get_payer_stats<S: Store>(State(state): State<AppState<S>>, payer: PayerPrincipal) -> Response {
    match state.store.active_sessions_for_payer(&payer.payer).await {
        Ok(sessions) => {
            let mut total_available: u128 = 0;
            for session in &sessions {
                if let Ok(balance) = state.store.balance_of(&session.id).await {
                    total_available = total_available.saturating_add(balance.available);
                }
            }
            (
                StatusCode::OK,
                Json(json!({
                    "activeSessions": sessions.len(),
                    "totalAvailable": total_available.to_string(),
                })),
            )
                .into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}
