//! Thin HTTP projection over the Drop/Queue/Rollover/Loyalty operations.
//! The wire shape here isn't contractual (callers of this service agree on
//! it separately); it exists so the domain is reachable over the network at
//! all, following the teacher's `State<Arc<AppState>>` / `Json` handler
//! idiom.

use axum::{
    extract::{ConnectInfo, Path, State},
    response::ErrorResponse,
    Json,
};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{net::SocketAddr, sync::Arc};

use crate::{
    domain::{
        drop::{
            CheckExpiryResult, ClosePurchaseWindowResult, CompletePurchaseResult,
            InclusionProofResult, InitializeRequest, InitializeResult, LotteryProofResult,
            RegisterRequest, RegisterResult, RunLotteryResult, StartPurchaseResult,
        },
        drop::DropIndexEntry,
        drop::DropState,
        queue::{JoinQueueResult, QueueToken},
        LoyaltyTier,
    },
    startup::AppState,
};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn initialize_drop(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitializeRequest>,
) -> Result<Json<InitializeResult>, ErrorResponse> {
    debug!("initialize drop {}", request.drop_id);
    let drop_id = request.drop_id.clone();
    let result = state
        .drop_registry
        .initialize(request)
        .await
        .map_err(|e| {
            error!("error initializing drop {drop_id}: {e}");
            e.into()
        })?;

    state.active_drop_ids.write().await.push(result.drop_id.clone());
    Ok(Json(result))
}

pub async fn list_drops(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DropIndexEntry>>, ErrorResponse> {
    state
        .drop_registry
        .list_index()
        .await
        .map(Json)
        .map_err(|e| {
            error!("error listing drops: {e}");
            e.into()
        })
}

pub async fn get_drop_state(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
) -> Result<Json<DropState>, ErrorResponse> {
    state
        .drop_registry
        .get_state(&drop_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error fetching state for drop {drop_id}: {e}");
            e.into()
        })
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResult>, ErrorResponse> {
    debug!("register {} for drop {drop_id}", request.user_id);
    state
        .drop_registry
        .register(&drop_id, request)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error registering for drop {drop_id}: {e}");
            e.into()
        })
}

pub async fn run_lottery(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
) -> Result<Json<RunLotteryResult>, ErrorResponse> {
    state
        .drop_registry
        .run_lottery(&drop_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error running lottery for drop {drop_id}: {e}");
            e.into()
        })
}

#[derive(Debug, Deserialize)]
pub struct UserIdRequest {
    pub user_id: String,
}

pub async fn start_purchase(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
    Json(request): Json<UserIdRequest>,
) -> Result<Json<StartPurchaseResult>, ErrorResponse> {
    state
        .drop_registry
        .start_purchase(&drop_id, &request.user_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error starting purchase for {}/{drop_id}: {e}", request.user_id);
            e.into()
        })
}

#[derive(Debug, Deserialize)]
pub struct CompletePurchaseRequest {
    pub user_id: String,
    pub token: String,
}

pub async fn complete_purchase(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
    Json(request): Json<CompletePurchaseRequest>,
) -> Result<Json<CompletePurchaseResult>, ErrorResponse> {
    state
        .drop_registry
        .complete_purchase(&drop_id, &request.user_id, &request.token)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error completing purchase for {}/{drop_id}: {e}", request.user_id);
            e.into()
        })
}

pub async fn close_purchase_window(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
) -> Result<Json<ClosePurchaseWindowResult>, ErrorResponse> {
    state
        .drop_registry
        .close_purchase_window(&drop_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error closing purchase window for drop {drop_id}: {e}");
            e.into()
        })
}

pub async fn promote_backup(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
) -> Result<Json<CheckExpiryResult>, ErrorResponse> {
    state
        .drop_registry
        .promote_backup(&drop_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error promoting backup for drop {drop_id}: {e}");
            e.into()
        })
}

pub async fn get_lottery_proof(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
) -> Result<Json<LotteryProofResult>, ErrorResponse> {
    state
        .drop_registry
        .get_lottery_proof(&drop_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error fetching lottery proof for drop {drop_id}: {e}");
            e.into()
        })
}

pub async fn get_inclusion_proof(
    State(state): State<Arc<AppState>>,
    Path((drop_id, user_id)): Path<(String, String)>,
) -> Result<Json<InclusionProofResult>, ErrorResponse> {
    state
        .drop_registry
        .get_inclusion_proof(&drop_id, &user_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error fetching inclusion proof for {user_id}/{drop_id}: {e}");
            e.into()
        })
}

#[derive(Debug, Serialize)]
pub struct RolloverResponse {
    pub user_id: String,
    pub balance: u32,
}

pub async fn get_rollover_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<RolloverResponse>, ErrorResponse> {
    let balance = state.rollover_store.get_balance(&user_id).await.map_err(|e| {
        error!("error fetching rollover balance for {user_id}: {e}");
        e.into()
    })?;
    Ok(Json(RolloverResponse { user_id, balance }))
}

#[derive(Debug, Deserialize)]
pub struct SetRolloverRequest {
    pub balance: u32,
}

pub async fn set_rollover_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<SetRolloverRequest>,
) -> Result<Json<RolloverResponse>, ErrorResponse> {
    let max_rollover = state.defaults.max_rollover_balance;
    state
        .rollover_store
        .set_balance(&user_id, request.balance, max_rollover)
        .await
        .map_err(|e| {
            error!("error setting rollover balance for {user_id}: {e}");
            e.into()
        })?;
    Ok(Json(RolloverResponse {
        user_id,
        balance: request.balance.min(max_rollover),
    }))
}

#[derive(Debug, Serialize)]
pub struct LoyaltyResponse {
    pub user_id: String,
    pub tier: LoyaltyTier,
    pub multiplier: f64,
}

pub async fn get_loyalty(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<LoyaltyResponse>, ErrorResponse> {
    let (tier, multiplier) = state
        .loyalty_store
        .get_multiplier(
            &user_id,
            state.defaults.silver_threshold,
            state.defaults.gold_threshold,
            state.defaults.silver_multiplier,
            state.defaults.gold_multiplier,
        )
        .await
        .map_err(|e| {
            error!("error fetching loyalty for {user_id}: {e}");
            e.into()
        })?;
    Ok(Json(LoyaltyResponse {
        user_id,
        tier,
        multiplier,
    }))
}

#[derive(Debug, Deserialize)]
pub struct JoinQueueRequest {
    pub fingerprint: String,
}

pub async fn join_queue(
    State(state): State<Arc<AppState>>,
    Path(drop_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<JoinQueueRequest>,
) -> Result<Json<JoinQueueResult>, ErrorResponse> {
    let ip_hash = hash_ip(&state.ip_hash_salt, &addr.ip().to_string());
    state
        .queue_store
        .join_queue(
            &drop_id,
            &request.fingerprint,
            &ip_hash,
            state.defaults.max_registrations_per_fingerprint,
            state.defaults.max_registrations_per_ip,
            state.defaults.queue_ready_cap,
            state.defaults.queue_token_ttl_secs,
            state.defaults.queue_issue_rate_per_sec,
        )
        .await
        .map(Json)
        .map_err(|e| {
            error!("error joining queue for drop {drop_id}: {e}");
            e.into()
        })
}

pub async fn check_queue_token(
    State(state): State<Arc<AppState>>,
    Path((drop_id, token_id)): Path<(String, String)>,
) -> Result<Json<QueueToken>, ErrorResponse> {
    state
        .queue_store
        .check_token(&drop_id, &token_id)
        .await
        .map(Json)
        .map_err(|e| {
            error!("error checking queue token {token_id} for drop {drop_id}: {e}");
            e.into()
        })
}

fn hash_ip(salt: &[u8], ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())
}
