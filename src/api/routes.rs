//! API Routes
//!
//! HTTP endpoint definitions. Ingress is a thin layer: it validates,
//! forwards, and reads; the processing outcome of a submitted transaction is
//! only ever visible through the ledger history or the dead-letter surface.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Amount, Balance, TransactionKind, TransactionRequest};
use crate::error::AppError;
use crate::queue::TransactionQueue;
use crate::store::{BalanceStore, LedgerStore};

/// Shared handles injected into every handler
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn TransactionQueue>,
    pub balances: Arc<dyn BalanceStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn TransactionQueue>,
        balances: Arc<dyn BalanceStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            queue,
            balances,
            ledger,
        }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub initial_balance: String,
}

#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    pub account_id: i64,
    pub balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTransactionRequest {
    /// Client-supplied idempotency key; generated when absent
    #[serde(default)]
    pub request_id: Option<Uuid>,
    pub amount: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitTransactionResponse {
    pub request_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub entry_id: Uuid,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: String,
    pub applied_at: DateTime<Utc>,
    pub request_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub account_id: i64,
    pub entries: Vec<LedgerEntryResponse>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: i64,
    pub balance: Decimal,
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    pub id: Uuid,
    pub payload: String,
    pub reason: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeadLettersResponse {
    pub dead_letters: Vec<DeadLetterResponse>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id/transactions", post(submit_transaction))
        .route("/accounts/:account_id/ledger", get(get_history))
        .route("/accounts/:account_id/balance", get(get_balance))
        .route("/admin/dead-letters", get(get_dead_letters))
}

// =========================================================================
// POST /accounts
// =========================================================================

/// Open an account with a starting balance. The balance is fixed here; all
/// later mutations go through the queue and worker.
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), AppError> {
    let initial_balance: Decimal = request
        .initial_balance
        .parse()
        .map_err(|_| AppError::InvalidRequest("Invalid initial balance".to_string()))?;

    let initial_balance = Balance::new(initial_balance)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid initial balance: {}", e)))?;

    let account = state.balances.create_account(initial_balance.value()).await?;

    tracing::info!(account_id = account.id, balance = %account.balance, "Account created");

    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            account_id: account.id,
            balance: account.balance,
        }),
    ))
}

// =========================================================================
// POST /accounts/:account_id/transactions
// =========================================================================

/// Validate and enqueue a deposit/withdrawal request. The only synchronous
/// answer is "accepted for processing": 202 means the request is durable in
/// the queue, nothing more.
async fn submit_transaction(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(request): Json<SubmitTransactionRequest>,
) -> Result<(StatusCode, Json<SubmitTransactionResponse>), AppError> {
    let amount: Amount = request
        .amount
        .parse()
        .map_err(|e| AppError::InvalidRequest(format!("Invalid amount: {}", e)))?;

    let kind: TransactionKind = request
        .kind
        .parse()
        .map_err(|e: String| AppError::InvalidRequest(e))?;

    let mut transaction = TransactionRequest::new(account_id, amount, kind);
    if let Some(request_id) = request.request_id {
        transaction = transaction.with_request_id(request_id);
    }

    state.queue.enqueue(&transaction).await?;

    tracing::info!(
        request_id = %transaction.request_id,
        account_id,
        kind = %transaction.kind,
        amount = %transaction.amount,
        "Transaction accepted for processing"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTransactionResponse {
            request_id: transaction.request_id,
            status: "accepted".to_string(),
        }),
    ))
}

// =========================================================================
// GET /accounts/:account_id/ledger
// =========================================================================

/// Read the append-only history for an account, oldest first. This path
/// bypasses the worker and reads the ledger store directly.
async fn get_history(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<HistoryResponse>, AppError> {
    let entries = state.ledger.history(account_id).await?;

    Ok(Json(HistoryResponse {
        account_id,
        entries: entries
            .into_iter()
            .map(|e| LedgerEntryResponse {
                entry_id: e.entry_id,
                amount: e.amount,
                kind: e.kind.to_string(),
                applied_at: e.applied_at,
                request_id: e.request_id,
            })
            .collect(),
    }))
}

// =========================================================================
// GET /accounts/:account_id/balance
// =========================================================================

/// Read the current authoritative balance
async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> Result<Json<BalanceResponse>, AppError> {
    let account = state.balances.get(account_id).await?;

    Ok(Json(BalanceResponse {
        account_id: account.id,
        balance: account.balance,
        version: account.version,
    }))
}

// =========================================================================
// GET /admin/dead-letters
// =========================================================================

/// Operator surface: messages that exhausted their retries or could not be
/// parsed. Nothing is ever silently dropped; it ends up here.
async fn get_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<DeadLettersResponse>, AppError> {
    let dead_letters = state.queue.dead_letters(query.limit).await?;

    Ok(Json(DeadLettersResponse {
        dead_letters: dead_letters
            .into_iter()
            .map(|d| DeadLetterResponse {
                id: d.id,
                payload: String::from_utf8_lossy(&d.payload).into_owned(),
                reason: d.reason,
                attempts: d.attempts,
                enqueued_at: d.enqueued_at,
                dead_lettered_at: d.dead_lettered_at,
            })
            .collect(),
    }))
}
