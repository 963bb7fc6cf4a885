//! Scan scheduler HTTP routes.
//!
//! Provides endpoints for:
//! - Profile creation and status polling
//! - Starting scans and their background expansion
//! - Batch statistics and pool budget
//! - Owner credential registration
//! - Running one executor cycle on demand

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::scan::{ExpansionRequest, NewCredential, NewProfile, ScanError};
use crate::server::state::{GuardedScanManager, GuardedTaskExecutor, ServerState};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProfileBody {
    pub owner_id: String,
    pub name: String,
    #[serde(default)]
    pub industries: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterCredentialBody {
    /// Base64 RSA-OAEP ciphertext of the API key.
    pub encrypted_key: String,
    #[serde(default)]
    pub daily_limit: Option<i64>,
    #[serde(default)]
    pub is_unlimited: bool,
}

#[derive(Debug, Serialize)]
pub struct BeginScanResponse {
    pub profile_id: String,
    pub batch_id: String,
}

#[derive(Debug, Serialize)]
pub struct ExpansionResponse {
    pub batch_id: String,
    pub task_count: usize,
}

#[derive(Debug, Serialize)]
pub struct RegisterCredentialResponse {
    pub credential_id: String,
    pub profile_slots: usize,
}

#[derive(Debug, Serialize)]
pub struct BudgetResponse {
    pub api_name: String,
    pub remaining: i64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Daily limit of an owner credential registered without one.
const DEFAULT_CREDENTIAL_DAILY_LIMIT: i64 = 100;

// =============================================================================
// Error mapping
// =============================================================================

fn status_for(err: &ScanError) -> StatusCode {
    match err {
        ScanError::ProfileNotFound(_) | ScanError::BatchNotFound(_) => StatusCode::NOT_FOUND,
        ScanError::ScanInProgress { .. } | ScanError::InvalidState { .. } => StatusCode::CONFLICT,
        ScanError::BudgetExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        ScanError::TaskTransientFailure { .. }
        | ScanError::TaskPermanentFailure { .. }
        | ScanError::LedgerUnavailable(_)
        | ScanError::EnqueueFailure { .. }
        | ScanError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ScanError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Scan request failed: {}", err);
    } else {
        debug!("Scan request rejected: {}", err);
    }
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// Profile Routes
// =============================================================================

/// POST /profiles - Create a search profile
async fn create_profile(
    State(manager): State<GuardedScanManager>,
    Json(body): Json<CreateProfileBody>,
) -> Response {
    if body.owner_id.trim().is_empty() || body.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "owner_id and name are required".to_string(),
            }),
        )
            .into_response();
    }

    let new = NewProfile {
        owner_id: body.owner_id,
        name: body.name,
        industries: body.industries,
        roles: body.roles,
        locations: body.locations,
    };
    match manager.create_profile(new) {
        Ok(profile) => (StatusCode::CREATED, Json(profile)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /profiles/{id} - Profile with scan status and progress
async fn get_profile(
    State(manager): State<GuardedScanManager>,
    Path(id): Path<String>,
) -> Response {
    match manager.get_profile(&id) {
        Ok(profile) => Json(profile).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /profiles/{id}/scan - Open a new scan batch
async fn begin_scan(
    State(manager): State<GuardedScanManager>,
    Path(id): Path<String>,
) -> Response {
    match manager.begin_scan(&id) {
        Ok(batch_id) => (
            StatusCode::ACCEPTED,
            Json(BeginScanResponse {
                profile_id: id,
                batch_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /profiles/{id}/batches/{batch_id}/expansion - Enqueue background tasks
async fn start_expansion(
    State(manager): State<GuardedScanManager>,
    Path((id, batch_id)): Path<(String, String)>,
    Json(request): Json<ExpansionRequest>,
) -> Response {
    match manager.start_expansion(&id, &batch_id, &request) {
        Ok(task_count) => (
            StatusCode::ACCEPTED,
            Json(ExpansionResponse {
                batch_id,
                task_count,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /profiles/{id}/batches/{batch_id}/stats - Task counts of a batch
async fn get_batch_stats(
    State(manager): State<GuardedScanManager>,
    Path((id, batch_id)): Path<(String, String)>,
) -> Response {
    match manager.get_batch_stats(&id, &batch_id) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Budget and Credential Routes
// =============================================================================

/// POST /owners/{owner_id}/credentials - Register an encrypted owner key
async fn register_credential(
    State(manager): State<GuardedScanManager>,
    Path(owner_id): Path<String>,
    Json(body): Json<RegisterCredentialBody>,
) -> Response {
    if body.encrypted_key.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "encrypted_key is required".to_string(),
            }),
        )
            .into_response();
    }

    let new = NewCredential {
        owner_id,
        encrypted_key: body.encrypted_key,
        daily_limit: body.daily_limit.unwrap_or(DEFAULT_CREDENTIAL_DAILY_LIMIT),
        is_unlimited: body.is_unlimited,
    };
    match manager.register_credential(new) {
        Ok((credential_id, profile_slots)) => (
            StatusCode::CREATED,
            Json(RegisterCredentialResponse {
                credential_id,
                profile_slots,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /budget - Calls left today across the pool
async fn get_budget(State(manager): State<GuardedScanManager>) -> Response {
    match manager.budget_remaining() {
        Ok(remaining) => Json(BudgetResponse {
            api_name: manager.api_name().to_string(),
            remaining,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Executor Routes
// =============================================================================

/// POST /scan/tick - Run one executor cycle
async fn tick(State(executor): State<GuardedTaskExecutor>) -> Response {
    match executor.run_cycle().await {
        Ok(report) => {
            info!("Tick finished: {:?}", report);
            Json(report).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub fn make_scan_routes(state: ServerState) -> Router {
    Router::new()
        .route("/profiles", post(create_profile))
        .route("/profiles/{id}", get(get_profile))
        .route("/profiles/{id}/scan", post(begin_scan))
        .route(
            "/profiles/{id}/batches/{batch_id}/expansion",
            post(start_expansion),
        )
        .route("/profiles/{id}/batches/{batch_id}/stats", get(get_batch_stats))
        .route("/owners/{owner_id}/credentials", post(register_credential))
        .route("/budget", get(get_budget))
        .route("/scan/tick", post(tick))
        .with_state(state)
}
