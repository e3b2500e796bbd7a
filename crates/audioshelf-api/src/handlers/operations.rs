//! Operation inspection and control handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;

use audioshelf_core::error::AppError;
use audioshelf_core::types::OperationId;
use audioshelf_entity::operation::{ActiveOperation, Operation, OperationLog, OperationPriority};
use audioshelf_worker::TypeMetricsSnapshot;
use audioshelf_worker::jobs::PruneOperationsCommand;
use audioshelf_worker::jobs::prune::PRUNE_OPERATIONS;

use crate::dto::request::{ListQuery, LogsQuery, PruneQuery};
use crate::dto::response::{ApiResponse, MessageResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/operations
pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<Operation>>>, ApiError> {
    let operations = state.dispatcher.recent(query.effective_limit()).await?;
    Ok(Json(ApiResponse::ok(operations)))
}

/// GET /api/operations/active
pub async fn active_operations(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ActiveOperation>>> {
    Json(ApiResponse::ok(state.dispatcher.active_operations()))
}

/// GET /api/operations/metrics
pub async fn operation_metrics(
    State(state): State<AppState>,
) -> Json<ApiResponse<BTreeMap<String, TypeMetricsSnapshot>>> {
    Json(ApiResponse::ok(state.dispatcher.metrics()))
}

/// GET /api/operations/{id}
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Operation>>, ApiError> {
    let operation = state
        .dispatcher
        .status(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("operation '{id}' not found")))?;
    Ok(Json(ApiResponse::ok(operation)))
}

/// GET /api/operations/{id}/logs
pub async fn get_operation_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<ApiResponse<Vec<OperationLog>>>, ApiError> {
    if state.dispatcher.status(&id).await?.is_none() {
        return Err(AppError::not_found(format!("operation '{id}' not found")).into());
    }
    let logs = state.dispatcher.logs(&id, query.tail).await?;
    Ok(Json(ApiResponse::ok(logs)))
}

/// POST /api/operations/{id}/cancel
pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state.dispatcher.cancel(&id).await?;
    Ok(Json(ApiResponse::ok(MessageResponse::new(format!(
        "cancellation requested for operation '{id}'"
    )))))
}

/// POST /api/operations/prune
///
/// Responds `202 Accepted` with the freshly queued record.
pub async fn prune_operations(
    State(state): State<AppState>,
    Query(query): Query<PruneQuery>,
) -> Result<(StatusCode, Json<ApiResponse<Operation>>), ApiError> {
    let keep_days = query
        .keep_days
        .unwrap_or(state.config.retention.keep_days);
    let id = format!("{PRUNE_OPERATIONS}-{}", OperationId::generate());
    let command = Arc::new(PruneOperationsCommand::new(
        state.dispatcher.store(),
        keep_days,
    ));

    let operation = state
        .dispatcher
        .enqueue(id, OperationPriority::Low, command)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(operation))))
}
