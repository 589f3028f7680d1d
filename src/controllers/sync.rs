//! Sync trigger endpoints. Both call the same reconciliation entry points
//! the background scheduler uses; failures come back as
//! `{"success": false, "error": ...}` with a 200 so callers always get the
//! cycle outcome.

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::services::sync::{import_sheet_events, sync_salesforce_events};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/events", post(trigger_salesforce_sync))
        .route("/sync/sheet", post(trigger_sheet_import))
        .route("/sync/sheet/info", get(sheet_info))
}

// POST /api/sync/events — manual CRM sync trigger
async fn trigger_salesforce_sync(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<serde_json::Value> {
    let outcome = sync_salesforce_events(&state.db.pool, &state.salesforce).await;
    Json(serde_json::to_value(outcome).unwrap_or_else(|_| {
        json!({ "success": false, "error": "Failed to serialize sync outcome" })
    }))
}

#[derive(Debug, Default, Deserialize)]
struct SheetImportRequest {
    sheet_id: Option<String>,
}

// POST /api/sync/sheet — sheet id from the body, falling back to config
async fn trigger_sheet_import(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    body: Option<Json<SheetImportRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let sheet_id = req
        .sheet_id
        .or_else(|| state.config.sheets.sheet_id.clone())
        .ok_or_else(|| {
            ApiError::Validation(
                "Sheet ID not provided and VIRTUAL_EVENTS_SHEET_ID not configured".to_string(),
            )
        })?;

    let outcome = import_sheet_events(&state.db.pool, &state.sheets, &sheet_id).await;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_else(|_| {
        json!({ "success": false, "error": "Failed to serialize import outcome" })
    })))
}

// GET /api/sync/sheet/info — structure probe for the configured sheet
async fn sheet_info(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sheet_id = state.config.sheets.sheet_id.clone().ok_or_else(|| {
        ApiError::Validation("VIRTUAL_EVENTS_SHEET_ID not configured".to_string())
    })?;

    let info = state
        .sheets
        .sheet_info(&sheet_id)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    Ok(Json(json!({ "success": true, "sheet_info": info })))
}
