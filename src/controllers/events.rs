//! events.rs
//!
//! Staff and public read endpoints over the event store, plus the
//! staff-owned single-record mutations: visibility toggle, note editing,
//! district tags and school tags. Sync never writes any of these fields.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::event::{EventApiView, UpcomingEvent, SOURCE_SALESFORCE, SOURCE_SHEET, STATUS_ACTIVE, STATUS_ARCHIVED};
use crate::models::school::SchoolMapping;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/signup", get(signup_events))
        .route("/events/displayed", get(displayed_events))
        .route("/events/visibility", post(toggle_visibility))
        .route("/events/{id}/note", put(update_note).delete(delete_note))
        .route("/events/{id}/districts", get(list_event_districts).post(add_event_district))
        .route("/events/{id}/districts/{district}", delete(remove_event_district))
        .route("/events/{id}/schools", get(list_event_schools).post(add_event_schools))
        .route("/events/{id}/schools/{school_id}", delete(remove_event_school))
}

/* ---------- listing ---------- */

#[derive(Debug, Deserialize)]
struct EventsQuery {
    status: Option<String>,
    source: Option<String>,
    visible: Option<bool>,
    district: Option<String>,
}

// GET /api/events — staff dashboard listing with filters
async fn list_events(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<EventsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(ref st) = params.status {
        if st != STATUS_ACTIVE && st != STATUS_ARCHIVED {
            return Err(ApiError::Validation(
                "status must be active | archived".to_string(),
            ));
        }
    }
    if let Some(ref src) = params.source {
        if src != SOURCE_SALESFORCE && src != SOURCE_SHEET {
            return Err(ApiError::Validation(
                "source must be salesforce | sheet".to_string(),
            ));
        }
    }

    let mut q = String::from("SELECT * FROM upcoming_events WHERE 1=1");
    let mut bind_idx = 1;
    if params.status.is_some() {
        q.push_str(&format!(" AND status = ${bind_idx}"));
        bind_idx += 1;
    }
    if params.source.is_some() {
        q.push_str(&format!(" AND source = ${bind_idx}"));
        bind_idx += 1;
    }
    if params.visible.is_some() {
        q.push_str(&format!(" AND display_on_website = ${bind_idx}"));
        bind_idx += 1;
    }
    if params.district.is_some() {
        q.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM event_district_mappings m \
             WHERE m.event_id = upcoming_events.id AND m.district = ${bind_idx})"
        ));
    }
    q.push_str(" ORDER BY start_date ASC");

    let mut dbq = sqlx::query_as::<_, UpcomingEvent>(&q);
    if let Some(st) = params.status {
        dbq = dbq.bind(st);
    }
    if let Some(src) = params.source {
        dbq = dbq.bind(src);
    }
    if let Some(vis) = params.visible {
        dbq = dbq.bind(vis);
    }
    if let Some(d) = params.district {
        dbq = dbq.bind(d);
    }

    let events: Vec<EventApiView> = dbq
        .fetch_all(&state.db.pool)
        .await?
        .into_iter()
        .map(EventApiView::from)
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": events.len(),
        "events": events
    })))
}

// GET /api/events/signup — public list behind the volunteer signup page:
// visible, active, in-person (CRM) events only
async fn signup_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EventApiView>>, ApiError> {
    let events = sqlx::query_as::<_, UpcomingEvent>(
        "SELECT * FROM upcoming_events \
         WHERE display_on_website = TRUE AND status = $1 AND source = $2 \
         ORDER BY start_date ASC",
    )
    .bind(STATUS_ACTIVE)
    .bind(SOURCE_SALESFORCE)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(events.into_iter().map(EventApiView::from).collect()))
}

// GET /api/events/displayed — every visible event regardless of source
async fn displayed_events(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EventApiView>>, ApiError> {
    let events = sqlx::query_as::<_, UpcomingEvent>(
        "SELECT * FROM upcoming_events WHERE display_on_website = TRUE ORDER BY start_date ASC",
    )
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(events.into_iter().map(EventApiView::from).collect()))
}

/* ---------- staff-owned mutations ---------- */

// Events are addressed by their external identity where one exists; the
// numeric id (as text) covers sheet events.
const IDENTITY_FILTER: &str = "(salesforce_id = $1 OR id::text = $1)";

#[derive(Debug, Deserialize)]
struct ToggleVisibilityRequest {
    event_id: String,
    visible: bool,
}

// POST /api/events/visibility — idempotent boolean set, last write wins
async fn toggle_visibility(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ToggleVisibilityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let current_state: Option<bool> = sqlx::query_scalar(&format!(
        "UPDATE upcoming_events SET display_on_website = $2, updated_at = NOW() \
         WHERE {IDENTITY_FILTER} RETURNING display_on_website"
    ))
    .bind(&req.event_id)
    .bind(req.visible)
    .fetch_optional(&state.db.pool)
    .await?;

    let Some(current_state) = current_state else {
        return Err(ApiError::NotFound("Event not found".to_string()));
    };

    tracing::info!(
        "{} set event {} visibility to {}",
        user.username,
        req.event_id,
        current_state
    );

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Event visibility {}",
            if current_state { "enabled" } else { "disabled" }
        ),
        "current_state": current_state
    })))
}

#[derive(Debug, Deserialize)]
struct NoteRequest {
    note: Option<String>,
}

// PUT /api/events/{id}/note — empty input clears the note
async fn update_note(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(event_id): Path<String>,
    Json(req): Json<NoteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let note = req
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let stored: Option<Option<String>> = sqlx::query_scalar(&format!(
        "UPDATE upcoming_events SET note = $2, updated_at = NOW() \
         WHERE {IDENTITY_FILTER} RETURNING note"
    ))
    .bind(&event_id)
    .bind(&note)
    .fetch_optional(&state.db.pool)
    .await?;

    let Some(stored) = stored else {
        return Err(ApiError::NotFound("Event not found".to_string()));
    };

    Ok(Json(json!({
        "success": true,
        "note": stored
    })))
}

// DELETE /api/events/{id}/note
async fn delete_note(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cleared = sqlx::query(&format!(
        "UPDATE upcoming_events SET note = NULL, updated_at = NOW() WHERE {IDENTITY_FILTER}"
    ))
    .bind(&event_id)
    .execute(&state.db.pool)
    .await?
    .rows_affected();

    if cleared == 0 {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }

    Ok(Json(json!({ "success": true, "note": null })))
}

/* ---------- district tags ---------- */

async fn event_exists(pool: &sqlx::PgPool, event_id: i64) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM upcoming_events WHERE id = $1)")
        .bind(event_id)
        .fetch_one(pool)
        .await
}

async fn districts_for_event(
    pool: &sqlx::PgPool,
    event_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT district FROM event_district_mappings WHERE event_id = $1 ORDER BY district",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}

// GET /api/events/{id}/districts
async fn list_event_districts(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !event_exists(&state.db.pool, id).await? {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }
    let districts = districts_for_event(&state.db.pool, id).await?;
    Ok(Json(json!({ "success": true, "districts": districts })))
}

#[derive(Debug, Deserialize)]
struct DistrictRequest {
    district: String,
}

// POST /api/events/{id}/districts — adding an existing tag is a no-op
async fn add_event_district(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<DistrictRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let district = req.district.trim().to_string();
    if district.is_empty() {
        return Err(ApiError::Validation("district must not be empty".to_string()));
    }
    if !event_exists(&state.db.pool, id).await? {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }

    sqlx::query(
        "INSERT INTO event_district_mappings (event_id, district) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(id)
    .bind(&district)
    .execute(&state.db.pool)
    .await?;

    let districts = districts_for_event(&state.db.pool, id).await?;
    Ok(Json(json!({ "success": true, "districts": districts })))
}

// DELETE /api/events/{id}/districts/{district}
async fn remove_event_district(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path((id, district)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !event_exists(&state.db.pool, id).await? {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }

    sqlx::query("DELETE FROM event_district_mappings WHERE event_id = $1 AND district = $2")
        .bind(id)
        .bind(&district)
        .execute(&state.db.pool)
        .await?;

    let districts = districts_for_event(&state.db.pool, id).await?;
    Ok(Json(json!({ "success": true, "districts": districts })))
}

/* ---------- school tags ---------- */

async fn schools_for_event(
    pool: &sqlx::PgPool,
    event_id: i64,
) -> Result<Vec<SchoolMapping>, sqlx::Error> {
    sqlx::query_as::<_, SchoolMapping>(
        "SELECT s.id, s.name, s.district, s.parent_salesforce_id \
         FROM school_mappings s \
         JOIN event_school_mappings m ON m.school_id = s.id \
         WHERE m.event_id = $1 \
         ORDER BY s.name",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}

// GET /api/events/{id}/schools
async fn list_event_schools(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !event_exists(&state.db.pool, id).await? {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }
    let schools = schools_for_event(&state.db.pool, id).await?;
    Ok(Json(json!({ "success": true, "schools": schools })))
}

#[derive(Debug, Deserialize)]
struct AddSchoolsRequest {
    school_ids: Vec<i32>,
}

// POST /api/events/{id}/schools — extends the existing set
async fn add_event_schools(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddSchoolsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !event_exists(&state.db.pool, id).await? {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }

    let mut tx = state.db.pool.begin().await?;
    for school_id in &req.school_ids {
        sqlx::query(
            "INSERT INTO event_school_mappings (event_id, school_id) \
             SELECT $1, $2 WHERE EXISTS (SELECT 1 FROM school_mappings WHERE id = $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(school_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    let schools = schools_for_event(&state.db.pool, id).await?;
    Ok(Json(json!({ "success": true, "schools": schools })))
}

// DELETE /api/events/{id}/schools/{school_id}
async fn remove_event_school(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path((id, school_id)): Path<(i64, i32)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !event_exists(&state.db.pool, id).await? {
        return Err(ApiError::NotFound("Event not found".to_string()));
    }

    sqlx::query("DELETE FROM event_school_mappings WHERE event_id = $1 AND school_id = $2")
        .bind(id)
        .bind(school_id)
        .execute(&state.db.pool)
        .await?;

    let schools = schools_for_event(&state.db.pool, id).await?;
    Ok(Json(json!({ "success": true, "schools": schools })))
}
