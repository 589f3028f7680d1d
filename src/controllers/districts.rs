//! District views and the school-mappings reference data.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::models::event::{EventApiView, UpcomingEvent};
use crate::models::school::{self, SchoolMapping};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/districts", get(list_districts))
        .route("/districts/{name}/events", get(district_events))
        .route("/school-mappings", get(list_school_mappings))
        .route("/school-mappings/search", get(search_school_mappings))
        .route("/school-mappings/district/{district}", get(schools_by_district))
        .route("/school-mappings/sync", post(sync_school_mappings))
}

// GET /api/districts — every tagged district with its event counts
async fn list_districts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        r#"
        SELECT m.district,
               COUNT(*) AS event_count,
               COUNT(*) FILTER (WHERE e.display_on_website) AS visible_event_count
        FROM event_district_mappings m
        JOIN upcoming_events e ON e.id = m.event_id
        GROUP BY m.district
        ORDER BY m.district
        "#,
    )
    .fetch_all(&state.db.pool)
    .await?;

    let districts: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(name, event_count, visible_event_count)| {
            json!({
                "name": name,
                "event_count": event_count,
                "visible_event_count": visible_event_count
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "districts": districts })))
}

// GET /api/districts/{name}/events — events tagged with this district, plus
// the district's schools
async fn district_events(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let events = sqlx::query_as::<_, UpcomingEvent>(
        r#"
        SELECT e.* FROM upcoming_events e
        JOIN event_district_mappings m ON m.event_id = e.id
        WHERE m.district = $1
        ORDER BY e.start_date ASC
        "#,
    )
    .bind(&name)
    .fetch_all(&state.db.pool)
    .await?;

    let schools = sqlx::query_as::<_, SchoolMapping>(
        "SELECT * FROM school_mappings WHERE district = $1 ORDER BY name",
    )
    .bind(&name)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "district": name,
        "events": events.into_iter().map(EventApiView::from).collect::<Vec<_>>(),
        "schools": schools
    })))
}

// GET /api/school-mappings
async fn list_school_mappings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SchoolMapping>>, ApiError> {
    let mappings =
        sqlx::query_as::<_, SchoolMapping>("SELECT * FROM school_mappings ORDER BY name")
            .fetch_all(&state.db.pool)
            .await?;
    Ok(Json(mappings))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

// GET /api/school-mappings/search?q= — name or district, first 10 hits
async fn search_school_mappings(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SchoolMapping>>, ApiError> {
    let query = params.q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Ok(Json(vec![]));
    }

    let pattern = format!("%{query}%");
    let mappings = sqlx::query_as::<_, SchoolMapping>(
        "SELECT * FROM school_mappings \
         WHERE name ILIKE $1 OR district ILIKE $1 \
         ORDER BY name LIMIT 10",
    )
    .bind(&pattern)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(mappings))
}

// GET /api/school-mappings/district/{district}
async fn schools_by_district(
    State(state): State<Arc<AppState>>,
    Path(district): Path<String>,
) -> Result<Json<Vec<SchoolMapping>>, ApiError> {
    let mappings = sqlx::query_as::<_, SchoolMapping>(
        "SELECT * FROM school_mappings WHERE district = $1 ORDER BY name",
    )
    .bind(&district)
    .fetch_all(&state.db.pool)
    .await?;
    Ok(Json(mappings))
}

// POST /api/school-mappings/sync — replace the table with the CSV contents
async fn sync_school_mappings(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = school::load_from_csv(&state.config.sync.school_mappings_file)
        .map_err(ApiError::Validation)?;

    let mut tx = state.db.pool.begin().await?;
    sqlx::query("DELETE FROM school_mappings").execute(&mut *tx).await?;
    for row in &rows {
        sqlx::query(
            "INSERT INTO school_mappings (name, district, parent_salesforce_id) \
             VALUES ($1, $2, $3)",
        )
        .bind(&row.name)
        .bind(&row.district)
        .bind(&row.parent_salesforce_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully synced {} school mappings to database", rows.len())
    })))
}
