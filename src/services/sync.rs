//! sync.rs
//!
//! The reconciliation engine. Each cycle merges one external batch into the
//! local event store:
//! 1. pre-pass cleanup (archive full events, delete stale ones) in its own
//!    transaction — this commit survives a later fetch failure;
//! 2. fetch the external batch;
//! 3. one transaction for the batch: delete-by-absence scoped to the batch's
//!    source, then per-record upsert over the sync-owned field whitelist.
//!    `display_on_website` and `note` are staff-owned and never written on
//!    the update path.
//!
//! The decision layer (dispositions, upsert plans, field conversion) is kept
//! in pure functions so the reconciliation rules are testable without a
//! database.

use anyhow::{anyhow, Context};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::models::event::{
    normalize_registration_link, parse_sheet_date, parse_slot_count, parse_start_date,
    SalesforceEventFields, SheetEventFields, SOURCE_SALESFORCE, SOURCE_SHEET, STATUS_ARCHIVED,
};
use crate::services::salesforce::{SalesforceClient, SalesforceEventRecord};
use crate::services::sheets::{SheetRow, SheetsClient};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SalesforceSyncOutcome {
    pub success: bool,
    pub new_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    pub archived_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SalesforceSyncOutcome {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetImportOutcome {
    pub success: bool,
    pub new_count: u64,
    pub updated_count: u64,
    pub skipped_count: u64,
    pub total_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SheetImportOutcome {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Default::default()
        }
    }
}

/* ---------- decision layer ---------- */

/// An event with no capacity left but a history of fills is done soliciting
/// volunteers; it gets archived rather than deleted.
pub fn needs_archive(available_slots: i32, filled_volunteer_jobs: i32) -> bool {
    available_slots == 0 && filled_volunteer_jobs > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    /// No local record for this identity: insert, with the initial
    /// visibility the source dictates.
    Create { display_on_website: bool },
    /// Existing record: overwrite sync-owned fields only. `reactivate` is
    /// set when an archived event regained capacity.
    Update { reactivate: bool },
}

pub fn plan_salesforce_upsert(
    existing_status: Option<&str>,
    incoming_slots: i32,
    display_flag: Option<&str>,
) -> UpsertAction {
    match existing_status {
        None => UpsertAction::Create {
            display_on_website: display_flag == Some("Yes"),
        },
        Some(status) => UpsertAction::Update {
            reactivate: status == STATUS_ARCHIVED && incoming_slots > 0,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDisposition {
    Import,
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No link, nothing to key the row on.
    BlankLink,
    /// A repeated header line inside the data region.
    HeaderEcho,
    /// The row's status carries the cancellation marker.
    Cancelled,
    /// A presenter is already assigned, so no volunteer is needed.
    PresenterAssigned,
}

pub fn sheet_row_disposition(row: &SheetRow) -> RowDisposition {
    if row.session_link.is_empty() {
        return RowDisposition::Skip(SkipReason::BlankLink);
    }
    if row.session_link == "Session Link" {
        return RowDisposition::Skip(SkipReason::HeaderEcho);
    }
    let status = row.status.to_ascii_lowercase();
    if status == "canceled" || status == "cancelled" {
        return RowDisposition::Skip(SkipReason::Cancelled);
    }
    if !row.presenter.is_empty() {
        return RowDisposition::Skip(SkipReason::PresenterAssigned);
    }
    RowDisposition::Import
}

/// Convert a raw CRM record into the typed sync-owned field set. Slot counts
/// are validated here; an invalid record aborts the batch.
pub fn salesforce_fields(
    record: &SalesforceEventRecord,
) -> Result<SalesforceEventFields, String> {
    let available_slots = parse_slot_count("available_slots", &record.available_slots)?;
    let filled_volunteer_jobs =
        parse_slot_count("filled_volunteer_jobs", &record.filled_volunteer_jobs)?;

    let registration_link = match record.registration_link.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(normalize_registration_link(raw)?),
        _ => None,
    };

    let start_date = match record.start_date.as_deref() {
        Some(raw) if !raw.trim().is_empty() => {
            let parsed = parse_start_date(raw);
            if parsed.is_none() {
                warn!("Could not parse date {} for session {}", raw, record.id);
            }
            parsed
        }
        _ => None,
    };

    Ok(SalesforceEventFields {
        salesforce_id: record.id.clone(),
        name: record.name.clone(),
        available_slots,
        filled_volunteer_jobs,
        date_and_time: record.date_and_time.clone(),
        event_type: record.event_type.clone(),
        registration_link,
        start_date,
    })
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Convert an importable sheet row. The link must already be validated.
pub fn sheet_fields(row: &SheetRow, link: String, sheet_id: &str) -> SheetEventFields {
    let date_and_time = format!("{} {}", row.date, row.time).trim().to_string();
    SheetEventFields {
        name: row.session_title.clone(),
        date_and_time: optional(&date_and_time),
        event_type: optional(&row.session_type),
        registration_link: link,
        start_date: parse_sheet_date(&row.date),
        spreadsheet_id: sheet_id.to_string(),
        presenter_name: optional(&row.presenter),
        presenter_organization: optional(&row.organization),
        presenter_location: optional(&row.presenter_location),
        topic_theme: optional(&row.topic_theme),
        teacher_name: optional(&row.teacher_name),
        school_level: optional(&row.school_level),
    }
}

/* ---------- apply layer ---------- */

/// Full CRM sync cycle. Invoked by both the background timer and the manual
/// HTTP trigger; takes no web-framework context.
pub async fn sync_salesforce_events(
    pool: &PgPool,
    client: &SalesforceClient,
) -> SalesforceSyncOutcome {
    info!("Starting sync process...");
    match run_salesforce_sync(pool, client).await {
        Ok(outcome) => {
            info!(
                "Sync completed: {} new, {} updated, {} deleted, {} archived",
                outcome.new_count, outcome.updated_count, outcome.deleted_count,
                outcome.archived_count
            );
            outcome
        }
        Err(e) => {
            error!("Sync error: {e}");
            SalesforceSyncOutcome::failure(e.to_string())
        }
    }
}

async fn run_salesforce_sync(
    pool: &PgPool,
    client: &SalesforceClient,
) -> anyhow::Result<SalesforceSyncOutcome> {
    // pre-pass cleanup in its own transaction; this stays committed even if
    // the fetch below fails
    let (archived_count, stale_deleted) = cleanup_pre_pass(pool).await?;
    info!("Archived {} full events", archived_count);
    info!("Deleted {} past events", stale_deleted);

    let records = client.query_upcoming_sessions().await?;

    let batch_ids: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let id_list: Vec<String> = batch_ids.iter().map(|s| s.to_string()).collect();

    let mut tx = pool
        .begin()
        .await
        .context("starting sync transaction")?;

    // the CRM is authoritative for existence: drop local CRM rows whose
    // identity is absent from the batch
    let absent_deleted = sqlx::query(
        "DELETE FROM upcoming_events WHERE source = $1 AND NOT (salesforce_id = ANY($2))",
    )
    .bind(SOURCE_SALESFORCE)
    .bind(&id_list)
    .execute(&mut *tx)
    .await
    .context("deleting events no longer in Salesforce")?
    .rows_affected();
    info!("Deleted {} events that are no longer in Salesforce", absent_deleted);

    let mut new_count = 0u64;
    let mut updated_count = 0u64;

    info!("Updating database...");
    for record in &records {
        let fields = salesforce_fields(record)
            .map_err(|e| anyhow!("{e} (record {})", record.id))?;

        let existing: Option<(i64, String)> =
            sqlx::query_as("SELECT id, status FROM upcoming_events WHERE salesforce_id = $1")
                .bind(&fields.salesforce_id)
                .fetch_optional(&mut *tx)
                .await
                .context("looking up event by salesforce_id")?;

        let action = plan_salesforce_upsert(
            existing.as_ref().map(|(_, status)| status.as_str()),
            fields.available_slots,
            record.display_on_website.as_deref(),
        );

        match action {
            UpsertAction::Update { reactivate } => {
                let (id, _) = existing.expect("update action implies an existing row");
                sqlx::query(
                    r#"
                    UPDATE upcoming_events
                    SET name = $1,
                        available_slots = $2,
                        filled_volunteer_jobs = $3,
                        date_and_time = $4,
                        event_type = $5,
                        registration_link = $6,
                        start_date = $7,
                        status = CASE WHEN $8 THEN 'active' ELSE status END,
                        updated_at = NOW()
                    WHERE id = $9
                    "#,
                )
                .bind(&fields.name)
                .bind(fields.available_slots)
                .bind(fields.filled_volunteer_jobs)
                .bind(&fields.date_and_time)
                .bind(&fields.event_type)
                .bind(&fields.registration_link)
                .bind(fields.start_date)
                .bind(reactivate)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("updating event from Salesforce record")?;
                updated_count += 1;
            }
            UpsertAction::Create { display_on_website } => {
                sqlx::query(
                    r#"
                    INSERT INTO upcoming_events
                        (salesforce_id, name, available_slots, filled_volunteer_jobs,
                         date_and_time, event_type, registration_link, start_date,
                         display_on_website, status, source)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', 'salesforce')
                    "#,
                )
                .bind(&fields.salesforce_id)
                .bind(&fields.name)
                .bind(fields.available_slots)
                .bind(fields.filled_volunteer_jobs)
                .bind(&fields.date_and_time)
                .bind(&fields.event_type)
                .bind(&fields.registration_link)
                .bind(fields.start_date)
                .bind(display_on_website)
                .execute(&mut *tx)
                .await
                .context("inserting event from Salesforce record")?;
                new_count += 1;
            }
        }
    }

    tx.commit().await.context("committing sync transaction")?;

    Ok(SalesforceSyncOutcome {
        success: true,
        new_count,
        updated_count,
        deleted_count: stale_deleted + absent_deleted,
        archived_count,
        error: None,
    })
}

/// Archive full events and delete events that started before yesterday.
async fn cleanup_pre_pass(pool: &PgPool) -> anyhow::Result<(u64, u64)> {
    let yesterday = Utc::now() - Duration::days(1);

    let mut tx = pool.begin().await.context("starting cleanup transaction")?;

    let archived = sqlx::query(
        r#"
        UPDATE upcoming_events
        SET status = 'archived', updated_at = NOW()
        WHERE available_slots = 0
          AND filled_volunteer_jobs > 0
          AND status = 'active'
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("archiving full events")?
    .rows_affected();

    let deleted = sqlx::query("DELETE FROM upcoming_events WHERE start_date < $1")
        .bind(yesterday)
        .execute(&mut *tx)
        .await
        .context("deleting past events")?
        .rows_affected();

    tx.commit().await.context("committing cleanup transaction")?;
    Ok((archived, deleted))
}

/// Import one spreadsheet's rows. Only "open" rows (linked, not cancelled,
/// no presenter yet) are imported; identity is (registration_link, source).
pub async fn import_sheet_events(
    pool: &PgPool,
    client: &SheetsClient,
    sheet_id: &str,
) -> SheetImportOutcome {
    info!("Starting virtual events import from sheet: {sheet_id}");
    let rows = match client.read_sheet_rows(sheet_id).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Failed to read sheet data: {e}");
            return SheetImportOutcome::failure(format!("Failed to read Google Sheet: {e}"));
        }
    };

    match apply_sheet_rows(pool, &rows, sheet_id).await {
        Ok(outcome) => {
            info!(
                "Import completed: {} new, {} updated, {} skipped",
                outcome.new_count, outcome.updated_count, outcome.skipped_count
            );
            outcome
        }
        Err(e) => {
            error!("Failed to import virtual events: {e}");
            SheetImportOutcome::failure(format!("Failed to import events: {e}"))
        }
    }
}

async fn apply_sheet_rows(
    pool: &PgPool,
    rows: &[SheetRow],
    sheet_id: &str,
) -> anyhow::Result<SheetImportOutcome> {
    let mut new_count = 0u64;
    let mut updated_count = 0u64;
    let mut skipped_count = 0u64;

    let mut tx = pool.begin().await.context("starting import transaction")?;

    for row in rows {
        match sheet_row_disposition(row) {
            RowDisposition::Skip(reason) => {
                debug!("Skipping sheet row {:?}: {:?}", row.session_title, reason);
                skipped_count += 1;
                continue;
            }
            RowDisposition::Import => {}
        }

        let link = match normalize_registration_link(&row.session_link) {
            Ok(link) => link,
            Err(e) => {
                warn!("Skipping sheet row {:?}: {e}", row.session_title);
                skipped_count += 1;
                continue;
            }
        };

        let fields = sheet_fields(row, link, sheet_id);

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM upcoming_events WHERE registration_link = $1 AND source = $2",
        )
        .bind(&fields.registration_link)
        .bind(SOURCE_SHEET)
        .fetch_optional(&mut *tx)
        .await
        .context("looking up event by registration link")?;

        match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE upcoming_events
                    SET name = $1,
                        date_and_time = $2,
                        event_type = $3,
                        start_date = $4,
                        spreadsheet_id = $5,
                        presenter_name = $6,
                        presenter_organization = $7,
                        presenter_location = $8,
                        topic_theme = $9,
                        teacher_name = $10,
                        school_level = $11,
                        updated_at = NOW()
                    WHERE id = $12
                    "#,
                )
                .bind(&fields.name)
                .bind(&fields.date_and_time)
                .bind(&fields.event_type)
                .bind(fields.start_date)
                .bind(&fields.spreadsheet_id)
                .bind(&fields.presenter_name)
                .bind(&fields.presenter_organization)
                .bind(&fields.presenter_location)
                .bind(&fields.topic_theme)
                .bind(&fields.teacher_name)
                .bind(&fields.school_level)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("updating event from sheet row")?;
                updated_count += 1;
            }
            None => {
                // sheet events default to visible, the opposite of the CRM
                // source
                sqlx::query(
                    r#"
                    INSERT INTO upcoming_events
                        (name, date_and_time, event_type, registration_link, start_date,
                         spreadsheet_id, presenter_name, presenter_organization,
                         presenter_location, topic_theme, teacher_name, school_level,
                         display_on_website, status, source)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                            TRUE, 'active', 'sheet')
                    "#,
                )
                .bind(&fields.name)
                .bind(&fields.date_and_time)
                .bind(&fields.event_type)
                .bind(&fields.registration_link)
                .bind(fields.start_date)
                .bind(&fields.spreadsheet_id)
                .bind(&fields.presenter_name)
                .bind(&fields.presenter_organization)
                .bind(&fields.presenter_location)
                .bind(&fields.topic_theme)
                .bind(&fields.teacher_name)
                .bind(&fields.school_level)
                .execute(&mut *tx)
                .await
                .context("inserting event from sheet row")?;
                new_count += 1;
            }
        }
    }

    tx.commit().await.context("committing import transaction")?;

    Ok(SheetImportOutcome {
        success: true,
        new_count,
        updated_count,
        skipped_count,
        total_processed: rows.len() as u64,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::STATUS_ACTIVE;
    use serde_json::json;

    fn crm_record(id: &str, slots: serde_json::Value, display: Option<&str>) -> SalesforceEventRecord {
        SalesforceEventRecord {
            id: id.to_string(),
            name: "Career Day".to_string(),
            available_slots: slots,
            filled_volunteer_jobs: json!(2),
            date_and_time: Some("01/01/2099 9:00 AM to 11:00 AM".to_string()),
            event_type: Some("Career Fair".to_string()),
            registration_link: Some("https://example.org/signup/1".to_string()),
            display_on_website: display.map(|s| s.to_string()),
            start_date: Some("2099-01-01".to_string()),
        }
    }

    fn open_row() -> SheetRow {
        SheetRow {
            date: "9/18/2025".to_string(),
            time: "1:00 PM".to_string(),
            session_type: "Teacher requested".to_string(),
            teacher_name: "Chris Hamman".to_string(),
            school_level: "Elementary".to_string(),
            district: "KCKPS (KS)".to_string(),
            session_title: "Caterpillar Crazy".to_string(),
            organization: "KCK Public Library".to_string(),
            presenter_location: "Local (KS/MO)".to_string(),
            session_link: "https://example.org/sessions/109476".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn archive_predicate_requires_zero_slots_and_fill_history() {
        assert!(needs_archive(0, 3));
        assert!(!needs_archive(0, 0));
        assert!(!needs_archive(2, 3));
    }

    #[test]
    fn unknown_identity_creates_with_source_default_visibility() {
        assert_eq!(
            plan_salesforce_upsert(None, 5, Some("Yes")),
            UpsertAction::Create {
                display_on_website: true
            }
        );
        assert_eq!(
            plan_salesforce_upsert(None, 5, Some("No")),
            UpsertAction::Create {
                display_on_website: false
            }
        );
        assert_eq!(
            plan_salesforce_upsert(None, 5, None),
            UpsertAction::Create {
                display_on_website: false
            }
        );
    }

    #[test]
    fn known_identity_updates_and_never_carries_a_visibility_value() {
        // the display flag on the incoming record is irrelevant for updates:
        // the plan carries no visibility at all
        assert_eq!(
            plan_salesforce_upsert(Some(STATUS_ACTIVE), 5, Some("Yes")),
            UpsertAction::Update { reactivate: false }
        );
        assert_eq!(
            plan_salesforce_upsert(Some(STATUS_ACTIVE), 0, Some("No")),
            UpsertAction::Update { reactivate: false }
        );
    }

    #[test]
    fn archived_event_reactivates_only_when_capacity_returns() {
        assert_eq!(
            plan_salesforce_upsert(Some(STATUS_ARCHIVED), 4, None),
            UpsertAction::Update { reactivate: true }
        );
        assert_eq!(
            plan_salesforce_upsert(Some(STATUS_ARCHIVED), 0, None),
            UpsertAction::Update { reactivate: false }
        );
    }

    #[test]
    fn crm_scenario_two_runs() {
        // run 1: unknown identity, display flag Yes -> created visible
        let record = crm_record("A1", json!("5"), Some("Yes"));
        let fields = salesforce_fields(&record).unwrap();
        assert_eq!(fields.available_slots, 5);
        assert_eq!(
            plan_salesforce_upsert(None, fields.available_slots, record.display_on_website.as_deref()),
            UpsertAction::Create {
                display_on_website: true
            }
        );

        // run 2: same identity, zero slots -> update, no visibility change,
        // no reactivation; the archive pre-pass handles the status flip
        let record = crm_record("A1", json!("0"), Some("Yes"));
        let fields = salesforce_fields(&record).unwrap();
        assert_eq!(
            plan_salesforce_upsert(Some(STATUS_ACTIVE), fields.available_slots, record.display_on_website.as_deref()),
            UpsertAction::Update { reactivate: false }
        );
        assert!(needs_archive(fields.available_slots, fields.filled_volunteer_jobs));
    }

    #[test]
    fn crm_record_with_bad_slot_count_is_rejected() {
        let record = crm_record("A1", json!("several"), None);
        assert!(salesforce_fields(&record).is_err());
        let record = crm_record("A1", json!(-2), None);
        assert!(salesforce_fields(&record).is_err());
    }

    #[test]
    fn crm_anchor_links_are_unwrapped() {
        let mut record = crm_record("A1", json!(1), None);
        record.registration_link =
            Some(r#"<a href="https://example.org/s/9" target="_blank">Sign up</a>"#.to_string());
        let fields = salesforce_fields(&record).unwrap();
        assert_eq!(
            fields.registration_link.as_deref(),
            Some("https://example.org/s/9")
        );
    }

    #[test]
    fn open_rows_import() {
        assert_eq!(sheet_row_disposition(&open_row()), RowDisposition::Import);
    }

    #[test]
    fn presenter_rows_never_import() {
        let mut row = open_row();
        row.presenter = "Patrice Gonzalez".to_string();
        assert_eq!(
            sheet_row_disposition(&row),
            RowDisposition::Skip(SkipReason::PresenterAssigned)
        );
    }

    #[test]
    fn blank_link_header_echo_and_cancelled_rows_skip() {
        let mut row = open_row();
        row.session_link = String::new();
        assert_eq!(
            sheet_row_disposition(&row),
            RowDisposition::Skip(SkipReason::BlankLink)
        );

        let mut row = open_row();
        row.session_link = "Session Link".to_string();
        assert_eq!(
            sheet_row_disposition(&row),
            RowDisposition::Skip(SkipReason::HeaderEcho)
        );

        let mut row = open_row();
        row.status = "Canceled".to_string();
        assert_eq!(
            sheet_row_disposition(&row),
            RowDisposition::Skip(SkipReason::Cancelled)
        );
        row.status = "CANCELLED".to_string();
        assert_eq!(
            sheet_row_disposition(&row),
            RowDisposition::Skip(SkipReason::Cancelled)
        );
    }

    #[test]
    fn sheet_fields_fill_display_string_and_start_date() {
        let row = open_row();
        let fields = sheet_fields(&row, row.session_link.clone(), "sheet-1");
        assert_eq!(fields.date_and_time.as_deref(), Some("9/18/2025 1:00 PM"));
        assert_eq!(
            fields.start_date.unwrap().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2025, 9, 18).unwrap()
        );
        assert_eq!(fields.teacher_name.as_deref(), Some("Chris Hamman"));
        assert_eq!(fields.presenter_name, None);
        assert_eq!(fields.spreadsheet_id, "sheet-1");
    }
}
