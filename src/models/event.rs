//! event.rs
//!
//! The merged event entity and the typed field sets the sync engine is
//! allowed to write. Staff-owned columns (`display_on_website`, `note`,
//! district/school tags) are deliberately absent from the update structs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_ARCHIVED: &str = "archived";

pub const SOURCE_SALESFORCE: &str = "salesforce";
pub const SOURCE_SHEET: &str = "sheet";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub id: i64,
    pub salesforce_id: Option<String>,
    pub name: String,
    pub available_slots: i32,
    pub filled_volunteer_jobs: i32,
    pub date_and_time: Option<String>,
    pub event_type: Option<String>,
    pub registration_link: Option<String>,
    pub display_on_website: bool,
    pub status: String,
    pub source: String,
    pub note: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub spreadsheet_id: Option<String>,
    pub presenter_name: Option<String>,
    pub presenter_organization: Option<String>,
    pub presenter_location: Option<String>,
    pub topic_theme: Option<String>,
    pub teacher_name: Option<String>,
    pub school_level: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CRM-shaped view of an event, matching the field names the upstream API
/// uses. The public signup pages consume this shape.
#[derive(Debug, Clone, Serialize)]
pub struct EventApiView {
    pub id: i64,
    #[serde(rename = "Id")]
    pub salesforce_id: Option<String>,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Available_Slots__c")]
    pub available_slots: i32,
    #[serde(rename = "Filled_Volunteer_Jobs__c")]
    pub filled_volunteer_jobs: i32,
    #[serde(rename = "Date_and_Time_for_Cal__c")]
    pub date_and_time: Option<String>,
    #[serde(rename = "Session_Type__c")]
    pub event_type: Option<String>,
    #[serde(rename = "Registration_Link__c")]
    pub registration_link: Option<String>,
    #[serde(rename = "Display_on_Website__c")]
    pub display_on_website: bool,
    #[serde(rename = "Start_Date__c")]
    pub start_date: Option<DateTime<Utc>>,
    pub status: String,
    pub source: String,
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presenter_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presenter_organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presenter_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_level: Option<String>,
}

impl From<UpcomingEvent> for EventApiView {
    fn from(e: UpcomingEvent) -> Self {
        EventApiView {
            id: e.id,
            salesforce_id: e.salesforce_id,
            name: e.name,
            available_slots: e.available_slots,
            filled_volunteer_jobs: e.filled_volunteer_jobs,
            date_and_time: e.date_and_time,
            event_type: e.event_type,
            registration_link: e.registration_link,
            display_on_website: e.display_on_website,
            start_date: e.start_date,
            status: e.status,
            source: e.source,
            note: e.note,
            presenter_name: e.presenter_name,
            presenter_organization: e.presenter_organization,
            presenter_location: e.presenter_location,
            topic_theme: e.topic_theme,
            teacher_name: e.teacher_name,
            school_level: e.school_level,
        }
    }
}

/// Sync-owned fields for a CRM record. Visibility and note are staff-owned
/// and have no member here, so the upsert path cannot touch them.
#[derive(Debug, Clone, PartialEq)]
pub struct SalesforceEventFields {
    pub salesforce_id: String,
    pub name: String,
    pub available_slots: i32,
    pub filled_volunteer_jobs: i32,
    pub date_and_time: Option<String>,
    pub event_type: Option<String>,
    pub registration_link: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
}

/// Sync-owned fields for a spreadsheet row. Same rule: no visibility member.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetEventFields {
    pub name: String,
    pub date_and_time: Option<String>,
    pub event_type: Option<String>,
    pub registration_link: String,
    pub start_date: Option<DateTime<Utc>>,
    pub spreadsheet_id: String,
    pub presenter_name: Option<String>,
    pub presenter_organization: Option<String>,
    pub presenter_location: Option<String>,
    pub topic_theme: Option<String>,
    pub teacher_name: Option<String>,
    pub school_level: Option<String>,
}

/// Parse a slot count as the CRM sends it: an integer, a float, or either
/// one wrapped in a string. Negative or non-numeric input is rejected.
pub fn parse_slot_count(field: &str, raw: &serde_json::Value) -> Result<i32, String> {
    let value = match raw {
        serde_json::Value::Null => 0.0,
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{field} must be a valid number"))?,
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>()
                    .map_err(|_| format!("{field} must be a valid number"))?
            }
        }
        _ => return Err(format!("{field} must be a valid number")),
    };

    if value < 0.0 {
        return Err(format!("{field} cannot be negative"));
    }
    Ok(value as i32)
}

/// Validate a registration link. HTML anchor tags are unwrapped to their
/// href before the URL check.
pub fn normalize_registration_link(raw: &str) -> Result<String, String> {
    let mut value = raw.trim().to_string();

    if value.starts_with("<a") && value.contains("href=") {
        if let Some(href) = extract_href(&value) {
            value = href;
        }
    }

    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err("Registration link must be a valid URL".to_string());
    }
    Ok(value)
}

fn extract_href(tag: &str) -> Option<String> {
    let rest = &tag[tag.find("href=")? + "href=".len()..];
    let rest = rest.strip_prefix('"').or_else(|| rest.strip_prefix('\'')).unwrap_or(rest);
    let end = rest.find(|c: char| c == '"' || c == '\'' || c == ' ' || c == '>')?;
    let href = &rest[..end];
    if href.is_empty() {
        None
    } else {
        Some(href.to_string())
    }
}

/// Parse the CRM's `Start_Date__c` (YYYY-MM-DD) into a UTC midnight timestamp.
pub fn parse_start_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse the spreadsheet's date column (M/D/YYYY) the same way.
pub fn parse_sheet_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw.trim(), "%m/%d/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slot_count_accepts_int_float_and_string() {
        assert_eq!(parse_slot_count("available_slots", &json!(5)).unwrap(), 5);
        assert_eq!(parse_slot_count("available_slots", &json!(5.0)).unwrap(), 5);
        assert_eq!(parse_slot_count("available_slots", &json!("5")).unwrap(), 5);
        assert_eq!(parse_slot_count("available_slots", &json!("5.0")).unwrap(), 5);
    }

    #[test]
    fn slot_count_treats_null_and_blank_as_zero() {
        assert_eq!(parse_slot_count("available_slots", &json!(null)).unwrap(), 0);
        assert_eq!(parse_slot_count("available_slots", &json!("")).unwrap(), 0);
    }

    #[test]
    fn slot_count_rejects_negative_and_garbage() {
        assert!(parse_slot_count("available_slots", &json!(-1)).is_err());
        assert!(parse_slot_count("available_slots", &json!("-3")).is_err());
        assert!(parse_slot_count("available_slots", &json!("lots")).is_err());
        assert!(parse_slot_count("available_slots", &json!(true)).is_err());
    }

    #[test]
    fn registration_link_unwraps_anchor_tags() {
        let link = normalize_registration_link(
            r#"<a href="https://example.org/signup/42" target="_blank">Sign up</a>"#,
        )
        .unwrap();
        assert_eq!(link, "https://example.org/signup/42");

        let link = normalize_registration_link("<a href='http://example.org/x'>x</a>").unwrap();
        assert_eq!(link, "http://example.org/x");
    }

    #[test]
    fn registration_link_rejects_non_urls() {
        assert!(normalize_registration_link("example.org/signup").is_err());
        assert!(normalize_registration_link("<a href=''>empty</a>").is_err());
    }

    #[test]
    fn start_date_parses_both_formats() {
        let d = parse_start_date("2099-01-01").unwrap();
        assert_eq!(d.date_naive(), NaiveDate::from_ymd_opt(2099, 1, 1).unwrap());

        let d = parse_sheet_date("9/18/2025").unwrap();
        assert_eq!(d.date_naive(), NaiveDate::from_ymd_opt(2025, 9, 18).unwrap());

        assert!(parse_start_date("not a date").is_none());
        assert!(parse_sheet_date("2025-09-18").is_none());
    }
}
