//! Reader for the virtual-events spreadsheet, fetched through its public
//! CSV export URL. The sheet carries one header line plus three fixed
//! banner rows before the data starts, and its column headers come wrapped
//! in extra help text, so both are normalized here before any row reaches
//! the import path.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SheetsConfig;

/// The 14 columns an importable sheet must carry.
pub const EXPECTED_COLUMNS: [&str; 14] = [
    "Status",
    "Date",
    "Time",
    "Session Type",
    "Teacher Name",
    "School Name",
    "School Level",
    "District",
    "Session Title",
    "Presenter",
    "Organization",
    "Presenter Location",
    "Topic/Theme",
    "Session Link",
];

/// Banner rows between the header line and the first data row.
const SKIP_ROWS: usize = 3;

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Sheet ID is required")]
    MissingSheetId,

    #[error("Unable to connect to Google Sheet {sheet_id}: {reason}")]
    Connection { sheet_id: String, reason: String },

    #[error("Google Sheet does not have the expected structure: missing columns {0:?}")]
    Structure(Vec<String>),

    #[error("No data found in Google Sheet")]
    Empty,

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// One normalized data row. Every field is a trimmed string; absent cells
/// come through as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SheetRow {
    pub status: String,
    pub date: String,
    pub time: String,
    pub session_type: String,
    pub teacher_name: String,
    pub school_name: String,
    pub school_level: String,
    pub district: String,
    pub session_title: String,
    pub presenter: String,
    pub organization: String,
    pub presenter_location: String,
    pub topic_theme: String,
    pub session_link: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetInfo {
    pub sheet_id: String,
    pub row_count: usize,
    pub data_rows: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    pub valid_structure: bool,
}

#[derive(Clone)]
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
}

impl SheetsClient {
    pub fn from_config(config: &SheetsConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(config.user_agent.clone())
                .build()
                .expect("Failed to create HTTP client"),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch and parse the sheet. Tries the gviz CSV endpoint first, then
    /// the plain export URL.
    pub async fn read_sheet_rows(&self, sheet_id: &str) -> Result<Vec<SheetRow>, SheetsError> {
        if sheet_id.is_empty() {
            return Err(SheetsError::MissingSheetId);
        }

        let primary = format!(
            "{}/spreadsheets/d/{}/gviz/tq?tqx=out:csv",
            self.base_url, sheet_id
        );
        let fallback = format!(
            "{}/spreadsheets/d/{}/export?format=csv&gid=0",
            self.base_url, sheet_id
        );

        info!("Fetching sheet {} via CSV export", sheet_id);
        let body = match self.fetch_csv(&primary).await {
            Ok(body) => body,
            Err(primary_err) => {
                warn!("Primary sheet URL failed: {}", primary_err);
                self.fetch_csv(&fallback)
                    .await
                    .map_err(|reason| SheetsError::Connection {
                        sheet_id: sheet_id.to_string(),
                        reason: format!("{primary_err}; fallback: {reason}"),
                    })?
            }
        };

        let rows = parse_sheet_csv(&body)?;
        info!("Processed {} rows from sheet {}", rows.len(), sheet_id);
        Ok(rows)
    }

    async fn fetch_csv(&self, url: &str) -> Result<String, String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        response.text().await.map_err(|e| e.to_string())
    }

    /// Structure probe used by the dashboard before an import is attempted.
    pub async fn sheet_info(&self, sheet_id: &str) -> Result<SheetInfo, SheetsError> {
        let rows = self.read_sheet_rows(sheet_id).await?;
        let data_rows = rows.iter().filter(|r| !r.session_link.is_empty()).count();
        Ok(SheetInfo {
            sheet_id: sheet_id.to_string(),
            row_count: rows.len(),
            data_rows,
            column_count: EXPECTED_COLUMNS.len(),
            columns: EXPECTED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            valid_structure: !rows.is_empty(),
        })
    }
}

/// Parse the exported CSV: header line, three banner rows, then data.
/// Header cells are matched by containment so decorated headers like
/// `"Presenter (leave blank if unfilled)"` still map to `Presenter`.
pub fn parse_sheet_csv(body: &str) -> Result<Vec<SheetRow>, SheetsError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record?,
        None => return Err(SheetsError::Empty),
    };

    let column_index = map_columns(header.iter())?;

    let mut rows = Vec::new();
    for (i, record) in records.enumerate() {
        let record = record?;
        if i < SKIP_ROWS {
            continue;
        }
        let cell = |name: &str| -> String {
            column_index
                .get(name)
                .and_then(|&idx| record.get(idx))
                .unwrap_or("")
                .trim()
                .to_string()
        };
        rows.push(SheetRow {
            status: cell("Status"),
            date: cell("Date"),
            time: cell("Time"),
            session_type: cell("Session Type"),
            teacher_name: cell("Teacher Name"),
            school_name: cell("School Name"),
            school_level: cell("School Level"),
            district: cell("District"),
            session_title: cell("Session Title"),
            presenter: cell("Presenter"),
            organization: cell("Organization"),
            presenter_location: cell("Presenter Location"),
            topic_theme: cell("Topic/Theme"),
            session_link: cell("Session Link"),
        });
    }

    if rows.is_empty() {
        return Err(SheetsError::Empty);
    }
    Ok(rows)
}

fn map_columns<'a>(
    header: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, usize>, SheetsError> {
    let cells: Vec<&str> = header.map(str::trim).collect();
    let mut index = HashMap::new();
    let mut claimed = vec![false; cells.len()];

    for expected in EXPECTED_COLUMNS {
        // exact match first, containment second; a cell can back only one
        // expected column ("Presenter" must not steal "Presenter Location")
        let found = cells
            .iter()
            .position(|c| *c == expected)
            .or_else(|| {
                cells
                    .iter()
                    .enumerate()
                    .position(|(i, c)| !claimed[i] && c.contains(expected))
            });
        if let Some(pos) = found {
            claimed[pos] = true;
            index.insert(expected.to_string(), pos);
        }
    }

    let missing: Vec<String> = EXPECTED_COLUMNS
        .iter()
        .filter(|c| !index.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SheetsError::Structure(missing));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_CSV: &str = "\
Status,Date,Time,Session Type,Teacher Name,School Name,School Level,District,Session Title,Presenter,Organization,Presenter Location,Topic/Theme,Session Link
banner,,,,,,,,,,,,,
banner,,,,,,,,,,,,,
banner,,,,,,,,,,,,,
,9/18/2025,1:00 PM,Teacher requested,Chris Hamman,,Elementary,KCKPS (KS),Caterpillar Crazy,,KCK Public Library,Local (KS/MO),Insects,https://example.org/sessions/109476
canceled,9/19/2025,9:00 AM,Teacher requested,Dana Ro,,Middle,KCPS (MO),Canceled Session,,,,,https://example.org/sessions/109500
";

    #[test]
    fn parses_data_rows_after_banner_rows() {
        let rows = parse_sheet_csv(SAMPLE_CSV).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_title, "Caterpillar Crazy");
        assert_eq!(rows[0].district, "KCKPS (KS)");
        assert_eq!(rows[1].status, "canceled");
    }

    #[test]
    fn decorated_headers_still_map() {
        let csv = SAMPLE_CSV.replacen("Presenter,", "Presenter (blank = unfilled),", 1);
        let rows = parse_sheet_csv(&csv).unwrap();
        assert_eq!(rows[0].presenter, "");
        assert_eq!(rows[0].presenter_location, "Local (KS/MO)");
    }

    #[test]
    fn missing_columns_fail_validation() {
        let csv = "Status,Date,Time\nx,y,z\nx,y,z\nx,y,z\nx,y,z\n";
        match parse_sheet_csv(csv) {
            Err(SheetsError::Structure(missing)) => {
                assert!(missing.contains(&"Session Link".to_string()));
            }
            other => panic!("expected structure error, got {other:?}"),
        }
    }

    #[test]
    fn sheet_with_only_banner_rows_is_empty() {
        let csv = "Status,Date,Time,Session Type,Teacher Name,School Name,School Level,District,Session Title,Presenter,Organization,Presenter Location,Topic/Theme,Session Link\nb,,,,,,,,,,,,,\nb,,,,,,,,,,,,,\nb,,,,,,,,,,,,,\n";
        assert!(matches!(parse_sheet_csv(csv), Err(SheetsError::Empty)));
    }

    #[tokio::test]
    async fn falls_back_to_export_url() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/spreadsheets/d/sheet-1/gviz/tq"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/spreadsheets/d/sheet-1/export"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_CSV))
            .mount(&server)
            .await;

        let client = SheetsClient {
            http: reqwest::Client::new(),
            base_url: server.uri(),
        };
        let rows = client.read_sheet_rows("sheet-1").await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn both_urls_failing_is_a_connection_error() {
        let server = MockServer::start().await;
        // no mounted routes: wiremock answers 404 for everything
        let client = SheetsClient {
            http: reqwest::Client::new(),
            base_url: server.uri(),
        };
        let err = client.read_sheet_rows("sheet-1").await.unwrap_err();
        assert!(matches!(err, SheetsError::Connection { .. }));
    }
}
