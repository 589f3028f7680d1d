//! salesforce.rs
//!
//! Client for the CRM that feeds the event store:
//! - login with username + password + security token, yielding a session
//!   token for subsequent calls;
//! - a parameterized SOQL query over the REST query endpoint, returning the
//!   flat session records the reconciliation engine consumes.
//!
//! All network calls go through a `CircuitBreaker` so a dead CRM does not
//! get hammered by every sync cycle.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, SalesforceConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Too many consecutive failures, requests blocked until the timeout
    /// elapses.
    Open,
    /// Timeout elapsed, one probe request allowed through.
    HalfOpen,
}

pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    last_failure: RwLock<Option<Instant>>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: RwLock::new(None),
            failure_threshold,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn can_execute(&self) -> bool {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .read()
                    .unwrap()
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.timeout {
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("Circuit breaker recovered, back to Closed");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.write().unwrap() = Some(Instant::now());

        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed => {
                if failures >= self.failure_threshold {
                    *state = CircuitState::Open;
                    error!(
                        "Circuit breaker OPENED after {} consecutive failures",
                        failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker probe failed, back to Open");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }
}

#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("Salesforce temporarily unavailable (circuit breaker open)")]
    Unavailable,

    #[error("Failed to authenticate with Salesforce: {0}")]
    Auth(String),

    #[error("Salesforce request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected Salesforce response: {0}")]
    Malformed(String),
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: Option<String>,
    message: Option<String>,
}

/// One flat session record as the query endpoint returns it. Slot counts can
/// arrive as numbers or as strings, so they stay `serde_json::Value` until
/// the validation boundary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SalesforceEventRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Available_Slots__c", default)]
    pub available_slots: serde_json::Value,
    #[serde(rename = "Filled_Volunteer_Jobs__c", default)]
    pub filled_volunteer_jobs: serde_json::Value,
    #[serde(rename = "Date_and_Time_for_Cal__c", default)]
    pub date_and_time: Option<String>,
    #[serde(rename = "Session_Type__c", default)]
    pub event_type: Option<String>,
    #[serde(rename = "Registration_Link__c", default)]
    pub registration_link: Option<String>,
    #[serde(rename = "Display_on_Website__c", default)]
    pub display_on_website: Option<String>,
    #[serde(rename = "Start_Date__c", default)]
    pub start_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    records: Option<Vec<SalesforceEventRecord>>,
}

/// SOQL for upcoming open sessions: future start date, open capacity,
/// ordered by start date. The server-side filter keeps the batch small.
pub const UPCOMING_SESSIONS_QUERY: &str = "SELECT Id, Name, Available_Slots__c, \
    Filled_Volunteer_Jobs__c, Date_and_Time_for_Cal__c, Session_Type__c, \
    Registration_Link__c, Display_on_Website__c, Start_Date__c \
    FROM Session__c \
    WHERE Start_Date__c > TODAY AND Available_Slots__c > 0 \
    ORDER BY Start_Date__c ASC";

#[derive(Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    security_token: String,
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl SalesforceClient {
    pub fn from_config(config: &SalesforceConfig, breaker: &CircuitBreakerConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: config.login_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            security_token: config.security_token.clone(),
            breaker: std::sync::Arc::new(CircuitBreaker::new(
                breaker.failure_threshold,
                breaker.timeout_seconds,
            )),
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    async fn execute<T, F>(&self, operation: F) -> Result<T, SalesforceError>
    where
        F: std::future::Future<Output = Result<T, SalesforceError>>,
    {
        if !self.breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking Salesforce request");
            return Err(SalesforceError::Unavailable);
        }

        match operation.await {
            Ok(result) => {
                self.breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                error!("Salesforce request failed: {}", e);
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    /// Log in and return the session token. The security token is appended
    /// to the password, which is how the upstream login expects it.
    async fn login(&self) -> Result<String, SalesforceError> {
        let request = LoginRequest {
            username: self.username.clone(),
            password: format!("{}{}", self.password, self.security_token),
        };

        let response: LoginResponse = self
            .http
            .post(format!("{}/services/auth/login", self.base_url))
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        response.token.ok_or_else(|| {
            SalesforceError::Auth(
                response
                    .message
                    .unwrap_or_else(|| "no token in login response".to_string()),
            )
        })
    }

    /// Fetch the current batch of upcoming open sessions.
    pub async fn query_upcoming_sessions(
        &self,
    ) -> Result<Vec<SalesforceEventRecord>, SalesforceError> {
        let operation = async {
            info!("Connecting to Salesforce...");
            let token = self.login().await?;

            info!("Executing Salesforce query...");
            let response: QueryResponse = self
                .http
                .get(format!("{}/services/data/query", self.base_url))
                .bearer_auth(&token)
                .query(&[("q", UPCOMING_SESSIONS_QUERY)])
                .send()
                .await?
                .json()
                .await?;

            response
                .records
                .ok_or_else(|| SalesforceError::Malformed("missing records field".to_string()))
        };

        let records = self.execute(operation).await?;
        info!("Retrieved {} events from Salesforce", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> SalesforceClient {
        SalesforceClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: "sync@example.org".to_string(),
            password: "hunter2".to_string(),
            security_token: "SECTOK".to_string(),
            breaker: std::sync::Arc::new(CircuitBreaker::new(5, 60)),
        }
    }

    #[test]
    fn breaker_opens_after_threshold_and_recovers_via_half_open() {
        let breaker = CircuitBreaker::new(2, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // zero timeout: the next check moves Open -> HalfOpen
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn breaker_blocks_while_open() {
        let breaker = CircuitBreaker::new(1, 3600);
        breaker.record_failure();
        assert!(!breaker.can_execute());
    }

    #[tokio::test]
    async fn query_logs_in_then_fetches_records() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "session-token-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/services/data/query"))
            .and(bearer_token("session-token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "totalSize": 1,
                "records": [{
                    "Id": "a015f000003XyZAAA0",
                    "Name": "Career Day",
                    "Available_Slots__c": "5",
                    "Filled_Volunteer_Jobs__c": 2,
                    "Date_and_Time_for_Cal__c": "01/01/2099 9:00 AM to 11:00 AM",
                    "Session_Type__c": "Career Fair",
                    "Registration_Link__c": "https://example.org/signup/1",
                    "Display_on_Website__c": "Yes",
                    "Start_Date__c": "2099-01-01"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let records = client.query_upcoming_sessions().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a015f000003XyZAAA0");
        assert_eq!(records[0].display_on_website.as_deref(), Some("Yes"));
    }

    #[tokio::test]
    async fn login_failure_surfaces_as_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/services/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "INVALID_LOGIN: authentication failure"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.query_upcoming_sessions().await.unwrap_err();
        assert!(matches!(err, SalesforceError::Auth(_)));
    }
}
