use serde::Deserialize;
use std::env;

// Top-level configuration container for all settings
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub salesforce: SalesforceConfig,
    pub sheets: SheetsConfig,
    pub sync: SyncConfig,
    pub auth: AuthConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Salesforce credentials: username + password + security token, the same
// triple the login flow expects
#[derive(Debug, Clone, Deserialize)]
pub struct SalesforceConfig {
    pub username: String,
    pub password: String,
    pub security_token: String,
    pub login_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    pub sheet_id: Option<String>,
    pub base_url: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub scheduler_enabled: bool,
    pub school_mappings_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub token_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "volunteer_system=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            salesforce: SalesforceConfig {
                username: env::var("SF_USERNAME").expect("SF_USERNAME must be set"),
                password: env::var("SF_PASSWORD").expect("SF_PASSWORD must be set"),
                security_token: env::var("SF_SECURITY_TOKEN").expect("SF_SECURITY_TOKEN must be set"),
                login_url: env::var("SF_LOGIN_URL")
                    .unwrap_or_else(|_| "https://login.salesforce.com".to_string()),
            },
            sheets: SheetsConfig {
                sheet_id: env::var("VIRTUAL_EVENTS_SHEET_ID").ok(),
                base_url: env::var("SHEETS_BASE_URL")
                    .unwrap_or_else(|_| "https://docs.google.com".to_string()),
                user_agent: env::var("SHEETS_USER_AGENT")
                    .unwrap_or_else(|_| "VolunteerSystem-Sync/1.0".to_string()),
            },
            sync: SyncConfig {
                interval_secs: env::var("SYNC_INTERVAL_SECS")
                    .unwrap_or_else(|_| "21600".to_string())
                    .parse()
                    .expect("SYNC_INTERVAL_SECS must be a valid number"),
                scheduler_enabled: env::var("SYNC_SCHEDULER_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("SYNC_SCHEDULER_ENABLED must be true or false"),
                school_mappings_file: env::var("SCHOOL_MAPPINGS_FILE")
                    .unwrap_or_else(|_| "data/school-mappings.csv".to_string()),
            },
            auth: AuthConfig {
                token_expiry_days: env::var("API_TOKEN_EXPIRY_DAYS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("API_TOKEN_EXPIRY_DAYS must be a valid number"),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be a valid number"),
                timeout_seconds: env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("CIRCUIT_BREAKER_TIMEOUT_SECONDS must be a valid number"),
            },
        }
    }
}
