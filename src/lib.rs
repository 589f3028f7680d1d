pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;

use services::salesforce::SalesforceClient;
use services::sheets::SheetsClient;

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub config: config::Config,
    pub salesforce: SalesforceClient,
    pub sheets: SheetsClient,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<std::sync::Arc<Self>, sqlx::Error> {
        let db = database::Database::connect(&config.database).await?;

        let salesforce = SalesforceClient::from_config(&config.salesforce, &config.circuit_breaker);
        let sheets = SheetsClient::from_config(&config.sheets);

        Ok(std::sync::Arc::new(Self {
            db,
            config,
            salesforce,
            sheets,
        }))
    }
}
