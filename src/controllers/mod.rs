pub mod auth;
pub mod districts;
pub mod events;
pub mod sync;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(events::routes())
        .merge(sync::routes())
        .merge(auth::routes())
        .merge(districts::routes())
}
