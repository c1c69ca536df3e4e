pub mod reservations;
pub mod units;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(units::routes())
        .merge(reservations::routes())
}
