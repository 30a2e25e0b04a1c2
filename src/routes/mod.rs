use axum::{routing::get, Router};

use crate::state::AppState;

pub mod bookings;
pub mod due_dates;
pub mod health;
pub mod payments;
pub mod properties;
pub mod reports;
pub mod tenants;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(properties::router())
        .merge(tenants::router())
        .merge(due_dates::router())
        .merge(payments::router())
        .merge(bookings::router())
        .merge(reports::router())
}
