//! Push Relay HTTP Layer
//!
//! Axum handlers for the registration protocol, the host event feed and
//! connection termination queries.

mod api;

pub use api::*;

use axum::Router;
use push_storage::RegistrationStore;

/// Create the API router.
pub fn api_router<S>(state: AppState<S>) -> Router
where
    S: RegistrationStore + 'static,
{
    use axum::routing::{get, post};

    Router::new()
        .route("/v1/registrations/enable", post(api::enable_handler::<S>))
        .route("/v1/registrations/disable", post(api::disable_handler::<S>))
        .route("/v1/registrations/{owner}", get(api::registrations_handler::<S>))
        .route("/v1/events", post(api::event_handler::<S>))
        .route(
            "/v1/connections/{id}/termination",
            get(api::termination_handler::<S>),
        )
        .with_state(state)
}
