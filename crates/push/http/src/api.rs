//! REST API handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use push_core::{ConnectionId, Owner, PublishOptions, ServiceAddress};
use push_service::{
    ConnectionRegistry, HostEvent, RegistrationError, RegistrationService, deregistration_scope,
};
use push_storage::RegistrationStore;

/// Shared handler state.
pub struct AppState<S> {
    pub registrations: Arc<RegistrationService<S>>,
    pub events: mpsc::Sender<HostEvent>,
    pub connections: Arc<ConnectionRegistry>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            registrations: Arc::clone(&self.registrations),
            events: self.events.clone(),
            connections: Arc::clone(&self.connections),
        }
    }
}

/// Error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: RegistrationError) -> Response {
    let status = match &e {
        RegistrationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RegistrationError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %e, "registration request failed");
    } else {
        tracing::debug!(error = %e, "rejected registration request");
    }

    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

/// Enable request.
#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    pub owner: Owner,
    pub service: ServiceAddress,
    pub node: String,
    #[serde(default)]
    pub publish_options: Option<PublishOptions>,
}

/// Enable push notifications for one `(service, node)`.
pub async fn enable_handler<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<EnableRequest>,
) -> Response
where
    S: RegistrationStore,
{
    match state.registrations.enable(
        &request.owner,
        &request.service,
        &request.node,
        request.publish_options.as_ref(),
    ) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// Disable request. Omitting `node` disables the whole service; omitting
/// both disables everything.
#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub owner: Owner,
    #[serde(default)]
    pub service: Option<ServiceAddress>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Disable push notifications.
pub async fn disable_handler<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<DisableRequest>,
) -> Response
where
    S: RegistrationStore,
{
    let result = deregistration_scope(request.service, request.node)
        .and_then(|scope| state.registrations.disable(&request.owner, &scope));

    match result {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// List the registrations of an owner.
pub async fn registrations_handler<S>(
    State(state): State<AppState<S>>,
    Path(owner): Path<Owner>,
) -> Response
where
    S: RegistrationStore,
{
    match state.registrations.registrations(&owner) {
        Ok(nodes) => Json(nodes).into_response(),
        Err(e) => error_response(e),
    }
}

/// Accept a host event for asynchronous processing.
pub async fn event_handler<S>(
    State(state): State<AppState<S>>,
    Json(event): Json<HostEvent>,
) -> impl IntoResponse
where
    S: RegistrationStore,
{
    tracing::trace!(?event, "received host event");

    match state.events.send(event).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            tracing::error!("event feed closed, dropping host event");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Termination query parameters.
#[derive(Debug, Deserialize)]
pub struct TerminationQuery {
    pub allowable_inactivity_secs: u64,
}

/// Termination query response.
#[derive(Debug, Serialize, Deserialize)]
pub struct TerminationResponse {
    pub should_terminate: bool,
}

/// Ask whether a detached connection may be reclaimed.
pub async fn termination_handler<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<ConnectionId>,
    Query(query): Query<TerminationQuery>,
) -> impl IntoResponse
where
    S: RegistrationStore,
{
    let allowable = Duration::from_secs(query.allowable_inactivity_secs);
    let should_terminate = state.connections.should_terminate(id, allowable);

    Json(TerminationResponse { should_terminate })
}
