//! HTTP Router
//!
//! Management endpoints the core calls on a running service.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::service::{ServiceError, ServiceHandler, ServiceStatus};

type AppState = Arc<dyn ServiceHandler>;

/// Create the management router
pub fn create_router(handler: Arc<dyn ServiceHandler>) -> Router {
    Router::new()
        // Liveness heartbeat polled by the core
        .route("/foglamp/service/ping", get(ping))
        .route("/foglamp/service/shutdown", post(shutdown))
        .route("/foglamp/change", post(config_change))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

async fn ping(State(handler): State<AppState>) -> Json<ServiceStatus> {
    Json(handler.status())
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

/// Shutdown runs in the background so the response reaches the core first
async fn shutdown(State(handler): State<AppState>) -> Json<MessageResponse> {
    let name = handler.service_name().to_string();
    tokio::spawn(async move {
        if let Err(e) = handler.shutdown().await {
            tracing::error!(service = %handler.service_name(), error = %e, "Shutdown failed");
        }
    });
    Json(MessageResponse {
        message: format!("Shutdown of '{}' requested", name),
    })
}

#[derive(Deserialize)]
struct ChangeRequest {
    category: String,
    #[serde(default)]
    items: serde_json::Value,
}

async fn config_change(
    State(handler): State<AppState>,
    Json(request): Json<ChangeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    handler
        .config_change(&request.category, &request.items.to_string())
        .await?;
    Ok(Json(MessageResponse {
        message: format!("Change to '{}' processed", request.category),
    }))
}

/// `ServiceError` rendered as an HTTP response
pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            ServiceError::ReconfigurationRejected { .. }
            | ServiceError::InvalidState { .. }
            | ServiceError::Busy(_)
            | ServiceError::ShuttingDown => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(MessageResponse {
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
