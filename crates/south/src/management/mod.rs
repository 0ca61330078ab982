//! Management API
//!
//! The inbound HTTP surface of the service: the core's heartbeat ping,
//! shutdown requests and configuration change notifications.

mod router;

pub use router::{create_router, ApiError};

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::service::ServiceHandler;

/// Serve the management API on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, handler: Arc<dyn ServiceHandler>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(service = %handler.service_name(), %addr, "Management API listening");
    }
    axum::serve(listener, create_router(handler))
        .with_graceful_shutdown(shutdown)
        .await
}
