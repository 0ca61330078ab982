//! Core Registration
//!
//! Everything the service exchanges with the management core:
//!
//! - outbound: `register`, `deregister` and interest in the service's
//!   configuration category, through a [`CoreClient`];
//! - inbound: configuration changes and shutdown requests, delivered as
//!   [`CoreNotification`]s and dispatched in arrival order to a
//!   [`ServiceHandler`](crate::service::ServiceHandler).
//!
//! The `south` binary receives inbound calls over HTTP through the
//! management router, which invokes the handler directly. Embedders that
//! carry core notifications over another transport (a message bus, a
//! socket) decode them into `CoreNotification`s and feed them to
//! [`dispatch_notifications`].

mod client;
mod http;
mod memory;
mod retry;

pub use client::*;
pub use http::*;
pub use memory::*;
pub use retry::*;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::service::ServiceHandler;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Address of the management core, fixed for one run of the service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreEndpoint {
    pub address: String,
    pub port: u16,
}

impl CoreEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Base URL of the core's management API
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl std::fmt::Display for CoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identity a service registers under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub protocol: String,
    pub address: String,
    #[serde(rename = "service_port", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub management_port: u16,
}

impl ServiceRecord {
    /// Record for a south service answering management calls on `management_port`
    pub fn southbound(name: impl Into<String>, address: impl Into<String>, management_port: u16) -> Self {
        Self {
            name: name.into(),
            service_type: "Southbound".to_string(),
            protocol: "http".to_string(),
            address: address.into(),
            port: None,
            management_port,
        }
    }
}

/// Token the core hands out on successful registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceToken(pub String);

impl ServiceToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServiceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Core Client
// ─────────────────────────────────────────────────────────────────────────────

/// Errors talking to the core
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("Core unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Core rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from core: {0}")]
    InvalidResponse(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Transport to the management core
#[async_trait]
pub trait CoreClient: Send + Sync + 'static {
    /// Register a service, returning the token identifying it
    async fn register(&self, endpoint: &CoreEndpoint, record: &ServiceRecord) -> CoreResult<ServiceToken>;

    /// Remove a previously registered service
    async fn deregister(&self, endpoint: &CoreEndpoint, token: &ServiceToken) -> CoreResult<()>;

    /// Ask to be notified when `category` changes
    async fn register_interest(
        &self,
        _endpoint: &CoreEndpoint,
        _token: &ServiceToken,
        _category: &str,
    ) -> CoreResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Notifications
// ─────────────────────────────────────────────────────────────────────────────

/// Request delivered by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreNotification {
    /// A configuration category changed; `config` is a JSON document of items
    ConfigChange { category: String, config: String },
    /// The service should terminate
    Shutdown,
}

/// Dispatch notifications to `handler` strictly in arrival order.
///
/// Each notification is fully handled before the next is taken. Dispatch ends
/// after a shutdown notification or when the sender side closes.
pub async fn dispatch_notifications(
    mut rx: mpsc::Receiver<CoreNotification>,
    handler: Arc<dyn ServiceHandler>,
) {
    while let Some(notification) = rx.recv().await {
        match notification {
            CoreNotification::ConfigChange { category, config } => {
                if let Err(e) = handler.config_change(&category, &config).await {
                    tracing::warn!(
                        service = %handler.service_name(),
                        category = %category,
                        error = %e,
                        "Configuration change not applied"
                    );
                }
            }
            CoreNotification::Shutdown => {
                if let Err(e) = handler.shutdown().await {
                    tracing::error!(service = %handler.service_name(), error = %e, "Shutdown failed");
                }
                break;
            }
        }
    }
    tracing::debug!(service = %handler.service_name(), "Notification dispatch finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestStatsSnapshot;
    use crate::service::{ServiceResult, ServiceState, ServiceStatus};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ServiceHandler for RecordingHandler {
        fn service_name(&self) -> &str {
            "recorder"
        }

        fn status(&self) -> ServiceStatus {
            ServiceStatus {
                name: "recorder".into(),
                plugin: "none".into(),
                state: ServiceState::Running,
                uptime_secs: 0,
                config_version: 0,
                ingest: IngestStatsSnapshot::default(),
            }
        }

        async fn shutdown(&self) -> ServiceResult<()> {
            self.calls.lock().push("shutdown".into());
            Ok(())
        }

        async fn config_change(&self, category: &str, config: &str) -> ServiceResult<()> {
            tokio::task::yield_now().await;
            self.calls.lock().push(format!("{}={}", category, config));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_in_order_and_stop_after_shutdown() {
        let (tx, rx) = mpsc::channel(8);
        let handler = Arc::new(RecordingHandler::default());

        for i in 0..3 {
            tx.send(CoreNotification::ConfigChange {
                category: "cat".into(),
                config: format!("{{\"v\":{}}}", i),
            })
            .await
            .unwrap();
        }
        tx.send(CoreNotification::Shutdown).await.unwrap();
        tx.send(CoreNotification::ConfigChange {
            category: "cat".into(),
            config: "{\"v\":99}".into(),
        })
        .await
        .unwrap();

        dispatch_notifications(rx, handler.clone()).await;

        assert_eq!(
            *handler.calls.lock(),
            vec![
                "cat={\"v\":0}".to_string(),
                "cat={\"v\":1}".to_string(),
                "cat={\"v\":2}".to_string(),
                "shutdown".to_string(),
            ]
        );
    }

    #[test]
    fn test_service_record_wire_format() {
        let record = ServiceRecord::southbound("temp-sensor-1", "localhost", 9000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "Southbound");
        assert_eq!(json["management_port"], 9000);
        assert!(json.get("service_port").is_none());
    }

    #[test]
    fn test_notification_wire_format() {
        let n: CoreNotification =
            serde_json::from_str(r#"{"type":"config_change","category":"c","config":"{}"}"#).unwrap();
        assert_eq!(
            n,
            CoreNotification::ConfigChange {
                category: "c".into(),
                config: "{}".into()
            }
        );
    }
}
