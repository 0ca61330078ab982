//! Service Handler
//!
//! The capability set the core (through the registration client or the
//! management API) uses to command a running service.

use async_trait::async_trait;
use serde::Serialize;

use super::{ServiceResult, ServiceState};
use crate::ingest::IngestStatsSnapshot;

/// Point-in-time status reported to the core
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub plugin: String,
    pub state: ServiceState,
    pub uptime_secs: u64,
    pub config_version: u64,
    pub ingest: IngestStatsSnapshot,
}

/// Inbound control surface of a service
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Name the service registered under
    fn service_name(&self) -> &str;

    /// Current status, answered without waiting on control operations
    fn status(&self) -> ServiceStatus;

    /// Terminate the service
    async fn shutdown(&self) -> ServiceResult<()>;

    /// A configuration category changed; `config` is the JSON document of items
    async fn config_change(&self, category: &str, config: &str) -> ServiceResult<()>;
}
