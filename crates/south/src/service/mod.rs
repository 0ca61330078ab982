//! South Service Lifecycle
//!
//! The lifecycle controller hosting exactly one device plugin. It loads the
//! plugin, registers with core, drives ingestion and applies configuration
//! changes without a process restart.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running ⇄ Stopping → Paused
//!              │          │                    │
//!              └──────────┴──── Shutdown ──────┘
//! ```
//!
//! All control operations (`start`, `stop`, `resume`, `shutdown`,
//! `config_change`) are serialized; concurrent calls queue in arrival order.

mod controller;
mod handler;
mod plugin_handle;
mod state;

pub use controller::*;
pub use handler::*;
pub use plugin_handle::*;
pub use state::ServiceState;

pub(crate) use state::StateCell;

// ─────────────────────────────────────────────────────────────────────────────
// Service Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the south service
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Plugin '{plugin}' could not be loaded: {reason}")]
    PluginResolution { plugin: String, reason: String },

    #[error("Plugin '{plugin}' failed to initialize: {reason}")]
    PluginInitialization { plugin: String, reason: String },

    #[error("Plugin '{plugin}' rejected the configuration change: {reason}")]
    ReconfigurationRejected { plugin: String, reason: String },

    #[error("Registration with core failed after {attempts} attempt(s): {reason}")]
    Registration { attempts: u32, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ServiceState,
    },

    #[error("Service is busy: {0}")]
    Busy(String),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
