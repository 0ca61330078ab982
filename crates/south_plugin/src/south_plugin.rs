//! South Plugin - Capability contract for device plugins
//!
//! This crate defines everything a south service needs to host a device plugin
//! without knowing how the device is read:
//! - `Reading`: a timestamped set of datapoints for one asset
//! - `ConfigCategory`: the versioned key/value configuration a plugin runs with
//! - `SouthPlugin`: the lifecycle and ingestion hooks a plugin implements
//! - `PluginRegistry`: named factories resolved when the service starts

pub mod builtin;
mod category;
mod error;
mod plugin;
mod reading;
mod registry;

pub use category::*;
pub use error::*;
pub use plugin::*;
pub use reading::*;
pub use registry::*;
