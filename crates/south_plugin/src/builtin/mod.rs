//! Built-in Plugins
//!
//! Simulated devices shipped with the service, useful for commissioning and
//! tests when no hardware is attached.

mod sim_counter;
mod sim_thermo;

pub use sim_counter::SimCounter;
pub use sim_thermo::SimThermo;

use crate::PluginRegistry;

/// Register every built-in plugin
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register(sim_thermo::NAME, || Box::new(SimThermo::new()));
    registry.register(sim_counter::NAME, || Box::new(SimCounter::new()));
}
