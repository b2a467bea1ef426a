//! Built-in plugins.
//!
//! - [`FootprintPlugin`]: derives a 2-D footprint and position for shapeless
//!   entities from their latest segmented points
//! - [`ReaperPlugin`]: removes shapeless percepts that have not been measured
//!   for a configured age
//!
//! # Registration
//!
//! Both are available by kind name through
//! [`PluginRegistry::with_builtins()`](crate::plugin::PluginRegistry::with_builtins).

mod footprint;
mod reaper;

pub use self::footprint::{FootprintPlugin, FOOTPRINT_AREA};
pub use self::reaper::{ReaperPlugin, DEFAULT_MAX_AGE};

fn float_parameter(parameters: &toml::Table, key: &str) -> Option<std::result::Result<f64, String>> {
    parameters.get(key).map(|value| match value {
        toml::Value::Float(f) => Ok(*f),
        #[allow(clippy::cast_precision_loss)]
        toml::Value::Integer(i) => Ok(*i as f64),
        other => Err(format!("parameter '{key}' must be a number, got {}", other.type_str())),
    })
}
