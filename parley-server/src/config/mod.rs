//! Configuration management for the relay server
//!
//! Settings come from a TOML file (optional) and are then overridden by
//! command-line flags.

mod defaults;
mod loader;
mod schema;

pub use defaults::DEFAULT_CONFIG_TOML;
pub use loader::ConfigLoader;
pub use schema::*;
