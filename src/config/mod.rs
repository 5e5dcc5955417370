//! Configuration Module
//!
//! Provides the updater configuration with:
//! - Serde defaults for every optional field
//! - File + environment layering via the `config` crate
//! - Validation into a trusted verification key

mod settings;
#[cfg(test)]
mod tests;

pub use settings::{load_config, ConfigError, ConfigResult, UpdaterConfig, MAX_CHECK_INTERVAL};
