// src/config/mod.rs

//! Configuration loading and validation for assetdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it and register its tasks (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    BuildSection, ConfigFile, ConfigSection, DefaultSection, RawConfigFile, ServerSection,
    StepConfig, TaskConfig, WatchBindingConfig,
};
pub use validate::validate_config;
