//! Evacflow Data -- data-driven scenario and region configuration.
//!
//! A data directory holds `regions` and `scenarios` definitions, plus an
//! optional `segments` fixture, each in exactly one of RON, TOML or JSON.
//! [`load_config`] validates them and resolves them into the engine's frozen
//! tables.

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, EngineData, load_config};
