//! KRX Common - Shared types, utilities, and configuration for the KRX screener.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup with noise filtering
//! - The JSON-safety value tree used before serializing computed numbers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{
    Config, NetworkConfig, ObservabilityConfig, ScreenerConfig, SnapshotConfig, SourceConfig,
};
pub use error::{Error, Result};
pub use util::{clean_for_json, DataValue};
