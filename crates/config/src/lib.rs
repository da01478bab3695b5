//! Configuration module for the video converter daemon
//!
//! Handles loading configuration from TOML files, environment variable
//! overrides, and startup validation.

pub mod config;

pub use config::*;
