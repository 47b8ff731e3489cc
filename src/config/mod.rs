//! Configuration module: CLI argument parsing and environment-sourced
//! demo-binary settings.

#[allow(clippy::module_inception)]
mod config;

pub use config::AppConfig;
