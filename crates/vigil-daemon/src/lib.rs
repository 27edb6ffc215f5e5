//! Vigil daemon library
//!
//! Wires the watcher, analyzer, and storage crates into a single
//! supervised process: config loading and hot-reload, the control
//! API facade, and the supervisor that owns the pipeline's task
//! lifecycle and its `MetricsCollector` (`vigil_core::metrics`).

pub mod api;
pub mod config;
pub mod supervisor;

pub use config::ConfigManager;
pub use supervisor::{Supervisor, SupervisorStats};
