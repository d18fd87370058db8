//! Library crate for portprobe: concurrent TCP connect scanning, host discovery and pacing.
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pacing;
pub mod ports;
pub mod progress;
pub mod server;
pub mod services;
pub mod targets;
pub mod tls;
pub mod types;

pub use error::{ScanError, ScanResult};
