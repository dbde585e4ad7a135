//! # Helios - Hourly Electricity Price Scheduler
//!
//! A Rust daemon that periodically retrieves hourly electricity prices from
//! the Pstryk API, merges them with a persisted per-hour operating-mode
//! schedule, and publishes derived metrics (current/next/average/min/max
//! price, active mode) to consumers.
//!
//! ## Features
//!
//! - **Async-first**: Tokio runtime with a single-owner coordinator task
//! - **Atomic snapshots**: readers never observe a half-built refresh result
//! - **Durable schedule**: per-hour mode overrides survive restarts
//! - **Web Interface**: REST API plus an SSE snapshot stream
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `pstryk`: Price feed client and normalization
//! - `schedule`: Operating modes and hour-key handling
//! - `store`: Schedule persistence and recovery
//! - `coordinator`: Refresh orchestration and snapshot publication
//! - `web`: HTTP server and REST API

pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod pstryk;
pub mod schedule;
pub mod store;
#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorHandle, Snapshot};
pub use error::{HeliosError, Result};
pub use schedule::OperatingMode;
