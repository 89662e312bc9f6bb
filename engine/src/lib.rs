//! Quire Engine Library
//!
//! This library provides the host side of the Quire plugin system:
//! discovery, trust validation and lifecycle management. It is used by both
//! the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Engine error types
pub mod errors;

/// Trust validation pipeline and risk scoring
pub mod trust;

/// Plugin bundle discovery
pub mod discovery;

/// Catalog, state and instance bookkeeping
pub mod registry;

/// Per-plugin lifecycle state machine
pub mod lifecycle;

/// Lifecycle notifications
pub mod events;

/// Runtime module for instantiating plugins
pub mod runtime;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use errors::{LifecycleError, ScanError};
pub use lifecycle::{LifecycleManager, PluginState};
pub use registry::Registry;
