//! Plugin lifecycle management
//!
//! Every catalog id has exactly one [`PluginState`]:
//!
//! ```text
//! Discovered ──load──▶ Validating ──accepted──▶ Loaded ──unload──▶ Unloaded
//!                       ▲    │                                        │
//!                       │    └──rejected──▶ Rejected                  │
//!                       │                      │                      │
//!                       └───────load───────────┴──────────load────────┘
//! ```
//!
//! The [`LifecycleManager`] runs each load and unload in its own task. At
//! most one operation per id is in flight: a second load joins the running
//! one, and an operation of the other kind waits for it. Different ids
//! proceed in parallel and fail independently.

mod manager;
mod scan;
pub mod state;

pub use manager::{LifecycleBuilder, LifecycleManager};
pub use scan::ScanReport;
pub use state::{InstanceId, PluginState, RejectionReason};
