//! layerflow - incremental workflow engine for viewer layers
//!
//! Records which layers are computed from which, flags outputs stale when
//! an upstream layer changes, and recomputes them in the background one at
//! a time, roots first.

pub mod collection;
pub mod config;
pub mod core;
pub mod error;
pub mod introspect;
pub mod session;

// Re-exports
pub use collection::{Collection, Layer, LayerEvent, LayerList, Origin};
pub use config::EngineConfig;
pub use core::{
    Arg, Array, Definition, Function, Param, Scheduler, Signature, Task, ValidityTracker, Value,
    Workflow,
};
pub use error::WorkflowError;
pub use session::{Input, SchedulerHandle, Session, SessionId, SessionRegistry};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
