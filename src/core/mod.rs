//! Core engine - task graph, validity tracking, recompute scheduling

mod function;
mod graph;
mod scheduler;
mod validity;
mod value;

pub use function::{Function, Param, Signature, StepFn};
pub use graph::{Definition, Task, Workflow};
pub use scheduler::Scheduler;
pub use validity::ValidityTracker;
pub use value::{Arg, Array, ArrayData, Value};

pub(crate) use scheduler::resolve;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
