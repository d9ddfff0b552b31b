//! Recompute Scheduler - background repair of stale layers
//!
//! Each tick walks the graph from its roots, picks the first invalid layer
//! and recomputes it from the current values of its sources. One layer per
//! tick, so a chain of N stale layers settles after N ticks.

use super::graph::{Task, Workflow};
use super::lock;
use super::validity::ValidityTracker;
use super::value::{Arg, Value};
use crate::collection::Collection;
use crate::error::WorkflowError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Periodic recompute loop over a shared workflow and collection
#[derive(Clone)]
pub struct Scheduler {
    workflow: Arc<Mutex<Workflow>>,
    collection: Arc<dyn Collection>,
    writer: Arc<Mutex<()>>,
    interval: Duration,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// `writer` must be the same lock every other writer of validity flags
    /// holds, so a recompute and a user edit never interleave.
    pub fn new(
        workflow: Arc<Mutex<Workflow>>,
        collection: Arc<dyn Collection>,
        writer: Arc<Mutex<()>>,
        interval: Duration,
    ) -> Self {
        Self {
            workflow,
            collection,
            writer,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// First invalid layer reachable from `roots`.
    ///
    /// Every item of a level is checked before descending into the
    /// followers of each item in turn.
    pub fn search_first_invalid(&self, workflow: &Workflow, roots: &[String]) -> Option<String> {
        let mut visited = HashSet::new();
        self.search(workflow, roots, &mut visited)
    }

    fn search(
        &self,
        workflow: &Workflow,
        items: &[String],
        visited: &mut HashSet<String>,
    ) -> Option<String> {
        let tracker = ValidityTracker::new(self.collection.as_ref());
        let fresh: Vec<&String> = items
            .iter()
            .filter(|item| visited.insert((*item).clone()))
            .collect();

        if let Some(found) = fresh
            .iter()
            .find(|item| self.collection.has(item) && tracker.is_invalid(item))
        {
            return Some((*found).clone());
        }

        for item in fresh {
            let followers = workflow.followers_of(item);
            if let Some(found) = self.search(workflow, &followers, visited) {
                return Some(found);
            }
        }
        None
    }

    /// Run one scheduling step.
    ///
    /// Returns the name of the recomputed layer, or `None` if nothing was
    /// stale.
    pub fn tick(&self) -> Result<Option<String>, WorkflowError> {
        let _writer = lock(&self.writer);

        let (name, task) = {
            let workflow = lock(&self.workflow);
            let roots = workflow.roots();
            self.clear_external_inputs(&workflow, &roots);
            let Some(name) = self.search_first_invalid(&workflow, &roots) else {
                return Ok(None);
            };
            let task = workflow.get_task(&name)?.clone();
            (name, task)
        };

        let value = self.recompute(&name, &task)?;
        self.collection.set(&name, value);
        ValidityTracker::new(self.collection.as_ref()).mark_valid(&name);
        Ok(Some(name))
    }

    /// Layers the graph reads but does not produce cannot be recomputed,
    /// so a stale flag on one of them is simply dropped.
    fn clear_external_inputs(&self, workflow: &Workflow, roots: &[String]) {
        let tracker = ValidityTracker::new(self.collection.as_ref());
        for root in roots.iter().filter(|root| !workflow.contains(root)) {
            if tracker.is_invalid(root) {
                log::debug!("Clearing stale flag on input {}", root);
                tracker.mark_valid(root);
            }
        }
    }

    fn recompute(&self, name: &str, task: &Task) -> Result<Value, WorkflowError> {
        match task {
            Task::Data(value) => Ok(value.clone()),
            Task::Call { function, args } => {
                let values = resolve(self.collection.as_ref(), args)?;
                log::debug!("Recomputing {} with {}", name, function);
                function.call(&values).map_err(|source| WorkflowError::Compute {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Tick every `interval` until `cancel` fires.
    ///
    /// Failed ticks are logged and retried on the next interval.
    pub async fn run(self, cancel: CancellationToken) {
        log::info!("Recompute scheduler started (every {:?})", self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.tick() {
                Ok(Some(name)) => log::info!("Recomputed {}", name),
                Ok(None) => {}
                Err(e) => log::warn!("Recompute skipped: {}", e),
            }
        }
        log::info!("Recompute scheduler stopped");
    }
}

/// Substitute every name argument with the collection's current value
pub(crate) fn resolve(collection: &dyn Collection, args: &[Arg]) -> Result<Vec<Value>, WorkflowError> {
    args.iter()
        .map(|arg| match arg {
            Arg::Name(name) => collection
                .get(name)
                .ok_or_else(|| WorkflowError::NotFound(name.clone())),
            Arg::Value(value) => Ok(value.clone()),
        })
        .collect()
}
