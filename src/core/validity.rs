//! Validity tracking - stale flags stored next to layer data

use super::graph::Workflow;
use crate::collection::Collection;
use std::collections::HashSet;

/// Reads and writes the per-layer validity flag.
///
/// The flag lives in the hosting collection, not in the graph. A layer
/// without the flag is valid.
pub struct ValidityTracker<'a> {
    collection: &'a dyn Collection,
}

impl<'a> ValidityTracker<'a> {
    pub fn new(collection: &'a dyn Collection) -> Self {
        Self { collection }
    }

    /// Flag `name` as fresh; no-op when the layer does not exist
    pub fn mark_valid(&self, name: &str) {
        if self.collection.has(name) {
            self.collection.set_validity(name, true);
        }
    }

    /// Flag `name` as stale; no-op when the layer does not exist
    pub fn mark_invalid(&self, name: &str) {
        if self.collection.has(name) {
            self.collection.set_validity(name, false);
        }
    }

    /// True only when the flag is present and false
    pub fn is_invalid(&self, name: &str) -> bool {
        self.collection.validity(name) == Some(false)
    }

    /// Mark `name` and everything downstream of it invalid.
    ///
    /// Returns the visited names in depth-first order. Each name is visited
    /// once, so cycles terminate.
    pub fn invalidate_cascade(&self, workflow: &Workflow, name: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        self.cascade(workflow, vec![name.to_string()], &mut visited)
    }

    /// Invalidate everything downstream of `name`, leaving `name` itself alone
    pub fn invalidate_followers(&self, workflow: &Workflow, name: &str) -> Vec<String> {
        let mut visited = HashSet::from([name.to_string()]);
        let mut start = workflow.followers_of(name);
        start.reverse();
        self.cascade(workflow, start, &mut visited)
    }

    fn cascade(
        &self,
        workflow: &Workflow,
        mut stack: Vec<String>,
        visited: &mut HashSet<String>,
    ) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            self.mark_invalid(&current);
            stack.extend(workflow.followers_of(&current).into_iter().rev());
            order.push(current);
        }
        order
    }
}
