//! Task graph - named steps and the structural queries over them

use super::function::Function;
use super::value::{Arg, Value};
use crate::error::WorkflowError;
use std::collections::HashMap;
use std::fmt;

/// What a name is defined as when it is set
#[derive(Debug, Clone)]
pub enum Definition {
    /// Literal source data, no dependencies
    Data(Value),
    /// A function applied to arguments
    Function(Function),
}

impl From<Value> for Definition {
    fn from(v: Value) -> Self {
        Definition::Data(v)
    }
}

impl From<Function> for Definition {
    fn from(f: Function) -> Self {
        Definition::Function(f)
    }
}

/// A stored step
#[derive(Debug, Clone)]
pub enum Task {
    Data(Value),
    Call { function: Function, args: Vec<Arg> },
}

impl Task {
    /// Bound arguments (empty for data)
    pub fn args(&self) -> &[Arg] {
        match self {
            Task::Data(_) => &[],
            Task::Call { args, .. } => args,
        }
    }

    /// Name arguments in argument order, repeats included
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args().iter().filter_map(Arg::as_name)
    }

    pub fn function(&self) -> Option<&Function> {
        match self {
            Task::Data(_) => None,
            Task::Call { function, .. } => Some(function),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Data(value) => write!(f, "{}", value),
            Task::Call { function, args } => {
                write!(f, "({}", function)?;
                for arg in args {
                    write!(f, ", {}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Workflow graph: tasks keyed by output name, in definition order.
///
/// Edges are implicit: a task depends on every name among its arguments.
/// Nothing here forbids cycles or self references.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    order: Vec<String>,
    tasks: HashMap<String, Task>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name`, returning the task it replaced.
    ///
    /// Redefining a name is not an error: it logs a warning and hands the
    /// old task back, which is how callers notice the overwrite.
    ///
    /// Data definitions ignore `args`. Function arguments are bound against
    /// the function's signature; a binding error leaves the graph untouched.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        definition: impl Into<Definition>,
        args: Vec<Arg>,
    ) -> Result<Option<Task>, WorkflowError> {
        match definition.into() {
            Definition::Data(value) => Ok(self.insert(name.into(), Task::Data(value))),
            Definition::Function(function) => {
                self.set_with_keywords(name, function, args, Vec::new())
            }
        }
    }

    /// Define `name` as `function` applied to positional and keyword arguments
    pub fn set_with_keywords(
        &mut self,
        name: impl Into<String>,
        function: Function,
        args: Vec<Arg>,
        keywords: Vec<(String, Arg)>,
    ) -> Result<Option<Task>, WorkflowError> {
        let args = function.bind(args, keywords)?;
        Ok(self.insert(name.into(), Task::Call { function, args }))
    }

    fn insert(&mut self, name: String, task: Task) -> Option<Task> {
        if self.tasks.contains_key(&name) {
            log::warn!("Overwriting {}", name);
        } else {
            self.order.push(name.clone());
        }
        self.tasks.insert(name, task)
    }

    /// Remove a task; unknown names are ignored
    pub fn remove(&mut self, name: &str) -> Option<Task> {
        let task = self.tasks.remove(name)?;
        self.order.retain(|n| n != name);
        Some(task)
    }

    pub fn get_task(&self, name: &str) -> Result<&Task, WorkflowError> {
        self.tasks
            .get(name)
            .ok_or_else(|| WorkflowError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Task names in definition order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Tasks in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Task)> {
        self.order
            .iter()
            .filter_map(|name| self.tasks.get(name).map(|task| (name.as_str(), task)))
    }

    /// Entry points of the graph, in first-discovered order.
    ///
    /// A root is a name referenced as an argument but not produced by any
    /// task, or a task that references no other name.
    pub fn roots(&self) -> Vec<String> {
        let mut origins: Vec<String> = Vec::new();
        for (name, task) in self.iter() {
            let mut sources = task.names().peekable();
            if sources.peek().is_none() {
                if !origins.iter().any(|o| o == name) {
                    origins.push(name.to_string());
                }
                continue;
            }
            for source in sources {
                if !self.contains(source) && !origins.iter().any(|o| o == source) {
                    origins.push(source.to_string());
                }
            }
        }
        origins
    }

    /// Tasks that take `item` as an argument
    pub fn followers_of(&self, item: &str) -> Vec<String> {
        self.iter()
            .filter(|(_, task)| task.names().any(|source| source == item))
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Name arguments of `item`; empty if `item` is unknown
    pub fn sources_of(&self, item: &str) -> Vec<String> {
        self.tasks
            .get(item)
            .map(|task| task.names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Tasks nothing depends on
    pub fn leaves(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.followers_of(name).is_empty())
            .cloned()
            .collect()
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, task) in self.iter() {
            writeln!(f, "{} <- {}", name, task)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::function::Signature;

    fn unary(name: &str) -> Function {
        Function::new(name, Signature::new().param("x"), |args| Ok(args[0].clone()))
    }

    fn threshold() -> Function {
        Function::new(
            "threshold",
            Signature::new().param("image").param_with_default("level", 128),
            |args| Ok(args[0].clone()),
        )
    }

    fn chain() -> Workflow {
        let mut workflow = Workflow::new();
        workflow.set("B", unary("f"), vec!["A".into()]).unwrap();
        workflow.set("C", unary("g"), vec!["B".into()]).unwrap();
        workflow
    }

    #[test]
    fn test_roots_and_leaves() {
        let workflow = chain();
        assert_eq!(workflow.roots(), vec!["A"]);
        assert_eq!(workflow.leaves(), vec!["C"]);
        assert_eq!(workflow.followers_of("A"), vec!["B"]);
        assert_eq!(workflow.sources_of("C"), vec!["B"]);
    }

    #[test]
    fn test_source_task_is_root() {
        let mut workflow = Workflow::new();
        let load = Function::new("load", Signature::new(), |_| Ok(Value::Int(1)));
        workflow.set("img", load, vec![]).unwrap();
        workflow.set("thresh", threshold(), vec!["img".into(), 128.into()]).unwrap();

        assert_eq!(workflow.roots(), vec!["img"]);
        assert_eq!(workflow.followers_of("img"), vec!["thresh"]);
        assert_eq!(workflow.leaves(), vec!["thresh"]);
    }

    #[test]
    fn test_data_task() {
        let mut workflow = Workflow::new();
        let replaced = workflow.set("A", Value::Int(3), vec!["ignored".into()]).unwrap();
        assert!(replaced.is_none());
        assert!(matches!(workflow.get_task("A").unwrap(), Task::Data(Value::Int(3))));
        assert!(workflow.sources_of("A").is_empty());
    }

    #[test]
    fn test_overwrite_returns_replaced_task_in_place() {
        let mut workflow = Workflow::new();
        workflow.set("X", unary("f"), vec![1.into()]).unwrap();
        workflow.set("Y", unary("f"), vec!["X".into()]).unwrap();
        let replaced = workflow.set("X", unary("g"), vec![2.into()]).unwrap();

        let replaced = replaced.expect("overwrite returns the old task");
        assert_eq!(replaced.function().unwrap().name(), "f");
        assert_eq!(workflow.names(), ["X", "Y"]);
        let task = workflow.get_task("X").unwrap();
        assert_eq!(task.function().unwrap().name(), "g");
        assert_eq!(task.args(), [Arg::from(2)]);
    }

    #[test]
    fn test_binding_error_leaves_graph_untouched() {
        let mut workflow = Workflow::new();
        let result = workflow.set("X", unary("f"), vec![1.into(), 2.into()]);
        assert!(matches!(result, Err(WorkflowError::Binding { .. })));
        assert!(!workflow.contains("X"));
    }

    #[test]
    fn test_unknown_names() {
        let mut workflow = chain();
        assert!(workflow.sources_of("nonexistent").is_empty());
        assert!(matches!(
            workflow.get_task("nonexistent"),
            Err(WorkflowError::NotFound(_))
        ));
        assert!(workflow.remove("nonexistent").is_none());
        assert!(workflow.remove("C").is_some());
        assert_eq!(workflow.leaves(), vec!["B"]);
    }

    #[test]
    fn test_followers_deduplicated() {
        let mut workflow = Workflow::new();
        let add = Function::new(
            "add",
            Signature::new().param("a").param("b"),
            |args| Ok(args[0].clone()),
        );
        workflow.set("double", add.clone(), vec!["A".into(), "A".into()]).unwrap();
        workflow.set("sum", add, vec!["A".into(), "double".into()]).unwrap();

        assert_eq!(workflow.followers_of("A"), vec!["double", "sum"]);
        assert_eq!(workflow.sources_of("double"), vec!["A", "A"]);
        assert_eq!(workflow.roots(), vec!["A"]);
    }

    #[test]
    fn test_cycle_is_allowed() {
        let mut workflow = Workflow::new();
        workflow.set("P", unary("f"), vec!["Q".into()]).unwrap();
        workflow.set("Q", unary("g"), vec!["P".into()]).unwrap();
        assert!(workflow.roots().is_empty());
        assert!(workflow.leaves().is_empty());
        assert_eq!(workflow.followers_of("P"), vec!["Q"]);
    }

    #[test]
    fn test_display() {
        let mut workflow = Workflow::new();
        workflow.set("thresh", threshold(), vec!["img".into()]).unwrap();
        assert_eq!(workflow.to_string(), "thresh <- (threshold, \"img\", 128)\n");
    }
}
