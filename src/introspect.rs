//! Graph introspection - validity trees, generated code and JSON snapshots

use crate::collection::Collection;
use crate::core::{Arg, Task, ValidityTracker, Workflow};
use crate::session::Session;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

/// Layers reachable from the roots, children being followers
pub fn tree_from_roots(workflow: &Workflow, collection: &dyn Collection) -> String {
    let mut path = HashSet::new();
    build_tree(&workflow.roots(), &|name: &str| workflow.followers_of(name), collection, 0, &mut path)
}

/// Layers reachable from the leaves, children being sources
pub fn tree_from_leaves(workflow: &Workflow, collection: &dyn Collection) -> String {
    let mut path = HashSet::new();
    build_tree(&workflow.leaves(), &|name: &str| workflow.sources_of(name), collection, 0, &mut path)
}

fn build_tree(
    items: &[String],
    follow: &dyn Fn(&str) -> Vec<String>,
    collection: &dyn Collection,
    level: usize,
    path: &mut HashSet<String>,
) -> String {
    let tracker = ValidityTracker::new(collection);
    let mut output = String::new();
    for item in items {
        if !collection.has(item) {
            continue;
        }
        let status = if tracker.is_invalid(item) { "invalid" } else { "valid" };
        output.push_str(&format!("{}-> {} [{}]\n", "   ".repeat(level), item, status));

        // a name already on the current path would recurse forever
        if path.insert(item.clone()) {
            output.push_str(&build_tree(&follow(item), follow, collection, level + 1, path));
            path.remove(item);
        }
    }
    output
}

/// Make an output name usable as a variable name
pub fn sanitize(name: &str) -> String {
    let re = Regex::new(r"[\[\]() ]").unwrap();
    re.replace_all(name, "_").into_owned()
}

/// Write the workflow out as step-by-step procedural code.
///
/// External inputs are loaded first; each task follows once all of its
/// sources are available. Tasks caught in a cycle come last, in
/// definition order.
pub fn generate_code(workflow: &Workflow) -> String {
    let mut code = String::new();
    let roots = workflow.roots();
    let mut available: HashSet<&str> = roots
        .iter()
        .map(String::as_str)
        .filter(|root| !workflow.contains(root))
        .collect();

    for root in &roots {
        if available.contains(root.as_str()) {
            code.push_str(&format!("{} = load({:?})\n", sanitize(root), root));
        }
    }

    let mut emitted: HashSet<&str> = HashSet::new();
    loop {
        let mut progress = false;
        for (name, task) in workflow.iter() {
            if emitted.contains(name) || !task.names().all(|s| available.contains(s)) {
                continue;
            }
            code.push_str(&statement(name, task));
            emitted.insert(name);
            available.insert(name);
            progress = true;
        }
        if !progress {
            break;
        }
    }

    for (name, task) in workflow.iter() {
        if !emitted.contains(name) {
            code.push_str(&statement(name, task));
        }
    }
    code
}

fn statement(name: &str, task: &Task) -> String {
    match task {
        Task::Data(value) => format!("{} = {}\n", sanitize(name), value),
        Task::Call { function, args } => {
            let args: Vec<String> = args
                .iter()
                .map(|arg| match arg {
                    Arg::Name(source) => sanitize(source),
                    Arg::Value(value) => value.to_string(),
                })
                .collect();
            format!("{} = {}({})\n", sanitize(name), function, args.join(", "))
        }
    }
}

/// One task as seen from outside
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub name: String,
    pub function: Option<String>,
    pub args: Vec<Arg>,
    pub invalid: bool,
}

/// Serializable view of a session's graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub session: String,
    pub created_at: DateTime<Utc>,
    pub current_step: usize,
    pub tasks: Vec<TaskSnapshot>,
    pub roots: Vec<String>,
    pub leaves: Vec<String>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

pub fn snapshot(session: &Session) -> GraphSnapshot {
    let workflow = session.workflow();
    let tasks = workflow
        .iter()
        .map(|(name, task)| TaskSnapshot {
            name: name.to_string(),
            function: task.function().map(|f| f.name().to_string()),
            args: task.args().to_vec(),
            invalid: session.is_invalid(name),
        })
        .collect();

    GraphSnapshot {
        session: session.id().to_string(),
        created_at: session.created_at(),
        current_step: session.current_step(),
        tasks,
        roots: workflow.roots(),
        leaves: workflow.leaves(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::LayerList;
    use crate::config::EngineConfig;
    use crate::core::{Function, Signature, Value};
    use crate::session::SessionId;
    use std::sync::Arc;

    fn unary(name: &str) -> Function {
        Function::new(name, Signature::new().param("x"), |args| Ok(args[0].clone()))
    }

    fn pipeline() -> Workflow {
        let threshold = Function::new(
            "threshold",
            Signature::new().param("image").param_with_default("level", 128),
            |args| Ok(args[0].clone()),
        );
        let mut workflow = Workflow::new();
        workflow.set("count (mask)", unary("count"), vec!["mask [1]".into()]).unwrap();
        workflow.set("mask [1]", threshold, vec!["img".into()]).unwrap();
        workflow
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("mask [1] (copy)"), "mask__1___copy_");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_generate_code_orders_by_dependencies() {
        let code = generate_code(&pipeline());
        assert_eq!(
            code,
            "img = load(\"img\")\n\
             mask__1_ = threshold(img, 128)\n\
             count__mask_ = count(mask__1_)\n"
        );
    }

    #[test]
    fn test_generate_code_with_cycle() {
        let mut workflow = Workflow::new();
        workflow.set("src", Value::Int(5), vec![]).unwrap();
        workflow.set("P", unary("f"), vec!["Q".into()]).unwrap();
        workflow.set("Q", unary("g"), vec!["P".into()]).unwrap();
        assert_eq!(generate_code(&workflow), "src = 5\nP = f(Q)\nQ = g(P)\n");
    }

    #[test]
    fn test_trees() {
        let workflow = pipeline();
        let layers = LayerList::new();
        for name in ["img", "mask [1]", "count (mask)"] {
            layers.insert(name, Value::Int(0));
        }
        layers.set_validity("count (mask)", false);

        assert_eq!(
            tree_from_roots(&workflow, &layers),
            "-> img [valid]\n   -> mask [1] [valid]\n      -> count (mask) [invalid]\n"
        );
        assert_eq!(
            tree_from_leaves(&workflow, &layers),
            "-> count (mask) [invalid]\n   -> mask [1] [valid]\n      -> img [valid]\n"
        );
    }

    #[test]
    fn test_tree_skips_missing_layers_and_cycles() {
        let mut workflow = Workflow::new();
        let mix = Function::new("mix", Signature::new().param("a").param("b"), |args| {
            Ok(args[0].clone())
        });
        workflow.set("P", mix, vec!["A".into(), "Q".into()]).unwrap();
        workflow.set("Q", unary("g"), vec!["P".into()]).unwrap();
        let layers = LayerList::new();
        for name in ["A", "P", "Q"] {
            layers.insert(name, Value::Int(0));
        }

        assert_eq!(
            tree_from_roots(&workflow, &layers),
            "-> A [valid]\n   -> P [valid]\n      -> Q [valid]\n         -> P [valid]\n"
        );

        let empty = LayerList::new();
        assert_eq!(tree_from_roots(&workflow, &empty), "");
    }

    #[test]
    fn test_snapshot_json() {
        let layers = Arc::new(LayerList::new());
        let session = Session::new(SessionId::new("v1"), layers.clone(), EngineConfig::default());
        layers.insert("img", Value::Int(3));
        session.apply("copy", unary("identity"), vec!["img".into()]).unwrap();

        let snap = snapshot(&session);
        assert_eq!(snap.roots, vec!["img"]);
        assert_eq!(snap.leaves, vec!["copy"]);
        assert_eq!(snap.tasks.len(), 1);
        assert_eq!(snap.tasks[0].function.as_deref(), Some("identity"));

        let json = snap.to_json();
        assert!(json.contains("\"session\": \"v1\""));
        assert!(json.contains("\"args\": [\n        \"img\"\n      ]"));
    }
}
