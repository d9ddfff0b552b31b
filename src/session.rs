//! Sessions - one workflow engine per viewer
//!
//! A [`Session`] owns the workflow graph of one viewer and the handle to
//! that viewer's layer collection. Sessions are created through a
//! [`SessionRegistry`] keyed by an injected [`SessionId`]; the background
//! work of a session lives exactly as long as its [`SchedulerHandle`].

use crate::collection::{Collection, LayerEvent, Origin};
use crate::config::EngineConfig;
use crate::core::{lock, resolve, Arg, Array, Function, Scheduler, Task, ValidityTracker, Value, Workflow};
use crate::error::WorkflowError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identity of the viewer a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An argument as handed over by the caller applying a step
#[derive(Debug, Clone)]
pub enum Input {
    /// Data; replaced by a layer name if it is some layer's data
    Value(Value),
    /// Explicit reference to a layer
    Name(String),
    /// The viewer context itself; never stored in the graph
    Context(SessionId),
}

impl From<Value> for Input {
    fn from(v: Value) -> Self {
        Input::Value(v)
    }
}

impl From<Array> for Input {
    fn from(v: Array) -> Self {
        Input::Value(Value::Array(v))
    }
}

impl From<i32> for Input {
    fn from(v: i32) -> Self {
        Input::Value(Value::from(v))
    }
}

impl From<i64> for Input {
    fn from(v: i64) -> Self {
        Input::Value(Value::from(v))
    }
}

impl From<f64> for Input {
    fn from(v: f64) -> Self {
        Input::Value(Value::from(v))
    }
}

impl From<bool> for Input {
    fn from(v: bool) -> Self {
        Input::Value(Value::from(v))
    }
}

impl From<&str> for Input {
    fn from(v: &str) -> Self {
        Input::Name(v.to_string())
    }
}

impl From<SessionId> for Input {
    fn from(v: SessionId) -> Self {
        Input::Context(v)
    }
}

/// Workflow engine bound to one viewer
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    config: EngineConfig,
    workflow: Arc<Mutex<Workflow>>,
    collection: Arc<dyn Collection>,
    writer: Arc<Mutex<()>>,
    watched: Mutex<HashSet<String>>,
    current_step: Arc<AtomicUsize>,
}

impl Session {
    pub fn new(id: SessionId, collection: Arc<dyn Collection>, config: EngineConfig) -> Self {
        log::info!("Creating workflow session {}", id);
        Self {
            id,
            created_at: Utc::now(),
            config,
            workflow: Arc::new(Mutex::new(Workflow::new())),
            collection,
            writer: Arc::new(Mutex::new(())),
            watched: Mutex::new(HashSet::new()),
            current_step: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    /// Copy of the current graph
    pub fn workflow(&self) -> Workflow {
        lock(&self.workflow).clone()
    }

    /// Recompute scheduler sharing this session's state
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.workflow.clone(),
            self.collection.clone(),
            self.writer.clone(),
            self.config.tick_interval(),
        )
    }

    pub fn is_invalid(&self, name: &str) -> bool {
        ValidityTracker::new(self.collection.as_ref()).is_invalid(name)
    }

    pub fn is_watched(&self, name: &str) -> bool {
        lock(&self.watched).contains(name)
    }

    fn watch<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        lock(&self.watched).extend(names.into_iter().map(str::to_string));
    }

    /// Turn caller inputs into graph arguments.
    ///
    /// Values that are a layer's data become that layer's name; this
    /// session's own context is dropped.
    fn to_args(&self, function: &Function, inputs: Vec<Input>) -> Result<Vec<Arg>, WorkflowError> {
        let mut args = Vec::with_capacity(inputs.len());
        for input in inputs {
            match input {
                Input::Value(value) => match self.collection.name_of(&value) {
                    Some(name) => args.push(Arg::Name(name)),
                    None => args.push(Arg::Value(value)),
                },
                Input::Name(name) => args.push(Arg::Name(name)),
                Input::Context(id) if id == self.id => {}
                Input::Context(id) => {
                    return Err(WorkflowError::binding(
                        function.name(),
                        format!("context of session {} passed to session {}", id, self.id),
                    ));
                }
            }
        }
        Ok(args)
    }

    /// Record that `target` is produced by `function` applied to `inputs`
    pub fn record_step(
        &self,
        target: &str,
        function: Function,
        inputs: Vec<Input>,
    ) -> Result<Option<Task>, WorkflowError> {
        self.record_step_with_keywords(target, function, inputs, Vec::new())
    }

    pub fn record_step_with_keywords(
        &self,
        target: &str,
        function: Function,
        inputs: Vec<Input>,
        keywords: Vec<(String, Input)>,
    ) -> Result<Option<Task>, WorkflowError> {
        let args = self.to_args(&function, inputs)?;
        let mut named = Vec::with_capacity(keywords.len());
        for (key, input) in keywords {
            // a keyword is always a single argument
            match self.to_args(&function, vec![input])?.pop() {
                Some(arg) => named.push((key, arg)),
                None => log::debug!("Dropping context keyword {} of {}", key, function),
            }
        }

        self.watch(
            args.iter()
                .chain(named.iter().map(|(_, arg)| arg))
                .filter_map(Arg::as_name),
        );

        log::info!("Recording step {} <- {}", target, function);
        let mut workflow = lock(&self.workflow);
        let replaced = workflow.set_with_keywords(target, function, args, named)?;
        log::debug!("Workflow now:\n{}", workflow);
        Ok(replaced)
    }

    /// Compute `function` on `inputs` now, publish the result as `target`
    /// and record the step so it is kept up to date from then on.
    ///
    /// Layers already derived from `target` go stale.
    pub fn apply(&self, target: &str, function: Function, inputs: Vec<Input>) -> Result<Value, WorkflowError> {
        let _writer = lock(&self.writer);

        let args = self.to_args(&function, inputs)?;
        let bound = function.bind(args.clone(), Vec::new())?;
        let values = resolve(self.collection.as_ref(), &bound)?;
        let value = function.call(&values).map_err(|source| WorkflowError::Compute {
            name: target.to_string(),
            source,
        })?;

        self.collection.set(target, value.clone());
        self.watch(args.iter().filter_map(Arg::as_name).chain([target]));

        let mut workflow = lock(&self.workflow);
        workflow.set(target, function, args)?;
        let tracker = ValidityTracker::new(self.collection.as_ref());
        tracker.mark_valid(target);
        let stale = tracker.invalidate_followers(&workflow, target);
        if stale.is_empty() {
            log::info!("Applied step {}", target);
        } else {
            log::info!("Applied step {}, invalidated {}", target, stale.join(", "));
        }
        Ok(value)
    }

    /// React to a mutation of the hosting collection
    pub fn handle_event(&self, event: &LayerEvent) {
        match event {
            LayerEvent::Inserted { name } => {
                log::debug!("Layer added: {}", name);
                lock(&self.watched).insert(name.clone());
            }
            LayerEvent::DataChanged { name, origin: Origin::User } => {
                if !self.is_watched(name) {
                    return;
                }
                let _writer = lock(&self.writer);
                let tracker = ValidityTracker::new(self.collection.as_ref());
                tracker.mark_valid(name);
                let workflow = lock(&self.workflow);
                let stale = tracker.invalidate_followers(&workflow, name);
                if !stale.is_empty() {
                    log::info!("{} edited, invalidated {}", name, stale.join(", "));
                }
            }
            LayerEvent::DataChanged { origin: Origin::Engine, .. } => {}
            LayerEvent::Removed { name } => {
                lock(&self.watched).remove(name);
                if lock(&self.workflow).remove(name).is_some() {
                    log::info!("Layer {} removed, dropped its step", name);
                }
            }
        }
    }

    pub fn current_step(&self) -> usize {
        self.current_step.load(Ordering::SeqCst)
    }

    /// Shared view of the time slider for step functions that slice by time
    pub fn step_handle(&self) -> Arc<AtomicUsize> {
        self.current_step.clone()
    }

    /// Move the time slider.
    ///
    /// Everything derived from a root is invalidated when the step actually
    /// changes. Returns whether it changed.
    pub fn set_current_step(&self, step: usize) -> bool {
        if self.current_step.swap(step, Ordering::SeqCst) == step {
            return false;
        }

        let stale = self.invalidate_derived();
        log::debug!("Time step moved to {}, invalidated {}", step, stale.join(", "));
        true
    }

    /// Mark everything computed from a root stale
    fn invalidate_derived(&self) -> Vec<String> {
        let _writer = lock(&self.writer);
        let tracker = ValidityTracker::new(self.collection.as_ref());
        let workflow = lock(&self.workflow);
        let mut stale = Vec::new();
        for root in workflow.roots() {
            stale.extend(tracker.invalidate_followers(&workflow, &root));
        }
        stale
    }

    /// Catch up after missed layer events.
    ///
    /// Which edits were lost is unknown, so every layer is watched and
    /// everything derived is recomputed.
    fn resync(&self) {
        self.watch(self.collection.names().iter().map(String::as_str));
        let stale = self.invalidate_derived();
        log::info!("Session {} resynced, invalidated {}", self.id, stale.join(", "));
    }

    /// Start the scheduler and an event pump draining `events`.
    ///
    /// Layers already in the collection are watched from here on.
    pub fn start(self: &Arc<Self>, events: broadcast::Receiver<LayerEvent>) -> SchedulerHandle {
        self.watch(self.collection.names().iter().map(String::as_str));
        let cancel = CancellationToken::new();
        let scheduler = tokio::spawn(self.scheduler().run(cancel.child_token()));
        let pump = tokio::spawn(self.clone().pump(events, cancel.child_token()));
        SchedulerHandle {
            cancel,
            tasks: vec![scheduler, pump],
        }
    }

    async fn pump(self: Arc<Self>, mut events: broadcast::Receiver<LayerEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Session {} missed {} layer events", self.id, skipped);
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

/// Owner of a session's background tasks; dropping it stops them
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Cancel and wait for the background tasks to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::warn!("Session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Factory of sessions keyed by viewer identity
pub struct SessionRegistry {
    config: EngineConfig,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    handles: Mutex<HashMap<SessionId, SchedulerHandle>>,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `id`, created on first use.
    ///
    /// `collection` is only used when the session is created.
    pub fn install(&self, id: SessionId, collection: Arc<dyn Collection>) -> Arc<Session> {
        lock(&self.sessions)
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Session::new(id, collection, self.config.clone())))
            .clone()
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        lock(&self.sessions).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Start background work for an installed session; a running one is left alone
    pub fn start(
        &self,
        id: &SessionId,
        events: broadcast::Receiver<LayerEvent>,
    ) -> Result<(), WorkflowError> {
        let session = self
            .get(id)
            .ok_or_else(|| WorkflowError::NotFound(format!("session {}", id)))?;
        let mut handles = lock(&self.handles);
        if handles.get(id).is_some_and(SchedulerHandle::is_running) {
            return Ok(());
        }
        handles.insert(id.clone(), session.start(events));
        Ok(())
    }

    /// Tear a session down, stopping its background work. Returns whether it existed.
    pub async fn close(&self, id: &SessionId) -> bool {
        let session = lock(&self.sessions).remove(id);
        let handle = lock(&self.handles).remove(id);
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        if session.is_some() {
            log::info!("Closed workflow session {}", id);
        }
        session.is_some()
    }
}
