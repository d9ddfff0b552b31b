//! Layer collection - the registry of named outputs the engine reads and writes
//!
//! The engine only talks to the [`Collection`] trait. [`LayerList`] is an
//! in-memory implementation standing in for a viewer's layer list; it
//! broadcasts every mutation as a [`LayerEvent`] for the session to consume.

use crate::config::EngineConfig;
use crate::core::{lock, Value};
use crate::error::WorkflowError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// What the engine needs from the hosting collection
pub trait Collection: Send + Sync {
    fn has(&self, name: &str) -> bool;

    /// Layer names in insertion order
    fn names(&self) -> Vec<String>;

    /// Current value of a layer
    fn get(&self, name: &str) -> Option<Value>;

    /// Engine write; creates the layer if it does not exist yet
    fn set(&self, name: &str, value: Value);

    /// Validity flag from the layer metadata, `None` when unset or no layer
    fn validity(&self, name: &str) -> Option<bool>;

    fn set_validity(&self, name: &str, valid: bool);

    /// Name of the layer whose data is the very same object as `value`
    fn name_of(&self, value: &Value) -> Option<String>;
}

/// Who changed a layer's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Engine,
}

/// Mutation notifications emitted by a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerEvent {
    Inserted { name: String },
    DataChanged { name: String, origin: Origin },
    Removed { name: String },
}

impl LayerEvent {
    pub fn name(&self) -> &str {
        match self {
            LayerEvent::Inserted { name }
            | LayerEvent::DataChanged { name, .. }
            | LayerEvent::Removed { name } => name,
        }
    }

    /// Serialize to JSON line
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A named layer: data plus free-form metadata
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub data: Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Thread-safe ordered list of layers
pub struct LayerList {
    layers: Mutex<Vec<Layer>>,
    validity_key: String,
    tx: broadcast::Sender<LayerEvent>,
}

impl LayerList {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let (tx, _) = broadcast::channel(config.event_capacity);
        Self {
            layers: Mutex::new(Vec::new()),
            validity_key: config.validity_key.clone(),
            tx,
        }
    }

    /// Subscribe to mutation events
    pub fn subscribe(&self) -> broadcast::Receiver<LayerEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: LayerEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Add a layer as the user would; replacing an existing one counts as an edit
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Value>) {
        self.write(name.into(), data.into(), Origin::User);
    }

    /// User edit of an existing layer's data
    pub fn edit(&self, name: &str, data: impl Into<Value>) -> Result<(), WorkflowError> {
        {
            let mut layers = lock(&self.layers);
            let layer = layers
                .iter_mut()
                .find(|l| l.name == name)
                .ok_or_else(|| WorkflowError::NotFound(name.to_string()))?;
            layer.data = data.into();
        }
        self.emit(LayerEvent::DataChanged {
            name: name.to_string(),
            origin: Origin::User,
        });
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Layer> {
        let removed = {
            let mut layers = lock(&self.layers);
            let index = layers.iter().position(|l| l.name == name)?;
            layers.remove(index)
        };
        self.emit(LayerEvent::Removed {
            name: name.to_string(),
        });
        Some(removed)
    }

    pub fn layer(&self, name: &str) -> Option<Layer> {
        lock(&self.layers).iter().find(|l| l.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.layers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.layers).is_empty()
    }

    fn write(&self, name: String, data: Value, origin: Origin) {
        let event = {
            let mut layers = lock(&self.layers);
            match layers.iter_mut().find(|l| l.name == name) {
                Some(layer) => {
                    layer.data = data;
                    LayerEvent::DataChanged { name, origin }
                }
                None => {
                    layers.push(Layer {
                        name: name.clone(),
                        data,
                        metadata: HashMap::new(),
                    });
                    LayerEvent::Inserted { name }
                }
            }
        };
        self.emit(event);
    }
}

impl Default for LayerList {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection for LayerList {
    fn has(&self, name: &str) -> bool {
        lock(&self.layers).iter().any(|l| l.name == name)
    }

    fn names(&self) -> Vec<String> {
        lock(&self.layers).iter().map(|l| l.name.clone()).collect()
    }

    fn get(&self, name: &str) -> Option<Value> {
        lock(&self.layers)
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.data.clone())
    }

    fn set(&self, name: &str, value: Value) {
        self.write(name.to_string(), value, Origin::Engine);
    }

    fn validity(&self, name: &str) -> Option<bool> {
        lock(&self.layers)
            .iter()
            .find(|l| l.name == name)
            .and_then(|l| l.metadata.get(&self.validity_key))
            .and_then(serde_json::Value::as_bool)
    }

    fn set_validity(&self, name: &str, valid: bool) {
        let mut layers = lock(&self.layers);
        if let Some(layer) = layers.iter_mut().find(|l| l.name == name) {
            layer
                .metadata
                .insert(self.validity_key.clone(), serde_json::Value::Bool(valid));
        }
    }

    fn name_of(&self, value: &Value) -> Option<String> {
        lock(&self.layers)
            .iter()
            .find(|l| l.data.same(value))
            .map(|l| l.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Array;

    #[test]
    fn test_events_follow_mutations() {
        let layers = LayerList::new();
        let mut rx = layers.subscribe();

        layers.insert("img", Value::Int(1));
        layers.edit("img", Value::Int(2)).unwrap();
        layers.set("img", Value::Int(3));
        layers.set("mask", Value::Int(4));
        layers.remove("img");

        let events: Vec<LayerEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                LayerEvent::Inserted { name: "img".into() },
                LayerEvent::DataChanged { name: "img".into(), origin: Origin::User },
                LayerEvent::DataChanged { name: "img".into(), origin: Origin::Engine },
                LayerEvent::Inserted { name: "mask".into() },
                LayerEvent::Removed { name: "img".into() },
            ]
        );
        assert_eq!(layers.names(), vec!["mask"]);
    }

    #[test]
    fn test_edit_unknown_layer() {
        let layers = LayerList::new();
        assert!(matches!(
            layers.edit("nope", Value::Int(1)),
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[test]
    fn test_validity_metadata() {
        let layers = LayerList::new();
        layers.insert("img", Value::Int(1));
        assert_eq!(layers.validity("img"), None);

        layers.set_validity("img", false);
        assert_eq!(layers.validity("img"), Some(false));
        let layer = layers.layer("img").unwrap();
        assert_eq!(layer.metadata["valid"], serde_json::json!(false));

        layers.set_validity("ghost", false);
        assert_eq!(layers.validity("ghost"), None);
    }

    #[test]
    fn test_name_of_uses_identity() {
        let layers = LayerList::new();
        let pixels = Array::from_vec(vec![1.0, 2.0]);
        layers.insert("img", pixels.clone());

        assert_eq!(layers.name_of(&Value::Array(pixels)), Some("img".to_string()));
        let copy = Array::from_vec(vec![1.0, 2.0]);
        assert_eq!(layers.name_of(&Value::Array(copy)), None);
        assert_eq!(layers.name_of(&Value::Int(1)), None);
    }

    #[test]
    fn test_event_json() {
        let event = LayerEvent::DataChanged {
            name: "img".to_string(),
            origin: Origin::User,
        };
        let json = event.to_json_line();
        assert!(json.contains("data_changed"));
        assert!(json.contains("\"origin\":\"user\""));
    }
}
