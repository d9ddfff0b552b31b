//! Step functions with an explicit parameter schema
//!
//! A step is registered together with its ordered parameter list, so binding
//! call arguments never needs runtime reflection:
//! ```
//! use layerflow::{Function, Signature, Value};
//!
//! let threshold = Function::new(
//!     "threshold",
//!     Signature::new().param("image").param_with_default("level", 128),
//!     |args| Ok(Value::Bool(args[0].as_float() > args[1].as_float())),
//! );
//! assert_eq!(threshold.signature().names(), vec!["image", "level"]);
//! ```

use super::value::{Arg, Value};
use crate::error::WorkflowError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Callable behind a step
pub type StepFn = dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync;

/// A declared parameter, optionally with a default
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Arg>,
}

/// Ordered parameter list of a step function
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a required parameter
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Append a parameter that falls back to `default` when not supplied
    pub fn param_with_default(mut self, name: impl Into<String>, default: impl Into<Arg>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Map positional and keyword arguments onto the parameter list.
    ///
    /// The result holds exactly one argument per parameter, in declaration
    /// order, with defaults filled in.
    pub fn bind(
        &self,
        function: &str,
        args: Vec<Arg>,
        keywords: Vec<(String, Arg)>,
    ) -> Result<Vec<Arg>, WorkflowError> {
        if args.len() > self.params.len() {
            return Err(WorkflowError::binding(
                function,
                format!(
                    "takes {} positional arguments but {} were given",
                    self.params.len(),
                    args.len()
                ),
            ));
        }

        let mut slots: Vec<Option<Arg>> = args.into_iter().map(Some).collect();
        slots.resize(self.params.len(), None);

        for (key, value) in keywords {
            let Some(index) = self.params.iter().position(|p| p.name == key) else {
                return Err(WorkflowError::binding(
                    function,
                    format!("unexpected keyword argument '{}'", key),
                ));
            };
            if slots[index].is_some() {
                return Err(WorkflowError::binding(
                    function,
                    format!("multiple values for argument '{}'", key),
                ));
            }
            slots[index] = Some(value);
        }

        slots
            .into_iter()
            .zip(&self.params)
            .map(|(slot, param)| {
                slot.or_else(|| param.default.clone()).ok_or_else(|| {
                    WorkflowError::binding(
                        function,
                        format!("missing required argument '{}'", param.name),
                    )
                })
            })
            .collect()
    }
}

/// A named, shareable step function
#[derive(Clone)]
pub struct Function {
    name: String,
    signature: Signature,
    call: Arc<StepFn>,
}

impl Function {
    pub fn new<F>(name: impl Into<String>, signature: Signature, call: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            call: Arc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn bind(&self, args: Vec<Arg>, keywords: Vec<(String, Arg)>) -> Result<Vec<Arg>, WorkflowError> {
        self.signature.bind(&self.name, args, keywords)
    }

    pub fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        (self.call)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("signature", &self.signature.names())
            .finish()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> Signature {
        Signature::new()
            .param("image")
            .param_with_default("level", 128)
    }

    #[test]
    fn test_bind_applies_defaults() {
        let bound = signature().bind("threshold", vec!["img".into()], vec![]).unwrap();
        assert_eq!(bound, vec![Arg::from("img"), Arg::from(128)]);
    }

    #[test]
    fn test_bind_keywords() {
        let bound = signature()
            .bind(
                "threshold",
                vec![],
                vec![
                    ("level".to_string(), Arg::from(7)),
                    ("image".to_string(), Arg::from("img")),
                ],
            )
            .unwrap();
        assert_eq!(bound, vec![Arg::from("img"), Arg::from(7)]);
    }

    #[test]
    fn test_bind_errors() {
        let too_many = signature().bind("t", vec!["a".into(), 1.into(), 2.into()], vec![]);
        assert!(matches!(too_many, Err(WorkflowError::Binding { .. })));

        let unknown = signature().bind("t", vec!["a".into()], vec![("sigma".to_string(), 1.into())]);
        assert!(matches!(unknown, Err(WorkflowError::Binding { .. })));

        let twice = signature().bind("t", vec!["a".into()], vec![("image".to_string(), "b".into())]);
        assert!(matches!(twice, Err(WorkflowError::Binding { .. })));

        let missing = signature().bind("t", vec![], vec![]);
        let err = missing.unwrap_err().to_string();
        assert!(err.contains("missing required argument 'image'"));
    }

    #[test]
    fn test_call() {
        let double = Function::new("double", Signature::new().param("x"), |args| {
            Ok(Value::Int(args[0].as_int().unwrap_or_default() * 2))
        });
        assert_eq!(double.call(&[Value::Int(4)]).unwrap(), Value::Int(8));
        assert_eq!(double.to_string(), "double");
    }
}
