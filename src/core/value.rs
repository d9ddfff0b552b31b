//! Layer payloads and step arguments

use anyhow::Result;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Dense n-dimensional buffer backing an image or labels layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayData {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Shared handle to layer pixels.
///
/// Cloning is cheap and keeps the identity of the buffer, which is how the
/// engine recognises that a step argument *is* some layer's data.
#[derive(Debug, Clone)]
pub struct Array(Arc<ArrayData>);

impl Array {
    /// Create an array, checking that the shape matches the buffer length
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            anyhow::bail!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            );
        }
        Ok(Self(Arc::new(ArrayData { shape, data })))
    }

    /// One-dimensional array
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self(Arc::new(ArrayData {
            shape: vec![data.len()],
            data,
        }))
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.0.data
    }

    pub fn ndim(&self) -> usize {
        self.0.shape.len()
    }

    pub fn len(&self) -> usize {
        self.0.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.data.is_empty()
    }

    /// Element-wise map into a fresh buffer of the same shape
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self(Arc::new(ArrayData {
            shape: self.0.shape.clone(),
            data: self.0.data.iter().copied().map(f).collect(),
        }))
    }

    /// True if both handles point at the same buffer
    pub fn same(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Serialize for Array {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.same(other) || self.0 == other.0
    }
}

/// Value held by a layer or passed literally to a step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Array),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Object identity: only arrays have it, scalars are always fresh
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.same(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Array(a) => write!(f, "array(shape={:?})", a.shape()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

/// A step argument: a reference to another layer by name, or a literal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Arg {
    Name(String),
    Value(Value),
}

impl Arg {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Arg::Name(name) => Some(name),
            Arg::Value(_) => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Name(name) => write!(f, "{:?}", name),
            Arg::Value(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Name(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Name(v)
    }
}

macro_rules! literal_arg {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Value(v.into())
                }
            }
        )*
    };
}

literal_arg!(i32, i64, f64, bool, Array, Value);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_check() {
        assert!(Array::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(Array::new(vec![2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_identity_vs_equality() {
        let a = Array::from_vec(vec![1.0, 2.0]);
        let b = Array::from_vec(vec![1.0, 2.0]);
        assert_eq!(a, b);
        assert!(!a.same(&b));
        assert!(Value::Array(a.clone()).same(&Value::Array(a)));
        assert!(!Value::Int(3).same(&Value::Int(3)));
    }

    #[test]
    fn test_arg_conversions() {
        assert_eq!(Arg::from("img"), Arg::Name("img".to_string()));
        assert_eq!(Arg::from(128), Arg::Value(Value::Int(128)));
        assert_eq!(Arg::from(0.5), Arg::Value(Value::Float(0.5)));
        assert_eq!(Arg::from("img").to_string(), "\"img\"");
        assert_eq!(Arg::from(128).to_string(), "128");
    }
}
