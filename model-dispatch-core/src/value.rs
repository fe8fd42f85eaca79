//! Persistent state values with structural sharing
//!
//! [`Value`] mirrors the shape of `serde_json::Value`, but its containers are
//! reference counted. Cloning a value is O(1), and writing through a clone
//! copies only the containers on the path being written (copy-on-write via
//! [`Arc::make_mut`]). Untouched subtrees stay shared with the original, so
//! [`Value::same`] can tell cheaply whether anything changed.
//!
//! # Example
//!
//! ```
//! use model_dispatch_core::value::{produce, Value};
//! use serde_json::json;
//!
//! let base = Value::from(json!({ "a": { "n": 1 }, "b": { "n": 2 } }));
//! let next = produce(&base, |draft| {
//!     draft["a"]["n"] = Value::from(10);
//! });
//!
//! assert_eq!(base["a"]["n"].as_i64(), Some(1));
//! assert_eq!(next["a"]["n"].as_i64(), Some(10));
//! assert!(next["b"].same(&base["b"]));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Map type used by [`Value::Map`].
pub type Map = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// A structurally shared state value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<Map>),
}

impl Value {
    /// An empty map, the default payload of an action.
    pub fn empty_map() -> Self {
        Value::Map(Arc::new(Map::new()))
    }

    /// An empty list.
    pub fn empty_list() -> Self {
        Value::List(Arc::new(Vec::new()))
    }

    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Reference identity.
    ///
    /// Containers are the same when they share the same allocation. Scalars
    /// have no identity of their own and compare by value.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Mutable access to a map, unsharing it first if needed.
    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(map) => Some(Arc::make_mut(map)),
            _ => None,
        }
    }

    /// Mutable access to a list, unsharing it first if needed.
    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(Arc::make_mut(items)),
            _ => None,
        }
    }

    /// Look up a key in a map. Returns `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Mutable lookup of a key; unshares every container on the way.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.as_map_mut().and_then(|map| map.get_mut(key))
    }

    /// Walk a dotted path (`"a.b.c"`), one map level per segment.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(self, |current, segment| current.get(segment))
    }

    /// Insert into a map, turning `Null` into an empty map first.
    ///
    /// Returns the previous value for the key. Writing into a scalar or a
    /// list is a no-op that returns `None`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        if self.is_null() {
            *self = Value::empty_map();
        }
        self.as_map_mut()
            .and_then(|map| map.insert(key.into(), value.into()))
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.as_map_mut().and_then(|map| map.remove(key))
    }

    /// Append to a list, turning `Null` into an empty list first.
    pub fn push(&mut self, value: impl Into<Value>) {
        if self.is_null() {
            *self = Value::empty_list();
        }
        if let Some(items) = self.as_list_mut() {
            items.push(value.into());
        }
    }

    /// Write `value` at a dotted path, creating intermediate maps.
    ///
    /// Only the containers along the path are copied; everything else stays
    /// shared. Fails with the offending segment when a non-map value sits on
    /// the path.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<(), String> {
        let mut segments = path.split('.').peekable();
        let mut current = self;
        while let Some(segment) = segments.next() {
            if current.is_null() {
                *current = Value::empty_map();
            }
            let map = current
                .as_map_mut()
                .ok_or_else(|| segment.to_string())?;
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return Ok(());
            }
            current = map.entry(segment.to_string()).or_insert(Value::Null);
        }
        Ok(())
    }

    /// Number of entries of a map or list; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Value::List(items) => items.len(),
            Value::Map(map) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Apply an in-place `recipe` to a copy-on-write draft of `base`.
///
/// `base` is never modified. The result shares every subtree the recipe did
/// not write to, and is `base` itself when every write stored an equal value.
pub fn produce(base: &Value, recipe: impl FnOnce(&mut Value)) -> Value {
    let mut draft = base.clone();
    recipe(&mut draft);
    if draft.same(base) || !equivalent(&draft, base) {
        draft
    } else {
        base.clone()
    }
}

/// Structural equality that skips shared subtrees.
fn equivalent(a: &Value, b: &Value) -> bool {
    if a.same(b) {
        return true;
    }
    match (a, b) {
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| equivalent(a, b))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && equivalent(va, vb))
        }
        _ => false,
    }
}

impl Index<&str> for Value {
    type Output = Value;

    /// Missing keys and non-map values index to `Null`.
    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

impl IndexMut<&str> for Value {
    /// Inserts `Null` for missing keys, like `serde_json::Value`.
    ///
    /// # Panics
    ///
    /// Panics when the value is neither a map nor `Null`.
    fn index_mut(&mut self, key: &str) -> &mut Value {
        if self.is_null() {
            *self = Value::empty_map();
        }
        match self {
            Value::Map(map) => Arc::make_mut(map)
                .entry(key.to_string())
                .or_insert(Value::Null),
            other => panic!("cannot index into a {} with key {key:?}", other.type_name()),
        }
    }
}

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        self.as_list()
            .and_then(|items| items.get(idx))
            .unwrap_or(&NULL)
    }
}

impl IndexMut<usize> for Value {
    /// # Panics
    ///
    /// Panics when the value is not a list or the index is out of bounds.
    fn index_mut(&mut self, idx: usize) -> &mut Value {
        match self {
            Value::List(items) => &mut Arc::make_mut(items)[idx],
            other => panic!("cannot index into a {} with {idx}", other.type_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::Value::from(self.clone()))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Value::Map(Arc::new(iter.into_iter().collect()))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::List(Arc::new(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(n) => serde_json::Value::from(n),
            Value::Float(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().cloned().map(serde_json::Value::from).collect(),
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
                    .collect(),
            ),
        }
    }
}
