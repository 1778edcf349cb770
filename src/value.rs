// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interchange value representation
//!
//! The module system hands values across the collaborator boundary: CommonJS
//! exports objects, JSON module contents, and namespace bindings. This is a
//! deliberately small model; the engine maps it onto its own object graph at
//! the boundary. Objects and arrays are shared references so a CommonJS
//! exports object pre-published to the cache and the one the module body
//! mutates are the same object.

use crate::json::JsonValue;
use crate::namespace::ModuleNamespace;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared, mutable object contents
pub type ObjectRef = Arc<RwLock<ObjectData>>;

/// A JavaScript-ish value.
///
/// Values are thread-safe and can be shared across compilation threads.
#[derive(Clone)]
pub enum Value {
    /// undefined
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Array of values
    Array(Arc<RwLock<Vec<Value>>>),
    /// Plain object with insertion-ordered properties
    Object(ObjectRef),
    /// A module namespace object
    Namespace(Arc<ModuleNamespace>),
}

impl Value {
    /// Creates an empty object.
    pub fn object() -> Self {
        Value::Object(Arc::new(RwLock::new(ObjectData::default())))
    }

    /// Creates an array from values.
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(values)))
    }

    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns true if this value is nullish (null or undefined).
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Reads an own property if this is an object.
    pub fn get_property(&self, name: &str) -> Option<Value> {
        match self {
            Value::Object(obj) => obj.read().get(name).cloned(),
            _ => None,
        }
    }

    /// Writes an own property if this is an object; returns false otherwise.
    pub fn set_property(&self, name: &str, value: Value) -> bool {
        match self {
            Value::Object(obj) => {
                obj.write().insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    /// Own enumerable property names, in insertion order.
    pub fn own_keys(&self) -> Vec<String> {
        match self {
            Value::Object(obj) => obj.read().keys().map(str::to_owned).collect(),
            _ => Vec::new(),
        }
    }

    /// Converts a parsed JSON value into a `Value`.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => Value::Number(*n),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            JsonValue::Object(map) => {
                let mut data = ObjectData::default();
                for (key, value) in map.iter() {
                    data.insert(key.to_string(), Value::from_json(value));
                }
                Value::Object(Arc::new(RwLock::new(data)))
            }
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            // Historical quirk
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Namespace(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                // NaN is never equal to itself
                if a.is_nan() && b.is_nan() { false } else { a == b }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => write!(f, "Array(len={})", items.read().len()),
            Value::Object(obj) => write!(f, "Object(keys={})", obj.read().len()),
            Value::Namespace(ns) => write!(f, "[Module: {}]", ns.module_path().display()),
        }
    }
}

/// Object property storage with insertion order
#[derive(Debug, Default)]
pub struct ObjectData {
    entries: Vec<(String, Value)>,
}

impl ObjectData {
    /// Looks up a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or replaces a property, keeping first-insertion position.
    pub fn insert(&mut self, key: String, value: Value) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Removes a property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Iterates properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
