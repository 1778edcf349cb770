// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module namespace objects
//!
//! A namespace is the read-only view of a linked module's exports. Its key
//! set is fixed when the record reaches `Linked` and never changes; the
//! values read live through the exporting module's binding cells. Every
//! observation path that would produce a value (direct reads, enumeration,
//! property descriptors) checks initialization, so a binding in its
//! temporal dead zone surfaces the same error no matter how it is observed.

use crate::error::{BindingError, Result};
use crate::scope::BindingCell;
use crate::value::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Property descriptor reported for namespace exports
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    /// The current binding value
    pub value: Value,
    /// Namespace properties report as writable even though sets fail
    pub writable: bool,
    /// Always enumerable
    pub enumerable: bool,
    /// Never configurable
    pub configurable: bool,
}

/// The read-only exotic view of a linked module's exports
pub struct ModuleNamespace {
    module: PathBuf,
    /// Export names and their cells, sorted by name
    entries: Vec<(String, Arc<BindingCell>)>,
}

impl ModuleNamespace {
    /// Builds a namespace from resolved export bindings. The key set is
    /// fixed here; `entries` are sorted by name.
    pub(crate) fn new(module: PathBuf, mut entries: Vec<(String, Arc<BindingCell>)>) -> Self {
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Self { module, entries }
    }

    /// The module this namespace belongs to.
    pub fn module_path(&self) -> &Path {
        &self.module
    }

    /// Whether `name` is an exported binding.
    pub fn has(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// The fixed, sorted export name set.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Number of exported names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the module exports nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads an exported binding.
    ///
    /// A name outside the key set reads as `undefined` (plain missing
    /// property); a name inside the key set whose declaration has not
    /// executed is an initialization-order error.
    pub fn get(&self, name: &str) -> Result<Value> {
        match self.lookup(name) {
            Some(cell) => self.read_cell(name, cell),
            None => Ok(Value::Undefined),
        }
    }

    /// Enumerates `(name, value)` pairs in sorted name order. Fails if any
    /// binding is still uninitialized.
    pub fn entries(&self) -> Result<Vec<(String, Value)>> {
        self.entries
            .iter()
            .map(|(name, cell)| Ok((name.clone(), self.read_cell(name, cell)?)))
            .collect()
    }

    /// Property descriptor for an exported name, or `None` outside the key
    /// set. Producing the descriptor observes the value, so it checks
    /// initialization too.
    pub fn property_descriptor(&self, name: &str) -> Result<Option<PropertyDescriptor>> {
        match self.lookup(name) {
            Some(cell) => Ok(Some(PropertyDescriptor {
                value: self.read_cell(name, cell)?,
                writable: true,
                enumerable: true,
                configurable: false,
            })),
            None => Ok(None),
        }
    }

    /// Sets always fail: the namespace is read-only.
    pub fn set(&self, name: &str, _value: Value) -> Result<()> {
        Err(BindingError::NamespaceReadOnly {
            name: name.to_string(),
        }
        .into())
    }

    /// Defines always fail: the key set is fixed at creation.
    pub fn define(&self, name: &str, _value: Value) -> Result<()> {
        Err(BindingError::NamespaceReadOnly {
            name: name.to_string(),
        }
        .into())
    }

    /// Deletes always fail for exported names.
    pub fn delete(&self, name: &str) -> Result<()> {
        Err(BindingError::NamespaceReadOnly {
            name: name.to_string(),
        }
        .into())
    }

    fn lookup(&self, name: &str) -> Option<&Arc<BindingCell>> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|index| &self.entries[index].1)
    }

    fn read_cell(&self, name: &str, cell: &BindingCell) -> Result<Value> {
        cell.get().ok_or_else(|| {
            BindingError::Uninitialized {
                module: self.module.clone(),
                name: name.to_string(),
            }
            .into()
        })
    }
}

impl fmt::Debug for ModuleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleNamespace")
            .field("module", &self.module)
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
