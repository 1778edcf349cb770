// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-module binding environments
//!
//! Each module record owns a [`ModuleScope`] the interpreter runs its body
//! against. A binding lives in a shared [`BindingCell`]; imported bindings
//! alias the exporting module's cell, so a reassignment in the exporter is
//! observed live by every importer. A cell starts uninitialized and reads
//! before its declaration has executed fail (temporal dead zone).

use crate::error::{BindingError, LoadError, Result};
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host callback implementing `require` for a CommonJS scope
pub type RequireFn = Arc<dyn Fn(&str) -> Result<Value> + Send + Sync>;

/// One module binding slot
///
/// `None` means declared but not yet initialized.
pub struct BindingCell {
    value: RwLock<Option<Value>>,
}

impl BindingCell {
    /// Creates an uninitialized cell.
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    /// Creates an already-initialized cell.
    pub fn with_value(value: Value) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }

    /// The current value, if initialized.
    pub fn get(&self) -> Option<Value> {
        self.value.read().clone()
    }

    /// Whether the declaration has executed.
    pub fn is_initialized(&self) -> bool {
        self.value.read().is_some()
    }

    /// Initializes or reassigns the cell.
    pub fn set(&self, value: Value) {
        *self.value.write() = Some(value);
    }
}

impl Default for BindingCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_initialized() {
            write!(f, "BindingCell(initialized)")
        } else {
            write!(f, "BindingCell(<uninitialized>)")
        }
    }
}

/// The binding environment of one module
pub struct ModuleScope {
    path: PathBuf,
    bindings: RwLock<FxHashMap<String, Arc<BindingCell>>>,
    host_require: RwLock<Option<RequireFn>>,
}

impl ModuleScope {
    /// Creates an empty scope for the module at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            bindings: RwLock::new(FxHashMap::default()),
            host_require: RwLock::new(None),
        }
    }

    /// The module this scope belongs to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declares a binding, returning its cell. Re-declaring returns the
    /// existing cell.
    pub fn declare(&self, name: &str) -> Arc<BindingCell> {
        let mut bindings = self.bindings.write();
        Arc::clone(
            bindings
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(BindingCell::new())),
        )
    }

    /// Makes `name` an alias for an existing cell (import bindings).
    pub fn alias(&self, name: &str, cell: Arc<BindingCell>) {
        self.bindings.write().insert(name.to_string(), cell);
    }

    /// The cell backing `name`, if declared.
    pub fn cell(&self, name: &str) -> Option<Arc<BindingCell>> {
        self.bindings.read().get(name).cloned()
    }

    /// Initializes a binding, declaring it first if needed. Used by the
    /// interpreter when a declaration executes.
    pub fn initialize(&self, name: &str, value: Value) {
        self.declare(name).set(value);
    }

    /// Reassigns an initialized binding; importers observe the new value.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        match self.cell(name) {
            Some(cell) if cell.is_initialized() => {
                cell.set(value);
                Ok(())
            }
            _ => Err(BindingError::Uninitialized {
                module: self.path.clone(),
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Reads a binding, failing if it has not been initialized.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.cell(name)
            .and_then(|cell| cell.get())
            .ok_or_else(|| {
                BindingError::Uninitialized {
                    module: self.path.clone(),
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Installs the host `require` callback (CommonJS scopes only).
    pub fn set_host_require(&self, require: RequireFn) {
        *self.host_require.write() = Some(require);
    }

    /// Resolves and loads `specifier` through the host `require`.
    pub fn require(&self, specifier: &str) -> Result<Value> {
        let require = self.host_require.read().clone();
        match require {
            Some(require) => require(specifier),
            None => Err(LoadError::RequireUnavailable {
                path: self.path.clone(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("path", &self.path)
            .field("bindings", &self.bindings.read().len())
            .finish()
    }
}
