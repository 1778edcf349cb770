// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Collaborator interfaces to the compiler and interpreter
//!
//! The module system never parses or executes JavaScript itself. The engine
//! hands it compiled units (with the import/export metadata the linker
//! needs) through [`ModuleCompiler`], and runs module bodies against a
//! [`crate::scope::ModuleScope`] through [`Interpreter`].

use crate::error::Result;
use crate::resolver::ModuleFormat;
use crate::scope::ModuleScope;
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One `import` declaration binding, extracted by the compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEntry {
    /// `import { x } from 'm'`, `import { x as y } from 'm'`, or
    /// `import d from 'm'` (where `source_name` is `"default"`)
    Named {
        /// The module specifier
        request: String,
        /// The name exported by the target module
        source_name: String,
        /// The local binding name
        local_name: String,
    },
    /// `import * as ns from 'm'`
    Namespace {
        /// The module specifier
        request: String,
        /// The local binding name
        local_name: String,
    },
    /// `import 'm'`
    SideEffect {
        /// The module specifier
        request: String,
    },
}

impl ImportEntry {
    /// The module specifier this entry requests.
    pub fn request(&self) -> &str {
        match self {
            ImportEntry::Named { request, .. }
            | ImportEntry::Namespace { request, .. }
            | ImportEntry::SideEffect { request } => request,
        }
    }
}

/// One `export` declaration binding, extracted by the compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEntry {
    /// `export { x }`, `export { x as y }`, `export const x = …`,
    /// or `export default …` (export name `"default"`)
    Local {
        /// The exported name
        export_name: String,
        /// The local binding it reads
        local_name: String,
    },
    /// `export { x as y } from 'm'`
    Indirect {
        /// The exported name
        export_name: String,
        /// The module specifier
        request: String,
        /// The name exported by the target module
        source_name: String,
    },
    /// `export * from 'm'`
    Star {
        /// The module specifier
        request: String,
    },
    /// `export * as ns from 'm'`
    StarNamespace {
        /// The exported name
        export_name: String,
        /// The module specifier
        request: String,
    },
}

impl ExportEntry {
    /// The module specifier this entry requests, if any.
    pub fn request(&self) -> Option<&str> {
        match self {
            ExportEntry::Local { .. } => None,
            ExportEntry::Indirect { request, .. }
            | ExportEntry::Star { request }
            | ExportEntry::StarNamespace { request, .. } => Some(request),
        }
    }

    /// The name this entry exports, if it names one (`export *` does not).
    pub fn export_name(&self) -> Option<&str> {
        match self {
            ExportEntry::Local { export_name, .. }
            | ExportEntry::Indirect { export_name, .. }
            | ExportEntry::StarNamespace { export_name, .. } => Some(export_name),
            ExportEntry::Star { .. } => None,
        }
    }
}

/// A compiled module unit, produced by the external compiler
///
/// The executable payload stays on the engine side; the module system only
/// needs the import/export metadata and keeps the source for the engine to
/// re-request if it wants it.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// The resolved path the unit was compiled at
    pub path: PathBuf,
    /// The format the unit was compiled as
    pub format: ModuleFormat,
    /// The source text
    pub source: Arc<str>,
    /// Import declarations, in source order
    pub imports: Vec<ImportEntry>,
    /// Export declarations, in source order
    pub exports: Vec<ExportEntry>,
}

/// Compiles source text at a resolved path into an executable unit
pub trait ModuleCompiler: Send + Sync {
    /// Compiles `source` as the module at `path`.
    fn compile(&self, source: &str, path: &Path) -> Result<CompiledUnit>;
}

/// Executes compiled units against a module scope
pub trait Interpreter: Send + Sync {
    /// Executes a compiled unit with `scope` as its binding environment.
    fn evaluate(&self, unit: &CompiledUnit, scope: &ModuleScope) -> Result<()>;

    /// Constructs an empty object value (used for interop shims).
    fn new_object(&self) -> Value {
        Value::object()
    }

    /// Constructs an array value (used for interop shims).
    fn new_array(&self, values: Vec<Value>) -> Value {
        Value::array(values)
    }
}
