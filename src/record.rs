// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records and the linking algorithm
//!
//! One [`ModuleRecord`] exists per resolved path, owned by the loader's
//! cache. Its status only moves forward: `Unlinked → Linking → Linked →
//! Evaluating → Evaluated`. Linking walks the import graph depth-first,
//! using the status itself for cycle detection: a module re-encountered
//! while already `Linking` is satisfied for that edge. Every import and
//! export entry is validated before a record reaches `Linked`, so a broken
//! graph fails before any module body executes.

use crate::engine::{CompiledUnit, ExportEntry, ImportEntry};
use crate::error::{LinkError, Result};
use crate::loader::ModuleLoader;
use crate::namespace::ModuleNamespace;
use crate::resolver::ModuleFormat;
use crate::scope::{BindingCell, ModuleScope};
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle of a module record; transitions are forward-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModuleStatus {
    /// Entries known, no bindings resolved
    Unlinked,
    /// Linking in progress (re-entry means a cycle, which is fine)
    Linking,
    /// All entries validated, namespace shape fixed
    Linked,
    /// Body execution started
    Evaluating,
    /// Body execution finished
    Evaluated,
}

impl ModuleStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::Unlinked => "unlinked",
            ModuleStatus::Linking => "linking",
            ModuleStatus::Linked => "linked",
            ModuleStatus::Evaluating => "evaluating",
            ModuleStatus::Evaluated => "evaluated",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The scope name backing an `export * as ns` binding. Not a valid
/// identifier, so it can never collide with a real local.
fn star_binding_name(export_name: &str) -> String {
    format!("*{export_name}*")
}

/// One module's record: entries, status, scope, and resolved exports
pub(crate) struct ModuleRecord {
    path: PathBuf,
    format: ModuleFormat,
    unit: Option<CompiledUnit>,
    imports: Vec<ImportEntry>,
    exports: Vec<ExportEntry>,
    status: RwLock<ModuleStatus>,
    /// Request → resolved path, in first-request order
    requested: RwLock<Vec<(String, PathBuf)>>,
    /// Export name → binding cell, fixed when linking completes
    resolved_exports: RwLock<Vec<(String, Arc<BindingCell>)>>,
    scope: Arc<ModuleScope>,
    namespace: RwLock<Option<Arc<ModuleNamespace>>>,
}

impl ModuleRecord {
    /// Creates an unlinked record from a compiled unit. Cells for local
    /// export bindings are declared here, before any linking, so records in
    /// a cycle can hand out cells while still `Linking`.
    pub(crate) fn new(unit: CompiledUnit) -> Self {
        let scope = Arc::new(ModuleScope::new(unit.path.clone()));
        for entry in &unit.exports {
            match entry {
                ExportEntry::Local { local_name, .. } => {
                    scope.declare(local_name);
                }
                ExportEntry::StarNamespace { export_name, .. } => {
                    scope.declare(&star_binding_name(export_name));
                }
                _ => {}
            }
        }
        Self {
            path: unit.path.clone(),
            format: unit.format,
            imports: unit.imports.clone(),
            exports: unit.exports.clone(),
            unit: Some(unit),
            status: RwLock::new(ModuleStatus::Unlinked),
            requested: RwLock::new(Vec::new()),
            resolved_exports: RwLock::new(Vec::new()),
            scope,
            namespace: RwLock::new(None),
        }
    }

    /// Creates an already-evaluated record with fixed exports (JSON modules
    /// and CommonJS interop shims).
    pub(crate) fn synthetic(
        path: PathBuf,
        format: ModuleFormat,
        exports: Vec<(String, Value)>,
    ) -> Self {
        let scope = Arc::new(ModuleScope::new(path.clone()));
        let resolved = exports
            .into_iter()
            .map(|(name, value)| {
                let cell = scope.declare(&name);
                cell.set(value);
                (name, cell)
            })
            .collect();
        Self {
            path,
            format,
            unit: None,
            imports: Vec::new(),
            exports: Vec::new(),
            status: RwLock::new(ModuleStatus::Evaluated),
            requested: RwLock::new(Vec::new()),
            resolved_exports: RwLock::new(resolved),
            scope,
            namespace: RwLock::new(None),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn format(&self) -> ModuleFormat {
        self.format
    }

    pub(crate) fn unit(&self) -> Option<&CompiledUnit> {
        self.unit.as_ref()
    }

    pub(crate) fn is_synthetic(&self) -> bool {
        self.unit.is_none()
    }

    pub(crate) fn scope(&self) -> &Arc<ModuleScope> {
        &self.scope
    }

    pub(crate) fn import_entries(&self) -> &[ImportEntry] {
        &self.imports
    }

    pub(crate) fn export_entries(&self) -> &[ExportEntry] {
        &self.exports
    }

    pub(crate) fn status(&self) -> ModuleStatus {
        *self.status.read()
    }

    /// Moves the status forward. Backward transitions are a logic error and
    /// are rejected, never applied.
    pub(crate) fn advance(&self, to: ModuleStatus) -> Result<()> {
        let mut status = self.status.write();
        if to < *status {
            return Err(LinkError::InvalidStatusTransition {
                module: self.path.clone(),
                from: status.as_str(),
                to: to.as_str(),
            }
            .into());
        }
        tracing::trace!(module = %self.path.display(), from = %*status, to = %to, "status");
        *status = to;
        Ok(())
    }

    /// Atomically claims the `Unlinked → Linking` transition. Returns false
    /// if another caller (or a cycle back-edge) got there first.
    pub(crate) fn begin_linking(&self) -> bool {
        let mut status = self.status.write();
        if *status == ModuleStatus::Unlinked {
            *status = ModuleStatus::Linking;
            true
        } else {
            false
        }
    }

    /// Atomically claims the `Linked → Evaluating` transition, so a record
    /// is never evaluated twice even under concurrent callers. Returns
    /// false when the record is already evaluating or evaluated; a record
    /// that never linked is an error.
    pub(crate) fn begin_evaluation(&self) -> Result<bool> {
        let mut status = self.status.write();
        match *status {
            ModuleStatus::Evaluating | ModuleStatus::Evaluated => Ok(false),
            ModuleStatus::Linked => {
                *status = ModuleStatus::Evaluating;
                Ok(true)
            }
            other => Err(LinkError::InvalidStatusTransition {
                module: self.path.clone(),
                from: other.as_str(),
                to: ModuleStatus::Evaluating.as_str(),
            }
            .into()),
        }
    }

    /// Distinct specifiers this module requests, in source order.
    pub(crate) fn requests(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let all = self
            .imports
            .iter()
            .map(ImportEntry::request)
            .chain(self.exports.iter().filter_map(ExportEntry::request));
        for request in all {
            if !out.iter().any(|r| r == request) {
                out.push(request.to_string());
            }
        }
        out
    }

    pub(crate) fn add_requested(&self, request: &str, path: PathBuf) {
        let mut requested = self.requested.write();
        if !requested.iter().any(|(r, _)| r == request) {
            requested.push((request.to_string(), path));
        }
    }

    pub(crate) fn requested_edges(&self) -> Vec<(String, PathBuf)> {
        self.requested.read().clone()
    }

    pub(crate) fn set_resolved_exports(&self, exports: Vec<(String, Arc<BindingCell>)>) {
        *self.resolved_exports.write() = exports;
    }

    pub(crate) fn resolved_exports(&self) -> Vec<(String, Arc<BindingCell>)> {
        self.resolved_exports.read().clone()
    }

    fn resolved_export_cell(&self, name: &str) -> Option<Arc<BindingCell>> {
        self.resolved_exports
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, cell)| Arc::clone(cell))
    }

    /// The namespace, if one was created. Creation is first-writer-wins so
    /// concurrent callers converge on one object.
    pub(crate) fn namespace(&self) -> Option<Arc<ModuleNamespace>> {
        self.namespace.read().clone()
    }

    pub(crate) fn install_namespace(&self, ns: Arc<ModuleNamespace>) -> Arc<ModuleNamespace> {
        let mut slot = self.namespace.write();
        match &*slot {
            Some(existing) => Arc::clone(existing),
            None => {
                *slot = Some(Arc::clone(&ns));
                ns
            }
        }
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("status", &self.status())
            .finish()
    }
}

/// How one export name resolved
pub(crate) enum ResolveOutcome {
    /// A concrete binding
    Resolved(ExportResolution),
    /// Two distinct bindings through star re-exports
    Ambiguous,
    /// No binding (includes resolution cycles, which contribute nothing)
    NotFound,
}

/// A resolved export binding: its identity (for ambiguity checks) and cell
pub(crate) struct ExportResolution {
    /// (providing module, Some(local name)) or (module, None) for a
    /// namespace binding
    pub identity: (PathBuf, Option<String>),
    pub cell: Arc<BindingCell>,
}

/// The linking pass over a loader's record graph
pub(crate) struct Linker<'a> {
    pub loader: &'a ModuleLoader,
}

impl Linker<'_> {
    /// Links `record` and everything it transitively imports, then
    /// initializes namespace-valued bindings across the graph.
    pub(crate) fn link_graph(&self, record: &Arc<ModuleRecord>) -> Result<()> {
        self.link(record)?;
        self.initialize_namespace_bindings(record, &mut FxHashSet::default())
    }

    fn link(&self, record: &Arc<ModuleRecord>) -> Result<()> {
        // Linking (a cycle back-edge) and anything beyond are satisfied.
        if !record.begin_linking() {
            return Ok(());
        }
        tracing::debug!(module = %record.path().display(), "linking");

        // Load every dependency before linking any of them, so records in a
        // cycle can resolve exports through this one while it is mid-link.
        let mut children = Vec::new();
        for request in record.requests() {
            children.push(self.loader.load_dependency(record, &request)?);
        }
        for child in &children {
            self.link(child)?;
        }

        self.wire_imports(record)?;
        self.resolve_exports(record)?;
        record.advance(ModuleStatus::Linked)
    }

    /// Validates every import entry and aliases named imports to the
    /// exporting module's cells.
    fn wire_imports(&self, record: &Arc<ModuleRecord>) -> Result<()> {
        for entry in record.import_entries() {
            match entry {
                ImportEntry::Named {
                    request,
                    source_name,
                    local_name,
                } => {
                    let target = self.loader.load_dependency(record, request)?;
                    let mut visited = FxHashSet::default();
                    match self.resolve_export(&target, source_name, &mut visited)? {
                        ResolveOutcome::Resolved(resolution) => {
                            record.scope().alias(local_name, resolution.cell);
                        }
                        ResolveOutcome::Ambiguous => {
                            return Err(LinkError::AmbiguousExport {
                                module: target.path().to_path_buf(),
                                name: source_name.clone(),
                            }
                            .into());
                        }
                        ResolveOutcome::NotFound => {
                            return Err(LinkError::UnresolvedImport {
                                module: target.path().to_path_buf(),
                                name: source_name.clone(),
                                requester: record.path().to_path_buf(),
                            }
                            .into());
                        }
                    }
                }
                ImportEntry::Namespace { local_name, .. } => {
                    // The cell is filled with the namespace object once the
                    // whole graph is linked.
                    record.scope().declare(local_name);
                }
                ImportEntry::SideEffect { .. } => {}
            }
        }
        Ok(())
    }

    /// Resolves every exported name and fixes the record's export map.
    fn resolve_exports(&self, record: &Arc<ModuleRecord>) -> Result<()> {
        if record.is_synthetic() {
            return Ok(());
        }
        let names = self.exported_names(record, &mut FxHashSet::default())?;
        let explicit: FxHashSet<&str> = record
            .export_entries()
            .iter()
            .filter_map(ExportEntry::export_name)
            .collect();

        let mut resolved = Vec::new();
        for name in &names {
            let mut visited = FxHashSet::default();
            match self.resolve_export(record, name, &mut visited)? {
                ResolveOutcome::Resolved(resolution) => {
                    resolved.push((name.clone(), resolution.cell));
                }
                ResolveOutcome::Ambiguous => {
                    return Err(LinkError::AmbiguousExport {
                        module: record.path().to_path_buf(),
                        name: name.clone(),
                    }
                    .into());
                }
                ResolveOutcome::NotFound => {
                    if explicit.contains(name.as_str()) {
                        return Err(self.unresolved_export_error(record, name)?);
                    }
                    // A star-provided name shadowed by a resolution cycle
                    // contributes no binding.
                }
            }
        }
        record.set_resolved_exports(resolved);
        Ok(())
    }

    /// All names this module exports, following star re-exports. `default`
    /// never flows through a star.
    fn exported_names(
        &self,
        record: &Arc<ModuleRecord>,
        visited: &mut FxHashSet<PathBuf>,
    ) -> Result<Vec<String>> {
        if !visited.insert(record.path().to_path_buf()) {
            return Ok(Vec::new());
        }
        if record.is_synthetic() {
            return Ok(record
                .resolved_exports()
                .into_iter()
                .map(|(name, _)| name)
                .collect());
        }
        let mut names: Vec<String> = Vec::new();
        for entry in record.export_entries() {
            if let Some(name) = entry.export_name() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        for entry in record.export_entries() {
            if let ExportEntry::Star { request } = entry {
                let target = self.loader.load_dependency(record, request)?;
                for name in self.exported_names(&target, visited)? {
                    if name != "default" && !names.iter().any(|n| n == &name) {
                        names.push(name);
                    }
                }
            }
        }
        Ok(names)
    }

    /// ResolveExport: local bindings directly, indirect exports through the
    /// target module, star exports by collecting candidates and rejecting
    /// distinct duplicates. A (module, name) pair already in `visited`
    /// signals a resolution cycle and resolves to nothing.
    pub(crate) fn resolve_export(
        &self,
        record: &Arc<ModuleRecord>,
        name: &str,
        visited: &mut FxHashSet<(PathBuf, String)>,
    ) -> Result<ResolveOutcome> {
        if !visited.insert((record.path().to_path_buf(), name.to_string())) {
            return Ok(ResolveOutcome::NotFound);
        }

        if record.is_synthetic() {
            return Ok(match record.resolved_export_cell(name) {
                Some(cell) => ResolveOutcome::Resolved(ExportResolution {
                    identity: (record.path().to_path_buf(), Some(name.to_string())),
                    cell,
                }),
                None => ResolveOutcome::NotFound,
            });
        }

        for entry in record.export_entries() {
            match entry {
                ExportEntry::Local {
                    export_name,
                    local_name,
                } if export_name == name => {
                    // A re-exported import forwards to its source binding.
                    if let Some(import) = record
                        .import_entries()
                        .iter()
                        .find(|i| matches!(i, ImportEntry::Named { local_name: l, .. } | ImportEntry::Namespace { local_name: l, .. } if l == local_name))
                    {
                        match import {
                            ImportEntry::Named {
                                request,
                                source_name,
                                ..
                            } => {
                                let target = self.loader.load_dependency(record, request)?;
                                return self.resolve_export(&target, source_name, visited);
                            }
                            ImportEntry::Namespace { request, .. } => {
                                let target = self.loader.load_dependency(record, request)?;
                                return Ok(ResolveOutcome::Resolved(ExportResolution {
                                    identity: (target.path().to_path_buf(), None),
                                    cell: record.scope().declare(local_name),
                                }));
                            }
                            ImportEntry::SideEffect { .. } => {}
                        }
                    }
                    return Ok(ResolveOutcome::Resolved(ExportResolution {
                        identity: (record.path().to_path_buf(), Some(local_name.clone())),
                        cell: record.scope().declare(local_name),
                    }));
                }
                ExportEntry::Indirect {
                    export_name,
                    request,
                    source_name,
                } if export_name == name => {
                    let target = self.loader.load_dependency(record, request)?;
                    return self.resolve_export(&target, source_name, visited);
                }
                ExportEntry::StarNamespace {
                    export_name,
                    request,
                } if export_name == name => {
                    let target = self.loader.load_dependency(record, request)?;
                    return Ok(ResolveOutcome::Resolved(ExportResolution {
                        identity: (target.path().to_path_buf(), None),
                        cell: record.scope().declare(&star_binding_name(export_name)),
                    }));
                }
                _ => {}
            }
        }

        if name == "default" {
            return Ok(ResolveOutcome::NotFound);
        }

        let mut found: Option<ExportResolution> = None;
        for entry in record.export_entries() {
            if let ExportEntry::Star { request } = entry {
                let target = self.loader.load_dependency(record, request)?;
                match self.resolve_export(&target, name, visited)? {
                    ResolveOutcome::Resolved(resolution) => match &found {
                        Some(existing) if existing.identity != resolution.identity => {
                            return Ok(ResolveOutcome::Ambiguous);
                        }
                        Some(_) => {}
                        None => found = Some(resolution),
                    },
                    ResolveOutcome::Ambiguous => return Ok(ResolveOutcome::Ambiguous),
                    ResolveOutcome::NotFound => {}
                }
            }
        }
        Ok(match found {
            Some(resolution) => ResolveOutcome::Resolved(resolution),
            None => ResolveOutcome::NotFound,
        })
    }

    /// Fills namespace-valued cells (`import * as ns`, `export * as ns`)
    /// once every record in the graph is linked.
    fn initialize_namespace_bindings(
        &self,
        record: &Arc<ModuleRecord>,
        seen: &mut FxHashSet<PathBuf>,
    ) -> Result<()> {
        if !seen.insert(record.path().to_path_buf()) {
            return Ok(());
        }
        for (_, child_path) in record.requested_edges() {
            if let Some(child) = self.loader.lookup_record(&child_path) {
                self.initialize_namespace_bindings(&child, seen)?;
            }
        }
        for entry in record.export_entries() {
            if let ExportEntry::StarNamespace {
                export_name,
                request,
            } = entry
            {
                let cell = record.scope().declare(&star_binding_name(export_name));
                if !cell.is_initialized() {
                    let target = self.loader.load_dependency(record, request)?;
                    let ns = self.loader.namespace_of(&target)?;
                    cell.set(Value::Namespace(ns));
                }
            }
        }
        for entry in record.import_entries() {
            if let ImportEntry::Namespace {
                request,
                local_name,
            } = entry
            {
                let cell = record.scope().declare(local_name);
                if !cell.is_initialized() {
                    let target = self.loader.load_dependency(record, request)?;
                    let ns = self.loader.namespace_of(&target)?;
                    cell.set(Value::Namespace(ns));
                }
            }
        }
        Ok(())
    }

    /// Builds the link error for an explicitly exported name that did not
    /// resolve, attributing it to the module expected to provide it.
    fn unresolved_export_error(
        &self,
        record: &Arc<ModuleRecord>,
        name: &str,
    ) -> Result<crate::error::ModuleError> {
        for entry in record.export_entries() {
            match entry {
                ExportEntry::Indirect {
                    export_name,
                    request,
                    source_name,
                } if export_name == name => {
                    let target = self.loader.load_dependency(record, request)?;
                    return Ok(LinkError::UnresolvedImport {
                        module: target.path().to_path_buf(),
                        name: source_name.clone(),
                        requester: record.path().to_path_buf(),
                    }
                    .into());
                }
                ExportEntry::Local {
                    export_name,
                    local_name,
                } if export_name == name => {
                    // The local is a failed re-export of an import.
                    if let Some(ImportEntry::Named {
                        request,
                        source_name,
                        ..
                    }) = record.import_entries().iter().find(|i| {
                        matches!(i, ImportEntry::Named { local_name: l, .. } if l == local_name)
                    }) {
                        let target = self.loader.load_dependency(record, request)?;
                        return Ok(LinkError::UnresolvedImport {
                            module: target.path().to_path_buf(),
                            name: source_name.clone(),
                            requester: record.path().to_path_buf(),
                        }
                        .into());
                    }
                }
                _ => {}
            }
        }
        Ok(LinkError::UnresolvedImport {
            module: record.path().to_path_buf(),
            name: name.to_string(),
            requester: record.path().to_path_buf(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        let record = ModuleRecord::synthetic(
            PathBuf::from("/app/data.json"),
            ModuleFormat::Json,
            vec![("default".to_string(), Value::Null)],
        );
        assert_eq!(record.status(), ModuleStatus::Evaluated);
        assert!(record.advance(ModuleStatus::Evaluated).is_ok());
        assert!(record.advance(ModuleStatus::Linking).is_err());
        assert_eq!(record.status(), ModuleStatus::Evaluated);
    }

    #[test]
    fn test_status_ordering() {
        assert!(ModuleStatus::Unlinked < ModuleStatus::Linking);
        assert!(ModuleStatus::Linking < ModuleStatus::Linked);
        assert!(ModuleStatus::Linked < ModuleStatus::Evaluating);
        assert!(ModuleStatus::Evaluating < ModuleStatus::Evaluated);
    }

    #[test]
    fn test_requested_edges_dedup_by_request() {
        let record = ModuleRecord::synthetic(
            PathBuf::from("/app/a.mjs"),
            ModuleFormat::Module,
            Vec::new(),
        );
        record.add_requested("./b", PathBuf::from("/app/b.mjs"));
        record.add_requested("./b", PathBuf::from("/app/b.mjs"));
        assert_eq!(record.requested_edges().len(), 1);
    }

    #[test]
    fn test_synthetic_exports_are_initialized() {
        let record = ModuleRecord::synthetic(
            PathBuf::from("/app/data.json"),
            ModuleFormat::Json,
            vec![("default".to_string(), Value::Number(5.0))],
        );
        let exports = record.resolved_exports();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].1.get(), Some(Value::Number(5.0)));
    }
}
