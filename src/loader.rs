// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module loader - orchestrates resolution, compilation, and caching
//!
//! The loader owns two independent caches keyed by resolved absolute path:
//! ECMAScript module records, and already-executed CommonJS exports values.
//! Both are concurrent maps with first-writer-wins insertion, so parallel
//! loads of the same path converge on one unit. The CommonJS cache is
//! pre-populated with the still-empty exports object before a module body
//! runs: a circular `require` observes whatever the module had assigned by
//! the time the cycle closed, instead of recursing or failing.

use crate::engine::{Interpreter, ModuleCompiler};
use crate::error::{LinkError, LoadError, Result};
use crate::fs::FileSystem;
use crate::json;
use crate::namespace::ModuleNamespace;
use crate::record::{Linker, ModuleRecord, ModuleStatus};
use crate::resolver::{Conditions, ModuleFormat, ModuleResolver, ResolvedModule};
use crate::scope::ModuleScope;
use crate::value::Value;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unicode_xid::UnicodeXID;

/// Per-module metadata exposed to `import.meta`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMeta {
    /// The `file://` URL of the module
    pub url: String,
    /// The filename of the module
    pub filename: String,
    /// The directory of the module
    pub dirname: String,
    /// Whether this is the main module
    pub main: bool,
}

struct LoaderInner {
    fs: Arc<dyn FileSystem>,
    resolver: ModuleResolver,
    compiler: Arc<dyn ModuleCompiler>,
    interpreter: Arc<dyn Interpreter>,
    /// ECMAScript module records by resolved path
    records: DashMap<PathBuf, Arc<ModuleRecord>>,
    /// CommonJS exports values by resolved path
    cjs_exports: DashMap<PathBuf, Value>,
    main_module: RwLock<Option<PathBuf>>,
}

/// Module loader
///
/// Cheap to clone; clones share the caches. The loader is the only owner of
/// module records; callers get namespaces, values, and resolved paths.
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<LoaderInner>,
}

impl ModuleLoader {
    /// Creates a loader with the default condition sets.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        compiler: Arc<dyn ModuleCompiler>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        Self::with_conditions(fs, compiler, interpreter, Conditions::esm(), Conditions::cjs())
    }

    /// Creates a loader with custom condition sets for conditional
    /// `exports`/`imports` matching.
    pub fn with_conditions(
        fs: Arc<dyn FileSystem>,
        compiler: Arc<dyn ModuleCompiler>,
        interpreter: Arc<dyn Interpreter>,
        esm_conditions: Conditions,
        cjs_conditions: Conditions,
    ) -> Self {
        let resolver =
            ModuleResolver::with_conditions(Arc::clone(&fs), esm_conditions, cjs_conditions);
        Self {
            inner: Arc::new(LoaderInner {
                fs,
                resolver,
                compiler,
                interpreter,
                records: DashMap::new(),
                cjs_exports: DashMap::new(),
                main_module: RwLock::new(None),
            }),
        }
    }

    /// The resolver this loader uses.
    pub fn resolver(&self) -> &ModuleResolver {
        &self.inner.resolver
    }

    /// Imports a module graph: resolve, load, link, evaluate, and return
    /// the module's namespace.
    pub fn import(&self, specifier: &str, referrer: &Path) -> Result<Arc<ModuleNamespace>> {
        let resolved = self.inner.resolver.resolve_esm(specifier, referrer)?;
        let record = self.load_record(&resolved)?;
        Linker { loader: self }.link_graph(&record)?;
        self.evaluate_record(&record)?;
        self.namespace_of(&record)
    }

    /// Loads a program entry point by path, marking it as the main module.
    /// CommonJS entries go through the interop shim, so the caller always
    /// gets a namespace back.
    pub fn load_main(&self, path: &Path) -> Result<Arc<ModuleNamespace>> {
        let resolved = self.inner.resolver.resolve_entry(path)?;
        *self.inner.main_module.write() = Some(resolved.path.clone());
        let record = self.load_record(&resolved)?;
        Linker { loader: self }.link_graph(&record)?;
        self.evaluate_record(&record)?;
        self.namespace_of(&record)
    }

    /// CommonJS `require`: resolve, execute if needed, return the exports
    /// value.
    pub fn require(&self, specifier: &str, referrer: &Path) -> Result<Value> {
        let resolved = self.inner.resolver.resolve_cjs(specifier, referrer)?;
        self.load_cjs_exports(&resolved)
    }

    /// `require.resolve`: the resolved path without loading anything.
    pub fn resolve_require(&self, specifier: &str, referrer: &Path) -> Result<ResolvedModule> {
        self.inner.resolver.resolve_cjs(specifier, referrer)
    }

    /// Import-style resolution without loading anything.
    pub fn resolve_import(&self, specifier: &str, referrer: &Path) -> Result<ResolvedModule> {
        self.inner.resolver.resolve_esm(specifier, referrer)
    }

    /// Marks `path` as the main module.
    pub fn set_main_module(&self, path: PathBuf) {
        *self.inner.main_module.write() = Some(path);
    }

    /// Whether `path` is the main module.
    pub fn is_main_module(&self, path: &Path) -> bool {
        self.inner
            .main_module
            .read()
            .as_deref()
            .map(|main| main == path)
            .unwrap_or(false)
    }

    /// `import.meta` fields for a module path.
    pub fn module_meta(&self, path: &Path) -> ModuleMeta {
        ModuleMeta {
            url: format!("file://{}", path.display()),
            filename: path.display().to_string(),
            dirname: path
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            main: self.is_main_module(path),
        }
    }

    /// Paths present in either cache.
    pub fn cached_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .inner
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for entry in self.inner.cjs_exports.iter() {
            if !paths.contains(entry.key()) {
                paths.push(entry.key().clone());
            }
        }
        paths
    }

    /// Whether a resolved path is cached in either cache.
    pub fn is_cached(&self, path: &Path) -> bool {
        self.inner.records.contains_key(path) || self.inner.cjs_exports.contains_key(path)
    }

    /// Drops both caches.
    pub fn clear_caches(&self) {
        self.inner.records.clear();
        self.inner.cjs_exports.clear();
    }

    /// The lifecycle status of a cached module record, if any.
    pub fn status_of(&self, path: &Path) -> Option<ModuleStatus> {
        self.inner.records.get(path).map(|record| record.status())
    }

    pub(crate) fn lookup_record(&self, path: &Path) -> Option<Arc<ModuleRecord>> {
        self.inner.records.get(path).map(|entry| Arc::clone(&entry))
    }

    /// Loads the record for a dependency request, recording the edge on the
    /// referrer. Resolution is import-style: this is the linker's path.
    pub(crate) fn load_dependency(
        &self,
        referrer: &ModuleRecord,
        request: &str,
    ) -> Result<Arc<ModuleRecord>> {
        if let Some((_, path)) = referrer
            .requested_edges()
            .into_iter()
            .find(|(r, _)| r == request)
        {
            if let Some(record) = self.lookup_record(&path) {
                return Ok(record);
            }
        }
        let resolved = self.inner.resolver.resolve_esm(request, referrer.path())?;
        let record = self.load_record(&resolved)?;
        referrer.add_requested(request, record.path().to_path_buf());
        Ok(record)
    }

    /// Fetches or creates the record for a resolved module. The same
    /// resolved path always yields the same record object; a lost insertion
    /// race discards the duplicate in favor of the first writer.
    pub(crate) fn load_record(&self, resolved: &ResolvedModule) -> Result<Arc<ModuleRecord>> {
        if let Some(record) = self.lookup_record(&resolved.path) {
            return Ok(record);
        }
        tracing::debug!(path = %resolved.path.display(), format = ?resolved.format, "loading module");
        let record = Arc::new(match resolved.format {
            ModuleFormat::Json => self.build_json_record(&resolved.path)?,
            ModuleFormat::CommonJs => self.build_interop_record(&resolved.path)?,
            ModuleFormat::Module => {
                let source = self.read_source(&resolved.path)?;
                let unit = self.inner.compiler.compile(&source, &resolved.path)?;
                ModuleRecord::new(unit)
            }
        });
        Ok(match self.inner.records.entry(resolved.path.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&record));
                record
            }
        })
    }

    /// A `.json` module: its parsed contents become the default export of a
    /// synthetic, already-evaluated record.
    fn build_json_record(&self, path: &Path) -> Result<ModuleRecord> {
        let value = self.read_json_value(path)?;
        Ok(ModuleRecord::synthetic(
            path.to_path_buf(),
            ModuleFormat::Json,
            vec![("default".to_string(), value)],
        ))
    }

    /// An import that landed on a CommonJS file: execute it eagerly through
    /// the CommonJS path and wrap its exports in a synthetic module. The
    /// exports value is the default export; enumerable, identifier-safe,
    /// non-`default` own properties are re-exported as named bindings.
    fn build_interop_record(&self, path: &Path) -> Result<ModuleRecord> {
        let exports_value = self.execute_cjs(path)?;
        let mut exports = vec![("default".to_string(), exports_value.clone())];
        for key in exports_value.own_keys() {
            if key != "default" && is_identifier_export_name(&key) {
                if let Some(value) = exports_value.get_property(&key) {
                    exports.push((key, value));
                }
            }
        }
        tracing::debug!(path = %path.display(), names = exports.len(), "commonjs interop shim");
        Ok(ModuleRecord::synthetic(
            path.to_path_buf(),
            ModuleFormat::CommonJs,
            exports,
        ))
    }

    /// CommonJS loading by resolved module, used by `require` directly.
    fn load_cjs_exports(&self, resolved: &ResolvedModule) -> Result<Value> {
        match resolved.format {
            // JSON is parsed and returned whole: no module wrapper, no
            // partially-executed state to cache.
            ModuleFormat::Json => {
                if let Some(cached) = self.inner.cjs_exports.get(&resolved.path) {
                    return Ok(cached.clone());
                }
                let value = self.read_json_value(&resolved.path)?;
                self.inner
                    .cjs_exports
                    .insert(resolved.path.clone(), value.clone());
                Ok(value)
            }
            ModuleFormat::Module => Err(LoadError::RequireEsModule {
                path: resolved.path.clone(),
            }
            .into()),
            ModuleFormat::CommonJs => self.execute_cjs(&resolved.path),
        }
    }

    /// Executes a CommonJS module body, honoring the circular-require
    /// contract: the cache is pre-populated with the empty exports object
    /// before execution, and overwritten with the final `module.exports`
    /// (which may have been reassigned wholesale) afterwards.
    fn execute_cjs(&self, path: &Path) -> Result<Value> {
        if let Some(cached) = self.inner.cjs_exports.get(path) {
            return Ok(cached.clone());
        }

        let source = self.read_source(path)?;
        let unit = self.inner.compiler.compile(&source, path)?;

        let exports = self.inner.interpreter.new_object();
        let module_object = self.inner.interpreter.new_object();
        module_object.set_property("id", Value::String(path.display().to_string()));
        module_object.set_property("filename", Value::String(path.display().to_string()));
        module_object.set_property("loaded", Value::Boolean(false));
        module_object.set_property("exports", exports.clone());

        // Pre-populate so a reentrant require of this path during execution
        // observes the partial exports object instead of reloading.
        match self.inner.cjs_exports.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(exports.clone());
            }
        }

        let scope = ModuleScope::new(path.to_path_buf());
        scope.initialize("exports", exports);
        scope.initialize("module", module_object.clone());
        scope.initialize("__filename", Value::String(path.display().to_string()));
        scope.initialize(
            "__dirname",
            Value::String(
                path.parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        );
        // `require` resolves relative to this file's own directory.
        let loader = self.clone();
        let referrer = path.to_path_buf();
        scope.set_host_require(Arc::new(move |specifier| {
            loader.require(specifier, &referrer)
        }));

        tracing::debug!(path = %path.display(), "executing commonjs module");
        if let Err(err) = self.inner.interpreter.evaluate(&unit, &scope) {
            // A failed module must be loadable again.
            self.inner.cjs_exports.remove(path);
            return Err(err);
        }

        // The body may have reassigned module.exports wholesale.
        let final_exports = module_object
            .get_property("exports")
            .unwrap_or(Value::Undefined);
        module_object.set_property("loaded", Value::Boolean(true));
        self.inner
            .cjs_exports
            .insert(path.to_path_buf(), final_exports.clone());
        Ok(final_exports)
    }

    /// Runs module bodies post-order over the linked graph, deepest first.
    /// An already-`Evaluating` record (a cycle) or an `Evaluated` one is
    /// never run again.
    pub(crate) fn evaluate_record(&self, record: &Arc<ModuleRecord>) -> Result<()> {
        if !record.begin_evaluation()? {
            return Ok(());
        }
        for (_, child_path) in record.requested_edges() {
            if let Some(child) = self.lookup_record(&child_path) {
                self.evaluate_record(&child)?;
            }
        }
        if let Some(unit) = record.unit() {
            tracing::debug!(module = %record.path().display(), "evaluating");
            self.inner.interpreter.evaluate(unit, record.scope())?;
        }
        record.advance(ModuleStatus::Evaluated)
    }

    /// The namespace of a linked record, created once on first request.
    pub(crate) fn namespace_of(&self, record: &Arc<ModuleRecord>) -> Result<Arc<ModuleNamespace>> {
        if let Some(ns) = record.namespace() {
            return Ok(ns);
        }
        if record.status() < ModuleStatus::Linked {
            return Err(LinkError::InvalidStatusTransition {
                module: record.path().to_path_buf(),
                from: record.status().as_str(),
                to: ModuleStatus::Linked.as_str(),
            }
            .into());
        }
        let ns = Arc::new(ModuleNamespace::new(
            record.path().to_path_buf(),
            record.resolved_exports(),
        ));
        Ok(record.install_namespace(ns))
    }

    fn read_source(&self, path: &Path) -> Result<String> {
        self.inner
            .fs
            .read_to_string(path)
            .map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
            .into())
    }

    fn read_json_value(&self, path: &Path) -> Result<Value> {
        let text = self.read_source(path)?;
        let parsed = json::parse(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Value::from_json(&parsed))
    }
}

/// Words that cannot be written as static export binding names.
const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Whether a CommonJS property name can be re-exported as a static named
/// binding: a valid identifier that is not a reserved word.
fn is_identifier_export_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_xid_start() || first == '_' || first == '$') {
        return false;
    }
    if !chars.all(|c| c.is_xid_continue() || c == '$') {
        return false;
    }
    !RESERVED_WORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_export_names() {
        assert!(is_identifier_export_name("foo"));
        assert!(is_identifier_export_name("_private"));
        assert!(is_identifier_export_name("$jquery"));
        assert!(is_identifier_export_name("café"));
        assert!(is_identifier_export_name("v2"));

        assert!(!is_identifier_export_name(""));
        assert!(!is_identifier_export_name("2fast"));
        assert!(!is_identifier_export_name("has-dash"));
        assert!(!is_identifier_export_name("has space"));
        assert!(!is_identifier_export_name("class"));
        assert!(!is_identifier_export_name("default"));
    }

    #[test]
    fn test_module_meta() {
        let loader = ModuleLoader::new(
            Arc::new(crate::fs::MemoryFileSystem::new()),
            Arc::new(PanickingCompiler),
            Arc::new(NoopInterpreter),
        );
        loader.set_main_module(PathBuf::from("/home/user/project/main.js"));

        let meta = loader.module_meta(Path::new("/home/user/project/main.js"));
        assert_eq!(meta.url, "file:///home/user/project/main.js");
        assert_eq!(meta.dirname, "/home/user/project");
        assert_eq!(meta.filename, "/home/user/project/main.js");
        assert!(meta.main);

        let other = loader.module_meta(Path::new("/home/user/project/dep.js"));
        assert!(!other.main);
    }

    struct PanickingCompiler;
    impl crate::engine::ModuleCompiler for PanickingCompiler {
        fn compile(&self, _: &str, path: &Path) -> Result<crate::engine::CompiledUnit> {
            panic!("unexpected compile of {}", path.display());
        }
    }

    struct NoopInterpreter;
    impl Interpreter for NoopInterpreter {
        fn evaluate(&self, _: &crate::engine::CompiledUnit, _: &ModuleScope) -> Result<()> {
            Ok(())
        }
    }
}
