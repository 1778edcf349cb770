// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shared test harness: an in-memory package tree, a regex-based mock
//! compiler extracting import/export entries, and a scriptable interpreter
//! standing in for the engine.

#![allow(dead_code)]

use parking_lot::Mutex;
use spacey_modules::engine::{CompiledUnit, ExportEntry, ImportEntry, Interpreter, ModuleCompiler};
use spacey_modules::{
    MemoryFileSystem, ModuleFormat, ModuleLoader, ModuleScope, Result, Value,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loader over an in-memory tree, with handles to the pieces tests poke.
pub struct Harness {
    pub fs: Arc<MemoryFileSystem>,
    pub loader: ModuleLoader,
    pub interpreter: Arc<ScriptedInterpreter>,
}

/// Builds a harness from `(path, contents)` fixture files.
pub fn harness(files: &[(&str, &str)]) -> Harness {
    let fs = Arc::new(MemoryFileSystem::new());
    for (path, contents) in files {
        fs.add_file(path, *contents);
    }
    let interpreter = Arc::new(ScriptedInterpreter::new());
    let loader = ModuleLoader::new(
        fs.clone(),
        Arc::new(MockCompiler),
        interpreter.clone(),
    );
    Harness {
        fs,
        loader,
        interpreter,
    }
}

/// Compiler that extracts import/export entries with regexes, the way the
/// engine's real parser would from the AST.
pub struct MockCompiler;

impl ModuleCompiler for MockCompiler {
    fn compile(&self, source: &str, path: &Path) -> Result<CompiledUnit> {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("cjs") => ModuleFormat::CommonJs,
            Some("json") => ModuleFormat::Json,
            _ => ModuleFormat::Module,
        };
        let (imports, exports) = scan_module_syntax(source);
        Ok(CompiledUnit {
            path: path.to_path_buf(),
            format,
            source: source.into(),
            imports,
            exports,
        })
    }
}

fn scan_module_syntax(source: &str) -> (Vec<ImportEntry>, Vec<ExportEntry>) {
    let import_re = regex::Regex::new(
        r#"import\s+(?:([\w$]+)\s*,?\s*)?(?:\{\s*([^}]*)\s*\})?\s*(?:\*\s+as\s+([\w$]+))?\s*from\s+['"]([^'"]+)['"]"#,
    )
    .unwrap();
    let import_side_effect_re = regex::Regex::new(r#"import\s+['"]([^'"]+)['"]"#).unwrap();
    let export_default_re = regex::Regex::new(r"export\s+default\s").unwrap();
    let export_star_as_re =
        regex::Regex::new(r#"export\s+\*\s+as\s+([\w$]+)\s+from\s+['"]([^'"]+)['"]"#).unwrap();
    let export_star_re = regex::Regex::new(r#"export\s+\*\s+from\s+['"]([^'"]+)['"]"#).unwrap();
    let export_named_re = regex::Regex::new(
        r#"export\s+\{\s*([^}]*)\s*\}(?:\s+from\s+['"]([^'"]+)['"])?"#,
    )
    .unwrap();
    let export_decl_re = regex::Regex::new(
        r"export\s+(?:const|let|var|(?:async\s+)?function\*?|class)\s+([\w$]+)",
    )
    .unwrap();

    let mut imports = Vec::new();
    let mut exports = Vec::new();

    for cap in import_re.captures_iter(source) {
        let request = cap[4].to_string();
        if let Some(default) = cap.get(1) {
            imports.push(ImportEntry::Named {
                request: request.clone(),
                source_name: "default".to_string(),
                local_name: default.as_str().to_string(),
            });
        }
        if let Some(named) = cap.get(2) {
            for (source_name, local_name) in parse_clause(named.as_str()) {
                imports.push(ImportEntry::Named {
                    request: request.clone(),
                    source_name,
                    local_name,
                });
            }
        }
        if let Some(ns) = cap.get(3) {
            imports.push(ImportEntry::Namespace {
                request: request.clone(),
                local_name: ns.as_str().to_string(),
            });
        }
    }

    for cap in import_side_effect_re.captures_iter(source) {
        let request = cap[1].to_string();
        if !imports.iter().any(|i| i.request() == request) {
            imports.push(ImportEntry::SideEffect { request });
        }
    }

    if export_default_re.is_match(source) {
        exports.push(ExportEntry::Local {
            export_name: "default".to_string(),
            local_name: "*default*".to_string(),
        });
    }
    for cap in export_star_as_re.captures_iter(source) {
        exports.push(ExportEntry::StarNamespace {
            export_name: cap[1].to_string(),
            request: cap[2].to_string(),
        });
    }
    for cap in export_star_re.captures_iter(source) {
        exports.push(ExportEntry::Star {
            request: cap[1].to_string(),
        });
    }
    for cap in export_named_re.captures_iter(source) {
        let clause = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        match cap.get(2) {
            Some(request) => {
                for (source_name, export_name) in parse_clause(clause) {
                    exports.push(ExportEntry::Indirect {
                        export_name,
                        request: request.as_str().to_string(),
                        source_name,
                    });
                }
            }
            None => {
                for (local_name, export_name) in parse_clause(clause) {
                    exports.push(ExportEntry::Local {
                        export_name,
                        local_name,
                    });
                }
            }
        }
    }
    for cap in export_decl_re.captures_iter(source) {
        let name = cap[1].to_string();
        if !exports
            .iter()
            .any(|e| e.export_name() == Some(name.as_str()))
        {
            exports.push(ExportEntry::Local {
                export_name: name.clone(),
                local_name: name,
            });
        }
    }

    (imports, exports)
}

/// Parses `a, b as c` into `(name, alias-or-name)` pairs.
fn parse_clause(clause: &str) -> Vec<(String, String)> {
    clause
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.split_once(" as ") {
                Some((name, alias)) => {
                    Some((name.trim().to_string(), alias.trim().to_string()))
                }
                None => Some((part.to_string(), part.to_string())),
            }
        })
        .collect()
}

type Script = Arc<dyn Fn(&ModuleScope) -> Result<()> + Send + Sync>;

/// Interpreter whose behavior per module is either a registered closure or
/// a default pass that initializes exported bindings from literal
/// initializers in the source.
pub struct ScriptedInterpreter {
    scripts: Mutex<HashMap<PathBuf, Script>>,
    evaluated: Mutex<Vec<PathBuf>>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            evaluated: Mutex::new(Vec::new()),
        }
    }

    /// Registers a body for the module at `path`.
    pub fn script(
        &self,
        path: impl Into<PathBuf>,
        body: impl Fn(&ModuleScope) -> Result<()> + Send + Sync + 'static,
    ) {
        self.scripts.lock().insert(path.into(), Arc::new(body));
    }

    /// Paths evaluated so far, in execution order.
    pub fn evaluated(&self) -> Vec<PathBuf> {
        self.evaluated.lock().clone()
    }

    fn default_evaluate(&self, unit: &CompiledUnit, scope: &ModuleScope) -> Result<()> {
        let literals = scan_literal_bindings(&unit.source);
        let import_locals: Vec<&str> = unit
            .imports
            .iter()
            .filter_map(|entry| match entry {
                ImportEntry::Named { local_name, .. }
                | ImportEntry::Namespace { local_name, .. } => Some(local_name.as_str()),
                ImportEntry::SideEffect { .. } => None,
            })
            .collect();
        for entry in &unit.exports {
            if let ExportEntry::Local { local_name, .. } = entry {
                // Re-exported imports alias the source module's binding;
                // only this module's own declarations initialize here.
                if import_locals.contains(&local_name.as_str()) {
                    continue;
                }
                let value = literals
                    .get(local_name)
                    .cloned()
                    .unwrap_or(Value::Undefined);
                scope.initialize(local_name, value);
            }
        }
        // CommonJS bodies: apply `exports.name = <literal>` assignments.
        if let Ok(exports) = scope.get("exports") {
            let assign_re =
                regex::Regex::new(r"exports\.([\w$]+)\s*=\s*([^;\n]+)").unwrap();
            for cap in assign_re.captures_iter(&unit.source) {
                if let Some(value) = parse_literal(cap[2].trim()) {
                    exports.set_property(&cap[1], value);
                }
            }
        }
        Ok(())
    }
}

impl Interpreter for ScriptedInterpreter {
    fn evaluate(&self, unit: &CompiledUnit, scope: &ModuleScope) -> Result<()> {
        self.evaluated.lock().push(unit.path.clone());
        // Clone the script out so a body calling back into the loader (and
        // so into evaluate) does not deadlock on the scripts lock.
        let script = self.scripts.lock().get(&unit.path).cloned();
        match script {
            Some(script) => script(scope),
            None => self.default_evaluate(unit, scope),
        }
    }
}

/// `name = <literal>` bindings anywhere in the source, including
/// `export default <literal>` under the `*default*` name.
fn scan_literal_bindings(source: &str) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    let decl_re =
        regex::Regex::new(r"(?:const|let|var)\s+([\w$]+)\s*=\s*([^;\n]+)").unwrap();
    for cap in decl_re.captures_iter(source) {
        if let Some(value) = parse_literal(cap[2].trim()) {
            out.insert(cap[1].to_string(), value);
        }
    }
    let default_re = regex::Regex::new(r"export\s+default\s+([^;\n]+)").unwrap();
    if let Some(cap) = default_re.captures(source) {
        if let Some(value) = parse_literal(cap[1].trim()) {
            out.insert("*default*".to_string(), value);
        }
    }
    out
}

fn parse_literal(text: &str) -> Option<Value> {
    if let Some(stripped) = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|t| t.strip_suffix('"')))
    {
        return Some(Value::String(stripped.to_string()));
    }
    match text {
        "true" => return Some(Value::Boolean(true)),
        "false" => return Some(Value::Boolean(false)),
        "null" => return Some(Value::Null),
        "undefined" => return Some(Value::Undefined),
        _ => {}
    }
    text.parse::<f64>().ok().map(Value::Number)
}
