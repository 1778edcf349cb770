// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! CommonJS loading, caches, and the import/require interop shim

mod common;

use common::harness;
use spacey_modules::{LoadError, ModuleError, Value};
use std::path::{Path, PathBuf};

#[test]
fn test_circular_require_sees_partial_exports() {
    let h = harness(&[
        ("/app/main.js", ""),
        ("/app/a.js", ""),
        ("/app/b.js", ""),
    ]);
    h.interpreter.script("/app/a.js", |scope| {
        let exports = scope.get("exports")?;
        exports.set_property("before", Value::Number(1.0));
        scope.require("./b.js")?;
        exports.set_property("after", Value::Number(2.0));
        Ok(())
    });
    h.interpreter.script("/app/b.js", |scope| {
        // The cycle closes here: a's exports object is whatever it had
        // assigned before requiring b. Never an error, never a re-run.
        let a = scope.require("./a.js")?;
        assert_eq!(a.get_property("before"), Some(Value::Number(1.0)));
        assert_eq!(a.get_property("after"), None);
        Ok(())
    });

    let exports = h.loader.require("./a.js", Path::new("/app/main.js")).unwrap();
    assert_eq!(exports.get_property("before"), Some(Value::Number(1.0)));
    assert_eq!(exports.get_property("after"), Some(Value::Number(2.0)));

    let a_runs = h
        .interpreter
        .evaluated()
        .iter()
        .filter(|p| p.ends_with("a.js"))
        .count();
    assert_eq!(a_runs, 1);
}

#[test]
fn test_require_returns_cached_object_identity() {
    let h = harness(&[("/app/main.js", ""), ("/app/dep.js", "exports.x = 1;")]);

    let first = h.loader.require("./dep.js", Path::new("/app/main.js")).unwrap();
    let second = h.loader.require("./dep.js", Path::new("/app/main.js")).unwrap();
    // Same object, not an equal copy.
    assert_eq!(first, second);

    let runs = h.interpreter.evaluated().len();
    assert_eq!(runs, 1);
}

#[test]
fn test_require_json_returns_parsed_value() {
    let h = harness(&[
        ("/app/main.js", ""),
        ("/app/data.json", r#"{"name": "fixture", "count": 3}"#),
    ]);

    let value = h.loader.require("./data.json", Path::new("/app/main.js")).unwrap();
    assert_eq!(value.get_property("name"), Some(Value::String("fixture".to_string())));
    assert_eq!(value.get_property("count"), Some(Value::Number(3.0)));
    // No module wrapper ran.
    assert!(h.interpreter.evaluated().is_empty());
}

#[test]
fn test_require_of_es_module_is_an_error() {
    let h = harness(&[("/app/main.js", ""), ("/app/esm.mjs", "export const x = 1;")]);

    let err = h.loader.require("./esm.mjs", Path::new("/app/main.js")).unwrap_err();
    assert!(matches!(
        err,
        ModuleError::Load(LoadError::RequireEsModule { .. })
    ));
}

#[test]
fn test_module_exports_reassignment_wins() {
    let h = harness(&[("/app/main.js", ""), ("/app/dep.js", "")]);
    h.interpreter.script("/app/dep.js", |scope| {
        let module = scope.get("module")?;
        module.set_property("exports", Value::String("replaced".to_string()));
        Ok(())
    });

    let value = h.loader.require("./dep.js", Path::new("/app/main.js")).unwrap();
    assert_eq!(value, Value::String("replaced".to_string()));
}

#[test]
fn test_cjs_scope_carries_path_metadata() {
    let h = harness(&[("/app/main.js", ""), ("/app/src/dep.js", "")]);
    h.interpreter.script("/app/src/dep.js", |scope| {
        assert_eq!(
            scope.get("__filename")?,
            Value::String("/app/src/dep.js".to_string())
        );
        assert_eq!(scope.get("__dirname")?, Value::String("/app/src".to_string()));
        let module = scope.get("module")?;
        assert_eq!(
            module.get_property("id"),
            Some(Value::String("/app/src/dep.js".to_string()))
        );
        Ok(())
    });

    h.loader.require("./src/dep.js", Path::new("/app/main.js")).unwrap();
}

#[test]
fn test_require_is_bound_to_own_directory() {
    let h = harness(&[
        ("/app/main.js", ""),
        ("/app/nested/dep.js", ""),
        ("/app/nested/sibling.js", "exports.here = true;"),
    ]);
    h.interpreter.script("/app/nested/dep.js", |scope| {
        // Relative to /app/nested, not to the requiring main module.
        let sibling = scope.require("./sibling.js")?;
        assert_eq!(sibling.get_property("here"), Some(Value::Boolean(true)));
        Ok(())
    });

    h.loader.require("./nested/dep.js", Path::new("/app/main.js")).unwrap();
}

#[test]
fn test_failed_module_is_not_cached() {
    let h = harness(&[("/app/main.js", ""), ("/app/flaky.js", "")]);
    h.interpreter.script("/app/flaky.js", |_scope| {
        Err(LoadError::Compile {
            path: PathBuf::from("/app/flaky.js"),
            message: "boom".to_string(),
        }
        .into())
    });

    assert!(h.loader.require("./flaky.js", Path::new("/app/main.js")).is_err());
    assert!(!h.loader.is_cached(Path::new("/app/flaky.js")));

    // A later require retries instead of serving the failed entry.
    h.interpreter.script("/app/flaky.js", |scope| {
        scope.get("exports")?.set_property("ok", Value::Boolean(true));
        Ok(())
    });
    let value = h.loader.require("./flaky.js", Path::new("/app/main.js")).unwrap();
    assert_eq!(value.get_property("ok"), Some(Value::Boolean(true)));
}

#[test]
fn test_interop_shim_exposes_default_and_named() {
    let h = harness(&[
        ("/app/main.mjs", "import { named } from './lib.cjs'; export { named };"),
        ("/app/lib.cjs", ""),
    ]);
    h.interpreter.script("/app/lib.cjs", |scope| {
        let exports = scope.get("exports")?;
        exports.set_property("named", Value::Number(42.0));
        exports.set_property("class", Value::Number(1.0));
        exports.set_property("not-an-identifier", Value::Number(2.0));
        exports.set_property("default", Value::Number(3.0));
        Ok(())
    });

    let ns = h.loader.import("./lib.cjs", Path::new("/app/main.mjs")).unwrap();

    // The whole exports object is the default export.
    let default = ns.get("default").unwrap();
    assert_eq!(default.get_property("named"), Some(Value::Number(42.0)));

    // Identifier-safe, non-"default" properties become named bindings.
    assert_eq!(ns.get("named").unwrap(), Value::Number(42.0));
    assert!(!ns.has("class"));
    assert!(!ns.has("not-an-identifier"));

    // Importing through another module links against the shim's bindings.
    let main = h.loader.import("./main.mjs", Path::new("/app/entry.mjs")).unwrap();
    assert_eq!(main.get("named").unwrap(), Value::Number(42.0));
}

#[test]
fn test_interop_executes_commonjs_once() {
    let h = harness(&[
        ("/app/a.mjs", "import './lib.cjs'; export const a = 1;"),
        ("/app/main.js", ""),
        ("/app/lib.cjs", "exports.x = 1;"),
    ]);

    h.loader.import("./a.mjs", Path::new("/app/entry.mjs")).unwrap();
    let value = h.loader.require("./lib.cjs", Path::new("/app/main.js")).unwrap();

    // The import-side shim and require share one execution and one cache.
    assert_eq!(value.get_property("x"), Some(Value::Number(1.0)));
    let runs = h
        .interpreter
        .evaluated()
        .iter()
        .filter(|p| p.ends_with("lib.cjs"))
        .count();
    assert_eq!(runs, 1);
}

#[test]
fn test_load_main_with_commonjs_entry() {
    let h = harness(&[("/app/cli.js", "exports.started = true;")]);

    let ns = h.loader.load_main(Path::new("/app/cli.js")).unwrap();
    let default = ns.get("default").unwrap();
    assert_eq!(default.get_property("started"), Some(Value::Boolean(true)));
    assert!(h.loader.is_main_module(Path::new("/app/cli.js")));
}

#[test]
fn test_cache_introspection() {
    let h = harness(&[
        ("/app/main.mjs", "import './dep.mjs'; export const m = 1;"),
        ("/app/dep.mjs", "export const d = 1;"),
    ]);

    assert!(!h.loader.is_cached(Path::new("/app/dep.mjs")));
    h.loader.import("./main.mjs", Path::new("/app/entry.mjs")).unwrap();
    assert!(h.loader.is_cached(Path::new("/app/dep.mjs")));
    assert_eq!(h.loader.cached_paths().len(), 2);

    h.loader.clear_caches();
    assert!(h.loader.cached_paths().is_empty());
}

#[test]
fn test_resolve_without_loading() {
    let h = harness(&[("/app/main.js", ""), ("/app/dep.js", "")]);

    let resolved = h
        .loader
        .resolve_require("./dep.js", Path::new("/app/main.js"))
        .unwrap();
    assert_eq!(resolved.path, PathBuf::from("/app/dep.js"));
    assert!(!h.loader.is_cached(&resolved.path));
    assert!(h.interpreter.evaluated().is_empty());
}

#[test]
fn test_concurrent_requires_converge() {
    let h = harness(&[("/app/main.js", ""), ("/app/dep.js", "exports.x = 1;")]);

    let values: Vec<Value> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = h.loader.clone();
                s.spawn(move || loader.require("./dep.js", Path::new("/app/main.js")).unwrap())
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    // Every thread observed the same exports object.
    for value in &values {
        assert_eq!(value, &values[0]);
    }
}
