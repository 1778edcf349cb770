// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Package manifest (`package.json`) reading

use crate::error::{LoadError, ResolveError, Result};
use crate::fs::FileSystem;
use crate::json::{self, JsonValue};
use std::path::{Path, PathBuf};

/// The `type` field of a package manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageType {
    /// `.js` files under this package are ECMAScript modules
    Module,
    /// `.js` files under this package are CommonJS modules (the default)
    #[default]
    CommonJs,
}

impl PackageType {
    fn from_field(field: Option<&JsonValue>) -> Self {
        match field.and_then(JsonValue::as_str) {
            Some("module") => PackageType::Module,
            _ => PackageType::CommonJs,
        }
    }
}

/// Immutable, typed view of a package manifest
///
/// Created once per manifest read and never mutated. Only the fields the
/// resolver consumes are surfaced; everything else in the manifest is
/// ignored.
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    /// The declared package name
    pub name: Option<String>,
    /// The legacy `main` entry point, relative to the package directory
    pub main: Option<String>,
    /// The `type` field, defaulting to CommonJS
    pub package_type: PackageType,
    /// The raw `exports` field, if declared
    pub exports: Option<JsonValue>,
    /// The raw `imports` field, if declared
    pub imports: Option<JsonValue>,
    /// The directory containing the manifest
    pub directory: PathBuf,
}

impl PackageDescriptor {
    /// Reads the manifest in `directory`, if one exists.
    ///
    /// A missing manifest is `Ok(None)`; a malformed one is an error (it
    /// would otherwise silently change resolution for the whole subtree).
    pub fn read(fs: &dyn FileSystem, directory: &Path) -> Result<Option<Self>> {
        let manifest_path = directory.join("package.json");
        if !fs.is_file(&manifest_path) {
            return Ok(None);
        }
        let text = fs
            .read_to_string(&manifest_path)
            .map_err(|source| LoadError::Io {
                path: manifest_path.clone(),
                source,
            })?;
        let value = json::parse(&text).map_err(|source| LoadError::Json {
            path: manifest_path.clone(),
            source,
        })?;
        let map = match value {
            JsonValue::Object(map) => map,
            _ => {
                return Err(ResolveError::InvalidPackageConfig {
                    path: manifest_path,
                    reason: "manifest root must be an object".to_string(),
                }
                .into());
            }
        };

        if let Some(imports) = map.get("imports") {
            if let JsonValue::Object(entries) = imports {
                if let Some(key) = entries.keys().find(|k| !k.starts_with('#')) {
                    return Err(ResolveError::InvalidPackageConfig {
                        path: manifest_path,
                        reason: format!("imports key '{key}' must start with '#'"),
                    }
                    .into());
                }
            } else {
                return Err(ResolveError::InvalidPackageConfig {
                    path: manifest_path,
                    reason: "imports must be an object".to_string(),
                }
                .into());
            }
        }

        Ok(Some(Self {
            name: map.get("name").and_then(JsonValue::as_str).map(str::to_owned),
            main: map.get("main").and_then(JsonValue::as_str).map(str::to_owned),
            package_type: PackageType::from_field(map.get("type")),
            // A literal `null` means the field is not declared.
            exports: map.get("exports").filter(|v| !v.is_null()).cloned(),
            imports: map.get("imports").filter(|v| !v.is_null()).cloned(),
            directory: directory.to_path_buf(),
        }))
    }

    /// Walks upward from `start_dir` to the nearest directory containing a
    /// manifest and reads it.
    pub fn find_nearest(fs: &dyn FileSystem, start_dir: &Path) -> Result<Option<Self>> {
        let mut current = Some(start_dir);
        while let Some(dir) = current {
            if let Some(descriptor) = Self::read(fs, dir)? {
                return Ok(Some(descriptor));
            }
            current = dir.parent();
        }
        Ok(None)
    }

    /// The manifest path for diagnostics.
    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join("package.json")
    }
}

/// Determines the package `type` governing a file, by nearest manifest.
pub fn package_type_for(fs: &dyn FileSystem, file: &Path) -> Result<PackageType> {
    let start = file.parent().unwrap_or(Path::new("/"));
    Ok(PackageDescriptor::find_nearest(fs, start)?
        .map(|d| d.package_type)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;

    #[test]
    fn test_read_descriptor_fields() {
        let fs = MemoryFileSystem::new();
        fs.add_file(
            "/proj/node_modules/lib/package.json",
            r#"{"name": "lib", "main": "./index.js", "type": "module", "exports": "./esm.mjs"}"#,
        );

        let desc = PackageDescriptor::read(&fs, Path::new("/proj/node_modules/lib"))
            .unwrap()
            .unwrap();
        assert_eq!(desc.name.as_deref(), Some("lib"));
        assert_eq!(desc.main.as_deref(), Some("./index.js"));
        assert_eq!(desc.package_type, PackageType::Module);
        assert!(desc.exports.is_some());
        assert!(desc.imports.is_none());
    }

    #[test]
    fn test_type_defaults_to_commonjs() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/p/package.json", r#"{"name": "p"}"#);

        let desc = PackageDescriptor::read(&fs, Path::new("/p")).unwrap().unwrap();
        assert_eq!(desc.package_type, PackageType::CommonJs);
    }

    #[test]
    fn test_missing_manifest_is_none() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/p/index.js", "");
        assert!(PackageDescriptor::read(&fs, Path::new("/p")).unwrap().is_none());
    }

    #[test]
    fn test_malformed_manifest_is_error() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/p/package.json", "{not json");
        assert!(PackageDescriptor::read(&fs, Path::new("/p")).is_err());
    }

    #[test]
    fn test_imports_keys_must_be_hash_prefixed() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/p/package.json", r#"{"imports": {"dep": "./x.js"}}"#);
        assert!(PackageDescriptor::read(&fs, Path::new("/p")).is_err());
    }

    #[test]
    fn test_find_nearest_walks_up() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/proj/package.json", r#"{"name": "proj", "type": "module"}"#);
        fs.add_file("/proj/src/deep/mod.js", "");

        let desc = PackageDescriptor::find_nearest(&fs, Path::new("/proj/src/deep"))
            .unwrap()
            .unwrap();
        assert_eq!(desc.name.as_deref(), Some("proj"));
        assert_eq!(
            package_type_for(&fs, Path::new("/proj/src/deep/mod.js")).unwrap(),
            PackageType::Module
        );
    }
}
