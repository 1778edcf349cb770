// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution (Node.js algorithm)
//!
//! Pure over a [`FileSystem`]: given unchanged filesystem contents, the same
//! specifier and referrer always resolve to the same path. Both resolution
//! styles are implemented, the static `import` style and the synchronous
//! `require` style, including package self-reference, conditional
//! `exports`/`imports` targets, and subpath patterns.

use crate::error::{ResolveError, Result};
use crate::fs::{self, FileSystem};
use crate::json::JsonValue;
use crate::package::{PackageDescriptor, PackageType, package_type_for};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Format of a resolved module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleFormat {
    /// ECMAScript module
    Module,
    /// CommonJS module
    CommonJs,
    /// JSON file
    Json,
}

/// Result of module resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// Absolute, normalized path
    pub path: PathBuf,
    /// Module format at that path
    pub format: ModuleFormat,
}

/// Resolution style, driving extension precedence and the condition set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Import,
    Require,
}

impl Mode {
    fn extensions(self) -> &'static [&'static str] {
        match self {
            Mode::Import => &[".mjs", ".js", ".json"],
            Mode::Require => &[".js", ".json"],
        }
    }
}

/// Which manifest field a target came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Exports,
    Imports,
}

/// An immutable set of condition tokens for conditional `exports`/`imports`
#[derive(Debug, Clone)]
pub struct Conditions {
    set: FxHashSet<String>,
}

impl Conditions {
    /// The set used for `import`-style resolution: `{node, import, default}`.
    pub fn esm() -> Self {
        Self::from_names(["node", "import", "default"])
    }

    /// The set used for `require`-style resolution: `{node, require, default}`.
    pub fn cjs() -> Self {
        Self::from_names(["node", "require", "default"])
    }

    /// Builds a set from arbitrary names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            set: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds a condition token.
    pub fn with(mut self, name: impl Into<String>) -> Self {
        self.set.insert(name.into());
        self
    }

    /// Whether a condition key matches. `"default"` always matches.
    pub fn matches(&self, key: &str) -> bool {
        key == "default" || self.set.contains(key)
    }
}

/// Enumerates candidate `node_modules` directories from `start` up to the
/// filesystem root, skipping ancestors that are themselves `node_modules`.
pub fn node_modules_paths(start: &Path) -> Vec<PathBuf> {
    start
        .ancestors()
        .filter(|dir| {
            dir.file_name()
                .map(|name| name != "node_modules")
                .unwrap_or(true)
        })
        .map(|dir| dir.join("node_modules"))
        .collect()
}

/// Module resolver implementing the Node.js resolution algorithm
pub struct ModuleResolver {
    fs: Arc<dyn FileSystem>,
    esm_conditions: Conditions,
    cjs_conditions: Conditions,
}

impl ModuleResolver {
    /// Creates a resolver with the default condition sets.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self::with_conditions(fs, Conditions::esm(), Conditions::cjs())
    }

    /// Creates a resolver with custom condition sets.
    pub fn with_conditions(
        fs: Arc<dyn FileSystem>,
        esm_conditions: Conditions,
        cjs_conditions: Conditions,
    ) -> Self {
        Self {
            fs,
            esm_conditions,
            cjs_conditions,
        }
    }

    /// Resolves a static `import` specifier.
    pub fn resolve_esm(&self, specifier: &str, referrer: &Path) -> Result<ResolvedModule> {
        self.resolve(specifier, referrer, Mode::Import)
    }

    /// Resolves a `require` specifier.
    pub fn resolve_cjs(&self, specifier: &str, referrer: &Path) -> Result<ResolvedModule> {
        self.resolve(specifier, referrer, Mode::Require)
    }

    /// Resolves an entry-point path given directly by the host (no
    /// referrer, no specifier grammar).
    pub fn resolve_entry(&self, path: &Path) -> Result<ResolvedModule> {
        let candidate = fs::normalize(path);
        if self.fs.is_file(&candidate) {
            return self.finalize(&candidate);
        }
        Err(ResolveError::NotFound {
            specifier: path.display().to_string(),
            referrer: candidate,
        }
        .into())
    }

    fn conditions(&self, mode: Mode) -> &Conditions {
        match mode {
            Mode::Import => &self.esm_conditions,
            Mode::Require => &self.cjs_conditions,
        }
    }

    fn resolve(&self, specifier: &str, referrer: &Path, mode: Mode) -> Result<ResolvedModule> {
        tracing::trace!(specifier, referrer = %referrer.display(), ?mode, "resolving");
        if specifier.is_empty() {
            return Err(ResolveError::InvalidSpecifier {
                specifier: specifier.to_string(),
                reason: "specifier must not be empty".to_string(),
            }
            .into());
        }

        let resolved = if specifier.starts_with('#') {
            self.package_imports_resolve(specifier, referrer, mode)
        } else if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
        {
            let base = referrer.parent().unwrap_or(Path::new("/"));
            match self.resolve_path_like(&base.join(specifier), mode)? {
                Some(path) => self.finalize(&path),
                None => Err(ResolveError::NotFound {
                    specifier: specifier.to_string(),
                    referrer: referrer.to_path_buf(),
                }
                .into()),
            }
        } else {
            self.package_resolve(specifier, referrer, mode)
        };

        if let Ok(resolved) = &resolved {
            tracing::debug!(
                specifier,
                path = %resolved.path.display(),
                format = ?resolved.format,
                "resolved"
            );
        }
        resolved
    }

    /// Tries a candidate as an exact file, then with the mode's extension
    /// precedence, then as a directory.
    fn resolve_path_like(&self, candidate: &Path, mode: Mode) -> Result<Option<PathBuf>> {
        let candidate = fs::normalize(candidate);
        if self.fs.is_file(&candidate) {
            return Ok(Some(candidate));
        }
        for ext in mode.extensions() {
            let with_ext = fs::append_extension(&candidate, ext);
            if self.fs.is_file(&with_ext) {
                return Ok(Some(with_ext));
            }
        }
        if self.fs.is_dir(&candidate) {
            return self.resolve_directory(&candidate, mode);
        }
        Ok(None)
    }

    /// Resolves a directory to a file: `index.<ext>` for imports; the
    /// manifest's `main` (with `index` fallback) for require.
    fn resolve_directory(&self, dir: &Path, mode: Mode) -> Result<Option<PathBuf>> {
        if mode == Mode::Require {
            if let Some(descriptor) = PackageDescriptor::read(self.fs.as_ref(), dir)? {
                if let Some(main) = &descriptor.main {
                    let main_candidate = fs::normalize(&dir.join(main));
                    if self.fs.is_file(&main_candidate) {
                        return Ok(Some(main_candidate));
                    }
                    for ext in Mode::Require.extensions() {
                        let with_ext = fs::append_extension(&main_candidate, ext);
                        if self.fs.is_file(&with_ext) {
                            return Ok(Some(with_ext));
                        }
                    }
                    if self.fs.is_dir(&main_candidate) {
                        if let Some(found) = self.resolve_index(&main_candidate, mode) {
                            return Ok(Some(found));
                        }
                    }
                }
            }
        }
        Ok(self.resolve_index(dir, mode))
    }

    fn resolve_index(&self, dir: &Path, mode: Mode) -> Option<PathBuf> {
        for ext in mode.extensions() {
            let index = dir.join(format!("index{ext}"));
            if self.fs.is_file(&index) {
                return Some(index);
            }
        }
        None
    }

    /// Resolves a bare specifier through package self-reference and the
    /// `node_modules` walk.
    fn package_resolve(
        &self,
        specifier: &str,
        referrer: &Path,
        mode: Mode,
    ) -> Result<ResolvedModule> {
        let (name, subpath) = parse_package_specifier(specifier)?;
        let referrer_dir = referrer.parent().unwrap_or(Path::new("/"));

        // Self-reference: the nearest manifest may be the requested package.
        if let Some(descriptor) = PackageDescriptor::find_nearest(self.fs.as_ref(), referrer_dir)? {
            if descriptor.exports.is_some() && descriptor.name.as_deref() == Some(name) {
                tracing::trace!(package = name, "package self-reference");
                return self.package_exports_resolve(&descriptor, &subpath, referrer, mode);
            }
        }

        for node_modules in node_modules_paths(referrer_dir) {
            let package_dir = node_modules.join(name);
            if !self.fs.is_dir(&package_dir) {
                continue;
            }
            let descriptor = PackageDescriptor::read(self.fs.as_ref(), &package_dir)?;
            if let Some(descriptor) = &descriptor {
                if descriptor.exports.is_some() {
                    // Declared exports are exclusive: a non-matching subpath
                    // is a hard error, not a fallthrough to path guessing.
                    return self.package_exports_resolve(descriptor, &subpath, referrer, mode);
                }
            }
            if subpath == "." {
                if let Some(path) = self.resolve_directory(&package_dir, Mode::Require)? {
                    return self.finalize(&path);
                }
            } else {
                let candidate = package_dir.join(&subpath[2..]);
                if let Some(path) = self.resolve_path_like(&candidate, mode)? {
                    return self.finalize(&path);
                }
            }
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            referrer: referrer.to_path_buf(),
        }
        .into())
    }

    /// Resolves a subpath through a manifest's `exports` field.
    fn package_exports_resolve(
        &self,
        descriptor: &PackageDescriptor,
        subpath: &str,
        referrer: &Path,
        mode: Mode,
    ) -> Result<ResolvedModule> {
        let exports = descriptor
            .exports
            .as_ref()
            .ok_or_else(|| ResolveError::PackagePathNotExported {
                package_path: descriptor.manifest_path(),
                subpath: subpath.to_string(),
            })?;

        if let JsonValue::Object(map) = exports {
            let dotted = map.keys().filter(|k| k.starts_with('.')).count();
            if dotted > 0 {
                if dotted != map.len() {
                    return Err(ResolveError::InvalidPackageConfig {
                        path: descriptor.manifest_path(),
                        reason: "exports keys must either all be subpaths or all be conditions"
                            .to_string(),
                    }
                    .into());
                }
                return self.dictionary_resolve(
                    descriptor, map, subpath, referrer, mode,
                    Field::Exports,
                );
            }
        }

        // A bare string, array, or conditions object is the target for ".".
        if subpath != "." {
            return Err(ResolveError::PackagePathNotExported {
                package_path: descriptor.manifest_path(),
                subpath: subpath.to_string(),
            }
            .into());
        }
        match self.resolve_target(descriptor, exports, None, subpath, referrer, mode, Field::Exports)? {
            Some(resolved) => Ok(resolved),
            None => Err(ResolveError::PackagePathNotExported {
                package_path: descriptor.manifest_path(),
                subpath: subpath.to_string(),
            }
            .into()),
        }
    }

    /// Resolves a `#` specifier through the nearest manifest's `imports`.
    fn package_imports_resolve(
        &self,
        specifier: &str,
        referrer: &Path,
        mode: Mode,
    ) -> Result<ResolvedModule> {
        if specifier == "#" || specifier.starts_with("#/") {
            return Err(ResolveError::InvalidSpecifier {
                specifier: specifier.to_string(),
                reason: "import specifiers must not be bare '#' or start with '#/'".to_string(),
            }
            .into());
        }
        let referrer_dir = referrer.parent().unwrap_or(Path::new("/"));
        let descriptor = PackageDescriptor::find_nearest(self.fs.as_ref(), referrer_dir)?;
        let Some(descriptor) = descriptor else {
            return Err(ResolveError::PackageImportNotDefined {
                package_path: referrer_dir.join("package.json"),
                specifier: specifier.to_string(),
            }
            .into());
        };
        let Some(JsonValue::Object(map)) = &descriptor.imports else {
            return Err(ResolveError::PackageImportNotDefined {
                package_path: descriptor.manifest_path(),
                specifier: specifier.to_string(),
            }
            .into());
        };
        self.dictionary_resolve(&descriptor, map, specifier, referrer, mode, Field::Imports)
    }

    /// Shared subpath-dictionary lookup for `exports` and `imports`:
    /// exact key first, then the most specific matching pattern.
    fn dictionary_resolve(
        &self,
        descriptor: &PackageDescriptor,
        map: &crate::json::JsonMap,
        key: &str,
        referrer: &Path,
        mode: Mode,
        field: Field,
    ) -> Result<ResolvedModule> {
        let not_matched = || -> crate::error::ModuleError {
            match field {
                Field::Exports => ResolveError::PackagePathNotExported {
                    package_path: descriptor.manifest_path(),
                    subpath: key.to_string(),
                }
                .into(),
                Field::Imports => ResolveError::PackageImportNotDefined {
                    package_path: descriptor.manifest_path(),
                    specifier: key.to_string(),
                }
                .into(),
            }
        };

        if let Some(target) = map.get(key) {
            if !key.contains('*') {
                return match self
                    .resolve_target(descriptor, target, None, key, referrer, mode, field)?
                {
                    Some(resolved) => Ok(resolved),
                    None => Err(not_matched()),
                };
            }
        }

        // Pattern keys contain exactly one '*'. The most specific match
        // wins: longer literal prefix, then longer literal suffix. This
        // order is observable: it decides which file loads.
        let mut best: Option<(&str, &str, &JsonValue)> = None;
        for (pattern_key, target) in map.iter() {
            let Some(star) = pattern_key.find('*') else {
                continue;
            };
            if pattern_key[star + 1..].contains('*') {
                continue;
            }
            let prefix = &pattern_key[..star];
            let suffix = &pattern_key[star + 1..];
            if key.len() > prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
            {
                let more_specific = match &best {
                    Some((best_prefix, best_suffix, _)) => {
                        prefix.len() > best_prefix.len()
                            || (prefix.len() == best_prefix.len()
                                && suffix.len() > best_suffix.len())
                    }
                    None => true,
                };
                if more_specific {
                    best = Some((prefix, suffix, target));
                }
            }
        }

        let Some((prefix, suffix, target)) = best else {
            return Err(not_matched());
        };
        let matched = &key[prefix.len()..key.len() - suffix.len()];
        match self.resolve_target(descriptor, target, Some(matched), key, referrer, mode, field)? {
            Some(resolved) => Ok(resolved),
            None => Err(not_matched()),
        }
    }

    /// Resolves one `exports`/`imports` target value. `Ok(None)` means no
    /// condition branch matched (the caller treats the entry as absent);
    /// `null` targets are a hard not-exported error.
    #[allow(clippy::too_many_arguments)]
    fn resolve_target(
        &self,
        descriptor: &PackageDescriptor,
        target: &JsonValue,
        pattern: Option<&str>,
        subpath: &str,
        referrer: &Path,
        mode: Mode,
        field: Field,
    ) -> Result<Option<ResolvedModule>> {
        match target {
            JsonValue::String(target_str) => {
                let substituted = match pattern {
                    Some(matched) => target_str.replace('*', matched),
                    None => target_str.clone(),
                };
                if !substituted.starts_with("./") {
                    // `imports` targets may name another package.
                    if field == Field::Imports
                        && !substituted.starts_with('.')
                        && !substituted.starts_with('/')
                        && !substituted.starts_with('#')
                    {
                        return self.resolve(&substituted, referrer, mode).map(Some);
                    }
                    return Err(ResolveError::InvalidPackageTarget {
                        package_path: descriptor.manifest_path(),
                        target: target_str.clone(),
                    }
                    .into());
                }
                if has_invalid_segments(&substituted[2..]) {
                    return Err(ResolveError::InvalidPackageTarget {
                        package_path: descriptor.manifest_path(),
                        target: target_str.clone(),
                    }
                    .into());
                }
                let resolved = fs::normalize(&descriptor.directory.join(&substituted[2..]));
                if !resolved.starts_with(&descriptor.directory) {
                    return Err(ResolveError::InvalidPackageTarget {
                        package_path: descriptor.manifest_path(),
                        target: target_str.clone(),
                    }
                    .into());
                }
                if !self.fs.is_file(&resolved) {
                    return Err(ResolveError::NotFound {
                        specifier: substituted,
                        referrer: descriptor.manifest_path(),
                    }
                    .into());
                }
                self.finalize(&resolved).map(Some)
            }
            JsonValue::Object(conditions) => {
                for (condition, value) in conditions.iter() {
                    if self.conditions(mode).matches(condition) {
                        tracing::trace!(condition, "condition matched");
                        match self.resolve_target(
                            descriptor, value, pattern, subpath, referrer, mode, field,
                        )? {
                            Some(resolved) => return Ok(Some(resolved)),
                            None => continue,
                        }
                    }
                }
                Ok(None)
            }
            JsonValue::Array(targets) => {
                let mut last_error = None;
                for value in targets {
                    match self.resolve_target(
                        descriptor, value, pattern, subpath, referrer, mode, field,
                    ) {
                        Ok(Some(resolved)) => return Ok(Some(resolved)),
                        Ok(None) => continue,
                        Err(err) => last_error = Some(err),
                    }
                }
                match last_error {
                    Some(err) => Err(err),
                    None => Ok(None),
                }
            }
            JsonValue::Null => Err(ResolveError::PackagePathNotExported {
                package_path: descriptor.manifest_path(),
                subpath: subpath.to_string(),
            }
            .into()),
            _ => Err(ResolveError::InvalidPackageTarget {
                package_path: descriptor.manifest_path(),
                target: target.to_string(),
            }
            .into()),
        }
    }

    /// Canonicalizes a found file and classifies its format.
    fn finalize(&self, path: &Path) -> Result<ResolvedModule> {
        let canonical = self
            .fs
            .canonicalize(path)
            .unwrap_or_else(|_| fs::normalize(path));
        let format = self.classify(&canonical)?;
        Ok(ResolvedModule {
            path: canonical,
            format,
        })
    }

    /// Determines module format from the extension, consulting the nearest
    /// manifest's `type` field for `.js`.
    fn classify(&self, path: &Path) -> Result<ModuleFormat> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("mjs") => Ok(ModuleFormat::Module),
            Some("cjs") => Ok(ModuleFormat::CommonJs),
            Some("json") => Ok(ModuleFormat::Json),
            _ => Ok(match package_type_for(self.fs.as_ref(), path)? {
                PackageType::Module => ModuleFormat::Module,
                PackageType::CommonJs => ModuleFormat::CommonJs,
            }),
        }
    }
}

/// Splits a bare specifier into package name and `.`-prefixed subpath.
fn parse_package_specifier(specifier: &str) -> Result<(&str, String)> {
    let invalid = |reason: &str| -> crate::error::ModuleError {
        ResolveError::InvalidSpecifier {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    let name_end = if let Some(rest) = specifier.strip_prefix('@') {
        // Scoped names need two path segments before any subpath starts.
        let scope_sep = rest.find('/').ok_or_else(|| {
            invalid("scoped package specifier is missing a package name")
        })?;
        let after_scope = &rest[scope_sep + 1..];
        match after_scope.find('/') {
            Some(pos) => 1 + scope_sep + 1 + pos,
            None => specifier.len(),
        }
    } else {
        specifier.find('/').unwrap_or(specifier.len())
    };

    let name = &specifier[..name_end];
    if name.is_empty() || name.starts_with('.') {
        return Err(invalid("package name must not be empty or start with '.'"));
    }
    if name.contains('\\') || name.contains('%') {
        return Err(invalid("package name must not contain '\\' or '%'"));
    }
    if name.strip_prefix('@').unwrap_or(name).split('/').any(str::is_empty) {
        return Err(invalid("package name has an empty segment"));
    }

    let subpath = if name_end == specifier.len() {
        ".".to_string()
    } else {
        let rest = &specifier[name_end..];
        if rest.split('/').skip(1).any(str::is_empty) {
            return Err(invalid("package subpath has an empty segment"));
        }
        format!(".{rest}")
    };
    Ok((name, subpath))
}

/// Rejects target paths that escape the package or tunnel through another
/// package's `node_modules`.
fn has_invalid_segments(relative: &str) -> bool {
    relative
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment == "node_modules")
}
