// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for module resolution, loading, and linking
//!
//! Errors are split into four families so callers can tell an expected,
//! recoverable condition (a specifier that did not resolve) from a terminal
//! one (a module that failed to load or a graph that failed to link):
//!
//! - [`ResolveError`] - the specifier did not map to a file
//! - [`LoadError`] - the file could not be read, parsed, or compiled
//! - [`LinkError`] - the module graph is inconsistent
//! - [`BindingError`] - a binding was observed before initialization

use crate::json::JsonError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for module system operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Top-level error for the module system
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A specifier failed to resolve
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A resolved module failed to load or compile
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The module graph failed to link
    #[error(transparent)]
    Link(#[from] LinkError),

    /// A binding was observed in an invalid state
    #[error(transparent)]
    Binding(#[from] BindingError),
}

impl ModuleError {
    /// Whether this is a resolution not-found error, the one condition a
    /// caller may recover from by trying an alternate specifier.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModuleError::Resolve(ResolveError::NotFound { .. }))
    }
}

/// Errors raised while mapping a specifier to a file
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No file matched the specifier
    #[error("Cannot find module '{specifier}' imported from '{}'", referrer.display())]
    NotFound {
        /// The original specifier
        specifier: String,
        /// The module the specifier appeared in
        referrer: PathBuf,
    },

    /// The specifier is not syntactically valid
    #[error("Invalid module specifier '{specifier}': {reason}")]
    InvalidSpecifier {
        /// The original specifier
        specifier: String,
        /// Why it was rejected
        reason: String,
    },

    /// The package declares `exports` but the subpath is not listed
    #[error("Package subpath '{subpath}' is not defined by exports in '{}'", package_path.display())]
    PackagePathNotExported {
        /// The package's manifest path
        package_path: PathBuf,
        /// The requested subpath
        subpath: String,
    },

    /// A `#` specifier has no matching entry in the package's `imports`
    #[error("Package import specifier '{specifier}' is not defined in '{}'", package_path.display())]
    PackageImportNotDefined {
        /// The package's manifest path
        package_path: PathBuf,
        /// The `#`-prefixed specifier
        specifier: String,
    },

    /// A matched `exports`/`imports` target is invalid
    #[error("Invalid package target '{target}' in '{}'", package_path.display())]
    InvalidPackageTarget {
        /// The package's manifest path
        package_path: PathBuf,
        /// The offending target string
        target: String,
    },

    /// The package manifest itself is malformed
    #[error("Invalid package configuration in '{}': {reason}", path.display())]
    InvalidPackageConfig {
        /// The manifest path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors raised while reading or compiling a resolved module
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read
    #[error("Cannot read module file '{}': {source}", path.display())]
    Io {
        /// The file path
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// A JSON file or manifest is malformed
    #[error("Cannot parse JSON in '{}': {source}", path.display())]
    Json {
        /// The file path
        path: PathBuf,
        /// The underlying parse error
        source: JsonError,
    },

    /// The compiler collaborator rejected the source
    #[error("Cannot compile module '{}': {message}", path.display())]
    Compile {
        /// The file path
        path: PathBuf,
        /// The compiler's diagnostic
        message: String,
    },

    /// `require()` landed on an ECMAScript module
    #[error("require() of ES module '{}' is not supported", path.display())]
    RequireEsModule {
        /// The file path
        path: PathBuf,
    },

    /// The executing scope has no host `require` function
    #[error("require is not available in the scope of '{}'", path.display())]
    RequireUnavailable {
        /// The module whose scope was asked
        path: PathBuf,
    },
}

/// Errors raised while linking the module graph
#[derive(Debug, Error)]
pub enum LinkError {
    /// Two star re-exports provide distinct bindings for the same name
    #[error("Ambiguous export '{name}' in module '{}'", module.display())]
    AmbiguousExport {
        /// The module whose export is ambiguous
        module: PathBuf,
        /// The ambiguous binding name
        name: String,
    },

    /// An import or indirect export names a binding the target lacks
    #[error("Module '{}' does not provide an export named '{name}' (requested by '{}')", module.display(), requester.display())]
    UnresolvedImport {
        /// The module expected to provide the binding
        module: PathBuf,
        /// The missing binding name
        name: String,
        /// The module that asked for it
        requester: PathBuf,
    },

    /// A record's status was asked to move backward
    #[error("Module '{}' cannot transition from {from} to {to}", module.display())]
    InvalidStatusTransition {
        /// The module whose status was misused
        module: PathBuf,
        /// Current status
        from: &'static str,
        /// Requested status
        to: &'static str,
    },
}

/// Errors raised when observing module bindings at runtime
#[derive(Debug, Error)]
pub enum BindingError {
    /// The binding's declaration has not executed yet
    #[error("Cannot access '{name}' before initialization in module '{}'", module.display())]
    Uninitialized {
        /// The module owning the binding
        module: PathBuf,
        /// The binding name
        name: String,
    },

    /// A namespace object was asked to mutate
    #[error("Cannot modify namespace property '{name}'")]
    NamespaceReadOnly {
        /// The property that was targeted
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = ModuleError::from(ResolveError::NotFound {
            specifier: "lodash".to_string(),
            referrer: PathBuf::from("/app/index.js"),
        });
        assert!(err.is_not_found());

        let err = ModuleError::from(LoadError::RequireEsModule {
            path: PathBuf::from("/app/esm.mjs"),
        });
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_display_carries_context() {
        let err = ResolveError::NotFound {
            specifier: "./missing".to_string(),
            referrer: PathBuf::from("/app/main.js"),
        };
        let msg = err.to_string();
        assert!(msg.contains("./missing"));
        assert!(msg.contains("/app/main.js"));
    }
}
