// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-modules
//!
//! Module resolution and linking for the Spacey JavaScript engine.
//!
//! This crate locates the file an `import`/`require` specifier refers to,
//! determines its module format, loads and caches it, and, for ECMAScript
//! modules, links imports and exports into a consistent binding graph
//! before evaluation:
//!
//! - Node.js resolution for both specifier styles: relative and absolute
//!   paths with extension probing, bare package names over `node_modules`,
//!   package self-reference, conditional `exports`/`imports` with subpath
//!   patterns, and `#`-prefixed package-internal specifiers
//! - CommonJS loading with the circular-`require` contract (a cycle sees
//!   the partial exports assigned before the cycle closed)
//! - ECMAScript module records with forward-only lifecycle, eager link
//!   validation (ambiguous star exports and missing bindings fail before
//!   any body runs), and live bindings with temporal-dead-zone checks
//! - Interop shims so `import` can consume CommonJS files
//!
//! The engine itself stays outside: source is compiled through the
//! [`engine::ModuleCompiler`] collaborator and bodies run through
//! [`engine::Interpreter`], against the per-module [`scope::ModuleScope`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use spacey_modules::{ModuleLoader, RealFileSystem};
//! use std::sync::Arc;
//!
//! let loader = ModuleLoader::new(
//!     Arc::new(RealFileSystem),
//!     engine.compiler(),
//!     engine.interpreter(),
//! );
//! let namespace = loader.load_main(Path::new("src/main.mjs"))?;
//! let answer = namespace.get("answer")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod fs;
pub mod json;
pub mod loader;
pub mod namespace;
pub mod package;
mod record;
pub mod resolver;
pub mod scope;
pub mod value;

// Re-exports
pub use engine::{CompiledUnit, ExportEntry, ImportEntry, Interpreter, ModuleCompiler};
pub use error::{BindingError, LinkError, LoadError, ModuleError, ResolveError, Result};
pub use fs::{FileSystem, MemoryFileSystem, RealFileSystem};
pub use loader::{ModuleLoader, ModuleMeta};
pub use namespace::{ModuleNamespace, PropertyDescriptor};
pub use package::{PackageDescriptor, PackageType};
pub use record::ModuleStatus;
pub use resolver::{
    Conditions, ModuleFormat, ModuleResolver, ResolvedModule, node_modules_paths,
};
pub use scope::ModuleScope;
pub use value::Value;
