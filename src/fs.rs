// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Filesystem abstraction used by resolution and loading
//!
//! Resolution is a pure function of the filesystem contents, so the
//! resolver and loader only ever touch the disk through [`FileSystem`].
//! [`RealFileSystem`] forwards to `std::fs`; [`MemoryFileSystem`] keeps a
//! package tree in memory for tests and embedders.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Capability surface the module system needs from a filesystem
pub trait FileSystem: Send + Sync {
    /// Whether `path` exists and is a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Whether `path` exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Reads the full contents of a file as UTF-8.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns the canonical form of `path`.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Filesystem backed by the real disk
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}

/// In-memory filesystem for tests and embedders
///
/// Directories are implied: a file at `/a/b/c.js` makes `/a` and `/a/b`
/// directories. Paths are normalized lexically on insert and lookup, and
/// `canonicalize` is normalization (there are no symlinks to resolve).
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<BTreeMap<PathBuf, String>>,
}

impl MemoryFileSystem {
    /// Creates an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, replacing any previous contents.
    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<String>) {
        self.files
            .write()
            .insert(normalize(path.as_ref()), contents.into());
    }

    /// Removes a file.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.files.write().remove(&normalize(path.as_ref()));
    }
}

impl FileSystem for MemoryFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        self.files.read().contains_key(&normalize(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let dir = normalize(path);
        self.files
            .read()
            .keys()
            .any(|file| file != &dir && file.starts_with(&dir))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .read()
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let normalized = normalize(path);
        if self.is_file(&normalized) || self.is_dir(&normalized) {
            Ok(normalized)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such path"))
        }
    }
}

/// Lexically normalizes a path, resolving `.` and `..` without touching the
/// filesystem. `..` at the root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::RootDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Appends a literal extension (including the dot) to a path, without
/// replacing any existing extension: `./file.test` + `.js` = `./file.test.js`.
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut out = path.as_os_str().to_os_string();
    out.push(ext);
    PathBuf::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/a/./b")), PathBuf::from("/a/b"));
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize(Path::new("/a/b/")), PathBuf::from("/a/b"));
    }

    #[test]
    fn test_append_extension_keeps_existing_suffix() {
        assert_eq!(
            append_extension(Path::new("/p/file.test"), ".js"),
            PathBuf::from("/p/file.test.js")
        );
    }

    #[test]
    fn test_memory_fs_implied_directories() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/proj/src/index.js", "code");

        assert!(fs.is_file(Path::new("/proj/src/index.js")));
        assert!(fs.is_dir(Path::new("/proj")));
        assert!(fs.is_dir(Path::new("/proj/src")));
        assert!(!fs.is_dir(Path::new("/proj/src/index.js")));
        assert!(!fs.is_file(Path::new("/proj/src")));
    }

    #[test]
    fn test_memory_fs_read_and_normalize() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/proj/a.js", "hello");

        assert_eq!(
            fs.read_to_string(Path::new("/proj/b/../a.js")).unwrap(),
            "hello"
        );
        assert_eq!(
            fs.canonicalize(Path::new("/proj/./a.js")).unwrap(),
            PathBuf::from("/proj/a.js")
        );
        assert!(fs.read_to_string(Path::new("/proj/missing.js")).is_err());
    }
}
