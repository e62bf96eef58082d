//! Source resolution for `import` statements (spec §6.1), grounded on
//! `qcc/import.c`'s already-loaded cache — a second `import` of the same
//! path is a no-op rather than a second parse.
//!
//! Reading files off disk, resolving relative paths against a project root,
//! and the CLI driver that wires a concrete provider in are outside this
//! crate's scope; what lives here is the trait the parser calls through and
//! the loaded-path bookkeeping that makes repeated imports idempotent.

use std::path::{Path, PathBuf};

use ahash::AHashSet;

#[derive(Debug)]
pub enum SourceError {
    NotFound(PathBuf),
    Io(String),
}

/// Implemented by the host embedding this crate: given an import path
/// (however the host chooses to resolve it — relative to a root, a virtual
/// filesystem, a network fetch), return the source text.
pub trait SourceProvider {
    fn load(&self, path: &Path) -> Result<String, SourceError>;
}

/// Tracks which paths have already been imported into the current parse, so
/// the parser can short-circuit a repeat `import` instead of re-parsing (and
/// re-declaring) the same file's symbols a second time.
#[derive(Debug, Default)]
pub struct ImportTracker {
    loaded: AHashSet<PathBuf>,
}

impl ImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `path` as loaded if it wasn't already. Returns `true` the first
    /// time a path is seen (the parser should merge that file's statements
    /// in), `false` on every later call for the same path (the parser emits
    /// an empty `Stmt::Import { already_loaded: true, .. }` instead).
    pub fn mark_loaded(&mut self, path: &Path) -> bool {
        self.loaded.insert(path.to_path_buf())
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.loaded.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_import_of_the_same_path_is_a_no_op() {
        let mut tracker = ImportTracker::new();
        assert!(tracker.mark_loaded(Path::new("a.qz")));
        assert!(!tracker.mark_loaded(Path::new("a.qz")));
        assert!(tracker.is_loaded(Path::new("a.qz")));
    }

    #[test]
    fn different_paths_are_independent() {
        let mut tracker = ImportTracker::new();
        assert!(tracker.mark_loaded(Path::new("a.qz")));
        assert!(tracker.mark_loaded(Path::new("b.qz")));
    }
}
