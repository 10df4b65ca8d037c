//! Workspace allowlist: path validation for every tracked mutation.
//!
//! Validation resolves the requested path to a canonical absolute form and
//! guarantees it lies under one of the configured roots. Symlinks are
//! followed: an existing path is judged by its resolved target, a
//! to-be-created path by its resolved parent, so a link pointing out of the
//! workspace cannot smuggle writes past the roots.

use crate::error::{HistoryError, Result};
use std::path::{Component, Path, PathBuf};

/// The set of directory roots the engine is allowed to mutate under.
#[derive(Debug, Clone)]
pub struct Allowlist {
    roots: Vec<PathBuf>,
}

impl Allowlist {
    /// Builds an allowlist from canonicalized roots.
    ///
    /// # Errors
    ///
    /// Fails when a root does not exist or cannot be resolved.
    pub fn new(roots: &[PathBuf]) -> Result<Self> {
        let mut resolved = Vec::with_capacity(roots.len());
        for root in roots {
            resolved.push(root.canonicalize()?);
        }
        Ok(Self { roots: resolved })
    }

    /// An allowlist covering a single workspace root.
    pub fn single(root: &Path) -> Result<Self> {
        Self::new(std::slice::from_ref(&root.to_path_buf()))
    }

    /// The configured roots, canonicalized.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Validates a path for mutation, returning its canonical absolute form.
    ///
    /// Existing paths are fully resolved (symlinks followed) and the target
    /// must lie under a root. Non-existing paths require an existing parent
    /// whose resolved form lies under a root; the returned path is the
    /// resolved parent joined with the final component.
    ///
    /// # Errors
    ///
    /// `PathOutsideWorkspace` when the resolved path escapes every root, or
    /// when a to-be-created path's parent does not exist.
    pub fn validate(&self, requested: &Path) -> Result<PathBuf> {
        let absolute = normalize(&expand_home(requested));

        if absolute.exists() {
            let real = absolute.canonicalize()?;
            if !self.contains(&real) {
                return Err(HistoryError::PathOutsideWorkspace {
                    path: requested.to_path_buf(),
                });
            }
            return Ok(real);
        }

        // Creating something new: judge by the parent.
        let parent = absolute
            .parent()
            .ok_or_else(|| HistoryError::PathOutsideWorkspace {
                path: requested.to_path_buf(),
            })?;
        let file_name =
            absolute
                .file_name()
                .ok_or_else(|| HistoryError::PathOutsideWorkspace {
                    path: requested.to_path_buf(),
                })?;

        let real_parent = parent
            .canonicalize()
            .map_err(|_| HistoryError::PathOutsideWorkspace {
                path: requested.to_path_buf(),
            })?;
        if !self.contains(&real_parent) {
            return Err(HistoryError::PathOutsideWorkspace {
                path: requested.to_path_buf(),
            });
        }

        Ok(real_parent.join(file_name))
    }

    /// True when `path` (already resolved) lies under one of the roots.
    fn contains(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }
}

/// Expands a leading `~/` against the HOME environment variable.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

/// Makes a path absolute (against the current directory) and resolves `.`
/// and `..` components lexically.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
