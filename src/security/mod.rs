//! Sandboxing for filesystem tools
//!
//! Every filesystem tool resolves its path through [`SecurityGuard`] before
//! touching storage. The guard confines access to a root directory (the
//! process working directory by default), rejects sensitive locations and
//! bounds payload sizes.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Limits file operations to 10MB
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Prevents extremely long paths
pub const MAX_PATH_LENGTH: usize = 4096;

/// Substrings that make a path off-limits, matched case-insensitively
pub const DEFAULT_DENIED_SUBSTRINGS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/proc",
    "/sys",
    ".ssh",
    ".git",
    "node_modules",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("path cannot be empty")]
    EmptyPath,

    #[error("path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("path '{0}' attempts to access files outside working directory")]
    OutsideWorkingDirectory(String),

    #[error("access to '{0}' is restricted")]
    Restricted(String),

    #[error("file '{0}' does not exist")]
    NotFound(String),

    #[error("file size {size} bytes exceeds maximum allowed size of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("content size {size} bytes exceeds maximum allowed size of {max} bytes")]
    ContentTooLarge { size: u64, max: u64 },

    #[error("cannot access '{path}': {message}")]
    Io { path: String, message: String },
}

/// Static sandbox configuration, read-only once the guard is built
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub root: PathBuf,
    pub max_file_size: u64,
    pub max_path_length: usize,
    pub denied_substrings: Vec<String>,
}

impl SecurityPolicy {
    /// Policy rooted at `root` with the default limits
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        // Canonical root so symlink-resolved targets compare correctly
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            max_file_size: MAX_FILE_SIZE,
            max_path_length: MAX_PATH_LENGTH,
            denied_substrings: DEFAULT_DENIED_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Policy rooted at the process working directory
    pub fn for_working_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn with_denied_substring(mut self, substring: impl Into<String>) -> Self {
        self.denied_substrings.push(substring.into());
        self
    }
}

/// Path and payload validator shared by all filesystem tools
#[derive(Debug, Clone)]
pub struct SecurityGuard {
    policy: SecurityPolicy,
}

impl SecurityGuard {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn root(&self) -> &Path {
        &self.policy.root
    }

    /// Validate a path supplied by the model
    ///
    /// Relative paths are resolved against the root. The path must:
    /// - Be non-empty and within the length limit
    /// - Stay inside the root once `.` and `..` are resolved
    /// - Stay inside the root once symlinks are resolved, including those
    ///   in ancestors of a path that does not exist yet
    /// - Not contain a denied substring, whatever the letter case
    ///
    /// Only metadata lookups touch the filesystem here, so it is cheap enough
    /// to call from async handlers.
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - The resolved absolute path to operate on
    pub fn validate_path(&self, path: &str) -> Result<PathBuf, SecurityError> {
        if path.trim().is_empty() {
            return Err(SecurityError::EmptyPath);
        }

        if path.len() > self.policy.max_path_length {
            return Err(SecurityError::PathTooLong {
                max: self.policy.max_path_length,
            });
        }

        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.policy.root.join(candidate)
        };

        let resolved = normalize_path(&joined)
            .filter(|p| p.starts_with(&self.policy.root))
            .ok_or_else(|| SecurityError::OutsideWorkingDirectory(path.to_string()))?;

        // Symlinks anywhere along the path may still point outside the root
        let real = resolve_symlinks(&resolved)
            .ok_or_else(|| SecurityError::OutsideWorkingDirectory(path.to_string()))?;
        if !real.starts_with(&self.policy.root) {
            return Err(SecurityError::OutsideWorkingDirectory(path.to_string()));
        }

        if self.is_denied(&resolved) {
            return Err(SecurityError::Restricted(path.to_string()));
        }

        Ok(resolved)
    }

    /// Reject payloads above the max file size
    pub fn validate_size(&self, size: u64) -> Result<(), SecurityError> {
        if size > self.policy.max_file_size {
            return Err(SecurityError::ContentTooLarge {
                size,
                max: self.policy.max_file_size,
            });
        }
        Ok(())
    }

    /// Validate a path for reading: it must exist and fit the size limit
    pub async fn validate_read(&self, path: &str) -> Result<PathBuf, SecurityError> {
        let resolved = self.validate_path(path)?;

        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecurityError::NotFound(path.to_string()));
            }
            Err(e) => {
                return Err(SecurityError::Io {
                    path: path.to_string(),
                    message: e.to_string(),
                });
            }
        };

        if metadata.len() > self.policy.max_file_size {
            return Err(SecurityError::FileTooLarge {
                size: metadata.len(),
                max: self.policy.max_file_size,
            });
        }

        Ok(resolved)
    }

    /// Validate a path for writing `content_len` bytes
    ///
    /// Missing parent directories are created.
    pub async fn validate_write(
        &self,
        path: &str,
        content_len: u64,
    ) -> Result<PathBuf, SecurityError> {
        let resolved = self.validate_path(path)?;
        self.validate_size(content_len)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| SecurityError::Io {
                path: parent.display().to_string(),
                message: e.to_string(),
            })?;
        }

        Ok(resolved)
    }

    /// Check a resolved path against the deny list
    pub fn is_denied(&self, path: &Path) -> bool {
        let lower = path.to_string_lossy().to_lowercase();
        self.policy
            .denied_substrings
            .iter()
            .any(|denied| lower.contains(&denied.to_lowercase()))
    }
}

/// Resolve symlinks in the deepest existing ancestor of `path` and re-append
/// the components that do not exist yet.
///
/// `path` must already be normalized. Returns `None` for a dangling symlink,
/// since writing through it would create its target wherever it points.
fn resolve_symlinks(path: &Path) -> Option<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path;

    loop {
        match current.canonicalize() {
            Ok(mut real) => {
                real.extend(missing.iter().rev());
                return Some(real);
            }
            Err(_) => {
                if std::fs::symlink_metadata(current).is_ok() {
                    return None;
                }
                missing.push(current.file_name()?);
                current = current.parent()?;
            }
        }
    }
}

/// Normalize a path by resolving . and .. components without requiring
/// the path to exist.
///
/// Returns `None` when `..` would climb above the filesystem root.
fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped {
                    return None;
                }
            }
            Component::CurDir => {}
            Component::Normal(name) => normalized.push(name),
            Component::RootDir => normalized.push(Component::RootDir),
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
        }
    }

    Some(normalized)
}
