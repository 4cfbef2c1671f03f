//! Error taxonomy for refactoring operations
//!
//! Every failure the engine can report falls into one of these kinds:
//!
//! - [`RefactorError::FileSystem`]: the target path is missing, not a file or not a
//!   Python source. Raised before any backup is taken.
//! - [`RefactorError::Parse`]: the source does not parse.
//! - [`RefactorError::Configuration`]: the mapping misses or invents declared members,
//!   or collides with an existing name. Raised before any write.
//! - [`RefactorError::Structural`]: a class or method cannot be found, signatures
//!   disagree, or a class already has a base. Raised before any write.
//! - [`RefactorError::Regeneration`]: the written output failed a post-transform check.
//!   The pipeline restores the backup when it sees one of these.
//!
//! Advisory problems (formatter missing, import check failing) are not errors. They are
//! logged with `tracing::warn!` and collected as warnings on the operation result.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Post-transform check that rejected the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Syntax,
    Completeness,
    Docstring,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::Syntax => "syntax",
            Check::Completeness => "completeness",
            Check::Docstring => "docstring",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RefactorError {
    #[error("{}: {message}", .path.display())]
    FileSystem { path: PathBuf, message: String },

    #[error("{}:{line}: syntax error: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid mapping for {}: {}", .file.display(), .problems.join("; "))]
    Configuration { file: PathBuf, problems: Vec<String> },

    #[error("{}: {message}", .file.display())]
    Structural { file: PathBuf, message: String },

    #[error("{}: {check} check failed: {message}", .file.display())]
    Regeneration {
        file: PathBuf,
        check: Check,
        message: String,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RefactorError {
    pub fn file_system(path: &Path, message: impl Into<String>) -> Self {
        RefactorError::FileSystem {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn structural(file: &Path, message: impl Into<String>) -> Self {
        RefactorError::Structural {
            file: file.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn regeneration(file: &Path, check: Check, message: impl Into<String>) -> Self {
        RefactorError::Regeneration {
            file: file.to_path_buf(),
            check,
            message: message.into(),
        }
    }

    pub fn io(path: &Path, source: io::Error) -> Self {
        RefactorError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Pipeline phase in which this kind of error is raised
    pub fn phase_label(&self) -> &'static str {
        match self {
            RefactorError::FileSystem { .. } => "path check",
            RefactorError::Parse { .. } => "load",
            RefactorError::Configuration { .. } => "mapping validation",
            RefactorError::Structural { .. } => "structure validation",
            RefactorError::Regeneration { .. } => "post-transform validation",
            RefactorError::Io { .. } => "write",
        }
    }

    /// Whether the file on disk may have changed before this error surfaced
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            RefactorError::Regeneration { .. } | RefactorError::Io { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RefactorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message_lists_every_problem() {
        let err = RefactorError::Configuration {
            file: PathBuf::from("pkg/models.py"),
            problems: vec!["missing: A.m1".to_string(), "extra: A.zz".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("pkg/models.py"));
        assert!(message.contains("missing: A.m1; extra: A.zz"));
        assert_eq!(err.phase_label(), "mapping validation");
        assert!(!err.requires_rollback());
    }

    #[test]
    fn test_regeneration_names_the_check() {
        let err = RefactorError::regeneration(Path::new("a.py"), Check::Docstring, "lost");
        assert_eq!(err.to_string(), "a.py: docstring check failed: lost");
        assert!(err.requires_rollback());
    }
}
