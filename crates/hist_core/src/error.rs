//! Error types for hist_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for history engine operations.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Path lies outside every configured workspace root.
    #[error("access denied - path outside allowed directories: {}", path.display())]
    PathOutsideWorkspace {
        /// The offending path as requested.
        path: PathBuf,
    },

    /// A line selector could not be parsed or addresses lines the file
    /// does not have.
    #[error("invalid line selector '{selector}': {reason}")]
    InvalidSelector {
        /// The selector as given by the caller.
        selector: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Two edit selectors in the same call address overlapping lines.
    #[error("conflicting edit selectors '{first}' and '{second}' overlap")]
    ConflictingEdit {
        /// First of the overlapping selectors.
        first: String,
        /// Second of the overlapping selectors.
        second: String,
    },

    /// A replacement target or insertion anchor does not occur in the file.
    #[error("anchor text not found in {}: {snippet:?}", path.display())]
    AnchorNotFound {
        /// File that was searched.
        path: PathBuf,
        /// Leading characters of the missing anchor.
        snippet: String,
    },

    /// An operation requires a file that does not exist.
    #[error("file not found: {}", path.display())]
    FileMissing {
        /// The missing path.
        path: PathBuf,
    },

    /// An operation refuses to clobber an existing file (move destination).
    #[error("destination already exists: {}", path.display())]
    FileExists {
        /// The occupied path.
        path: PathBuf,
    },

    /// A log line or entry violates the record invariants.
    #[error("malformed log entry{}: {reason}", edit_id.as_deref().map(|id| format!(" {id}")).unwrap_or_default())]
    MalformedEntry {
        /// Edit id when one could be read.
        edit_id: Option<String>,
        /// Description of the violation.
        reason: String,
    },

    /// An id prefix matched no entry or conversation.
    #[error("no edit or conversation matches '{0}'")]
    NoMatch(String),

    /// An id prefix matched more than one entity and no selection was made.
    #[error("id prefix '{prefix}' is ambiguous ({count} matches)")]
    AmbiguousId {
        /// The ambiguous prefix.
        prefix: String,
        /// How many entities matched.
        count: usize,
    },

    /// Lock acquisition exceeded its timeout.
    #[error("timeout acquiring lock for {}{}", path.display(), holder_pid.map(|p| format!(" (held by PID {p})")).unwrap_or_default())]
    LockTimeout {
        /// The path the lock guards.
        path: PathBuf,
        /// Holder PID when it could be read from the lock.
        holder_pid: Option<u32>,
    },

    /// A stale lock could not be reclaimed.
    #[error("stale lock at {} could not be removed: {reason}", path.display())]
    StaleLockRetained {
        /// The lock directory.
        path: PathBuf,
        /// Why removal failed.
        reason: String,
    },

    /// The file on disk no longer matches the last recorded post-state.
    #[error("file modified outside the edit history: {} (expected {expected}, found {actual})", path.display())]
    HashMismatchExternal {
        /// The externally modified file.
        path: PathBuf,
        /// Hash the log says the file should have ("absent" when none).
        expected: String,
        /// Hash the file actually has ("absent" when missing).
        actual: String,
    },

    /// Replay needs a checkpoint that was never written or is gone.
    #[error("no checkpoint for {} in conversation {conversation_id}; edit {edit_id} cannot be replayed", path.display())]
    MissingCheckpoint {
        /// The file whose base state is unknown.
        path: PathBuf,
        /// Conversation being replayed.
        conversation_id: String,
        /// The edit that needed the base state.
        edit_id: String,
    },

    /// The replay hash chain broke where the log promised consistency.
    /// Indicates an engine bug, not user action.
    #[error("internal hash drift at edit {edit_id}: expected {expected}, computed {actual}")]
    InternalHashDrift {
        /// The edit whose pre-state did not match.
        edit_id: String,
        /// Hash the chain predicted.
        expected: String,
        /// Hash the replay buffer produced.
        actual: String,
    },

    /// A diff hunk's context did not match the bytes it was applied to.
    #[error("patch context mismatch{} at line {line}: expected {expected:?}, found {found:?}", edit_id.as_deref().map(|id| format!(" for edit {id}")).unwrap_or_default())]
    PatchContextMismatch {
        /// Edit whose diff failed, when known.
        edit_id: Option<String>,
        /// One-based line in the input the hunk pointed at.
        line: usize,
        /// Context line the diff expected.
        expected: String,
        /// Line actually present.
        found: String,
    },

    /// The diff bytes themselves could not be parsed as a unified diff.
    #[error("malformed unified diff: {0}")]
    MalformedDiff(String),

    /// Serialization or deserialization of a log record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl HistoryError {
    /// Returns a user-facing recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another process may hold the lock. If it crashed, run 'mcpdiff cleanup' to reclaim stale locks.")
            }
            Self::StaleLockRetained { .. } => {
                Some("Remove the named .lockdir directory manually, then run 'mcpdiff cleanup'.")
            }
            Self::HashMismatchExternal { .. } => {
                Some("The file was edited outside the tracked history. Re-run and confirm to discard the external changes, or abort and reconcile by hand.")
            }
            Self::MissingCheckpoint { .. } => {
                Some("The base state for this file is unrecorded. Accept or reject the conversation's earlier edits on this file together with this one.")
            }
            Self::PatchContextMismatch { .. } => {
                Some("A later edit depends on one you rejected. Reject the dependent edits as well, or accept the rejected one back first.")
            }
            Self::InternalHashDrift { .. } => {
                Some("This indicates a bug in the history engine; the file was restored to its checkpoint state.")
            }
            Self::AmbiguousId { .. } => Some("Give more characters of the id, or the full id."),
            _ => None,
        }
    }

    /// True when the error belongs to the lock category.
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::StaleLockRetained { .. }
        )
    }
}

/// Convenience Result type for hist_core operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
