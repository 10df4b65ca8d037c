//! Edit History Engine
//!
//! Records every mutation a language-model client makes to files inside a
//! governed workspace, groups mutations into conversations, detects
//! interference from outside writers, and reconstructs the file state a
//! reviewer's accept/reject choices imply.
//!
//! The moving parts:
//! - Content hashing and unified diffs pin down every recorded state.
//! - An append-only JSON-lines log per conversation under
//!   `.mcp/edit_history/`, with checkpoint snapshots of each file's
//!   pre-conversation state.
//! - Advisory directory locks coordinate the tracking server and reviewer
//!   processes on the same workspace.
//! - A deterministic replay engine rebuilds files from their checkpoints,
//!   honouring each edit's review status.
//!
//! # Quick Start
//!
//! ```
//! use hist_core::{Engine, MutationRequest};
//! use tempfile::TempDir;
//!
//! let workspace = TempDir::new().unwrap();
//! let engine = Engine::open(workspace.path()).unwrap();
//!
//! // Track a file creation; this opens a new conversation.
//! let outcome = engine
//!     .tracker()
//!     .track(
//!         MutationRequest::WriteFile {
//!             path: workspace.path().join("hello.txt"),
//!             content: "hello\n".into(),
//!         },
//!         None,
//!     )
//!     .unwrap();
//!
//! assert!(outcome.started_conversation);
//! assert_eq!(
//!     engine.store().read_log(&outcome.conversation_id).unwrap().len(),
//!     1
//! );
//! ```
//!
//! Reviewing happens through [`Reviewer`]: flip an edit to accepted or
//! rejected and the affected file is rebuilt from its checkpoint with the
//! rejected edits skipped.

mod allowlist;
mod config;
pub mod diff;
mod edits;
mod entry;
mod error;
mod hash;
pub mod lock;
mod replay;
mod review;
mod store;
mod tracker;

pub use allowlist::Allowlist;
pub use config::{EngineConfig, LockConfig, LogConfig};
pub use edits::{apply_content_edits, apply_line_edits, ContentEdits};
pub use entry::{
    ConversationId, EditEntry, EditId, EditOp, EditStatus, LogRecord, OperationKind,
};
pub use error::{HistoryError, Result};
pub use hash::{describe_hash, ContentHash};
pub use replay::{
    commit_replay, prepare_replay, replay_file, trace_names, AcceptAll, DenyAll, ExternalChange,
    PreparedReplay, ReplayOutcome, ReviewPrompt,
};
pub use review::{
    filter_entries, parse_time_span, resolve_conversation_prefix, resolve_edit_prefix,
    resolve_target, EntryFilter, FileReplayReport, Resolution, ReviewReport, ReviewTarget,
    Reviewer,
};
pub use store::{HistoryStore, CHECKPOINT_SUFFIX, HISTORY_DIR, REVERT_SUFFIX};
pub use tracker::{Engine, MutationRequest, TrackOutcome, Tracker};
