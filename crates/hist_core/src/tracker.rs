//! The mutation tracker: every write-like operation goes through here.
//!
//! `Tracker::track` brackets a mutation with validation, conversation and
//! index assignment, locking, pre/post state capture, and the log append.
//! Tools call `track` rather than being wrapped, which makes the contract a
//! single test-visible seam.

use crate::allowlist::Allowlist;
use crate::config::EngineConfig;
use crate::diff::generate_diff;
use crate::edits::{apply_content_edits, apply_line_edits, ContentEdits};
use crate::entry::{ConversationId, EditEntry, EditId, EditOp, EditStatus, OperationKind};
use crate::error::{HistoryError, Result};
use crate::hash::ContentHash;
use crate::lock::LockSet;
use crate::store::HistoryStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Engine context: everything an operation needs, owned in one place.
pub struct Engine {
    store: HistoryStore,
    allowlist: Allowlist,
}

impl Engine {
    /// Opens the engine over a workspace whose root is the only allowed
    /// directory.
    pub fn open(workspace_root: &Path) -> Result<Self> {
        let store = HistoryStore::open(workspace_root)?;
        let allowlist = Allowlist::single(store.workspace_root())?;
        Ok(Self { store, allowlist })
    }

    /// Opens the engine with an explicit allowlist.
    pub fn with_allowlist(workspace_root: &Path, allowlist: Allowlist) -> Result<Self> {
        let store = HistoryStore::open(workspace_root)?;
        Ok(Self { store, allowlist })
    }

    /// The history store.
    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Mutable access, for per-invocation overrides such as `--timeout`.
    pub fn store_mut(&mut self) -> &mut HistoryStore {
        &mut self.store
    }

    /// The configured allowlist.
    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// Engine configuration shorthand.
    pub fn config(&self) -> &EngineConfig {
        self.store.config()
    }

    /// A tracker borrowing this engine.
    pub fn tracker(&self) -> Tracker<'_> {
        Tracker { engine: self }
    }
}

/// A mutation to run under tracking.
#[derive(Debug, Clone)]
pub enum MutationRequest {
    /// Whole-file write: `create` when the path is absent, else `replace`.
    WriteFile { path: PathBuf, content: String },
    /// Line-selector edit against the original numbering.
    EditLines {
        path: PathBuf,
        edits: BTreeMap<String, String>,
        dry_run: bool,
    },
    /// Content-anchored edit.
    EditContent {
        path: PathBuf,
        spec: ContentEdits,
        dry_run: bool,
    },
    /// Rename within the workspace.
    MoveFile {
        source: PathBuf,
        destination: PathBuf,
    },
    /// File removal.
    DeleteFile { path: PathBuf },
}

impl MutationRequest {
    fn tool_name(&self) -> &'static str {
        match self {
            Self::WriteFile { .. } => "write_file",
            Self::EditLines { .. } => "edit_file_lines",
            Self::EditContent { .. } => "edit_file_content",
            Self::MoveFile { .. } => "move_file",
            Self::DeleteFile { .. } => "delete_file",
        }
    }
}

/// What a tracked mutation produced.
#[derive(Debug)]
pub struct TrackOutcome {
    /// Id of the recorded edit; None for dry runs, which record nothing.
    pub edit_id: Option<EditId>,
    /// The conversation the mutation belongs to.
    pub conversation_id: ConversationId,
    /// True when this invocation opened the conversation.
    pub started_conversation: bool,
    /// How the mutation was classified.
    pub operation: OperationKind,
    /// Human-readable result, with the conversation id appended on a
    /// conversation-starting invocation.
    pub message: String,
    /// The would-be diff of a dry run.
    pub dry_run_diff: Option<String>,
}

/// Wraps every mutation with history tracking.
pub struct Tracker<'a> {
    engine: &'a Engine,
}

impl Tracker<'_> {
    /// Runs a mutation under full tracking.
    ///
    /// Any failure before the log append leaves no entry behind; artifacts
    /// already written (checkpoint, diff) remain as harmless orphans. Locks
    /// release on every path.
    pub fn track(
        &self,
        request: MutationRequest,
        conversation: Option<ConversationId>,
    ) -> Result<TrackOutcome> {
        let store = &self.engine.store;
        let allowlist = &self.engine.allowlist;

        // Validate every affected path before touching anything.
        let (primary, secondary) = match &request {
            MutationRequest::MoveFile {
                source,
                destination,
            } => (
                allowlist.validate(destination)?,
                Some(allowlist.validate(source)?),
            ),
            MutationRequest::WriteFile { path, .. }
            | MutationRequest::EditLines { path, .. }
            | MutationRequest::EditContent { path, .. }
            | MutationRequest::DeleteFile { path } => (allowlist.validate(path)?, None),
        };

        let (conversation, started) = match conversation {
            Some(c) => (c, false),
            None => (ConversationId::generate(), true),
        };

        let dry_run = matches!(
            &request,
            MutationRequest::EditLines { dry_run: true, .. }
                | MutationRequest::EditContent { dry_run: true, .. }
        );

        // The log lock is held from index assignment through the append so
        // concurrent trackers cannot mint the same index. Dry runs record
        // nothing and skip it.
        let log_guard = if dry_run {
            None
        } else {
            Some(store.lock_log(&conversation)?)
        };
        let tool_call_index = if dry_run {
            0
        } else {
            store.entry_count(&conversation)?
        };

        let mut lock_paths = vec![primary.clone()];
        if let Some(source) = &secondary {
            lock_paths.push(source.clone());
        }
        let file_locks = LockSet::acquire_all(
            &lock_paths,
            store.config().locks.timeout(),
            store.config().locks.stale_min_age(),
        )?;

        let result = self.execute(
            &request,
            &primary,
            secondary.as_deref(),
            &conversation,
            tool_call_index,
            started,
        );

        drop(file_locks);
        drop(log_guard);
        result
    }

    /// Steps 5-8: capture, execute, capture, append.
    fn execute(
        &self,
        request: &MutationRequest,
        primary: &Path,
        source: Option<&Path>,
        conversation: &ConversationId,
        tool_call_index: u64,
        started: bool,
    ) -> Result<TrackOutcome> {
        let store = &self.engine.store;
        let edit_id = EditId::generate();
        let label = store.workspace_relative(primary);

        let (op, hash_before, hash_after, mut message, dry_run_diff) = match request {
            MutationRequest::WriteFile { content, .. } => {
                let old_bytes = read_optional(primary)?;
                let hash_before = old_bytes.as_deref().map(ContentHash::of_bytes);
                let exists = old_bytes.is_some();

                let checkpoint_file = if exists {
                    self.checkpoint_first_touch(conversation, primary, old_bytes.as_deref())?
                } else {
                    None
                };

                fs::write(primary, content.as_bytes())?;
                let hash_after = ContentHash::of_bytes(content.as_bytes());

                let old_text = old_bytes
                    .as_deref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                let diff_file =
                    self.record_diff(conversation, &edit_id, &old_text, content, &label)?;

                let op = if exists {
                    EditOp::Replace {
                        file_path: primary.to_path_buf(),
                        diff_file,
                        checkpoint_file,
                    }
                } else {
                    EditOp::Create {
                        file_path: primary.to_path_buf(),
                        diff_file,
                    }
                };
                let message = format!("Successfully wrote to {label}");
                (op, hash_before, Some(hash_after), message, None)
            }

            MutationRequest::EditLines { edits, dry_run, .. } => {
                let old_bytes = read_required(primary)?;
                let old_text = String::from_utf8_lossy(&old_bytes).into_owned();
                let new_text = apply_line_edits(&old_text, edits)?;
                self.finish_edit(
                    conversation,
                    &edit_id,
                    primary,
                    &label,
                    &old_bytes,
                    &old_text,
                    new_text,
                    *dry_run,
                    edits.len(),
                )?
            }

            MutationRequest::EditContent { spec, dry_run, .. } => {
                let old_bytes = read_required(primary)?;
                let old_text = String::from_utf8_lossy(&old_bytes).into_owned();
                let new_text = apply_content_edits(primary, &old_text, spec)?;
                let op_count = spec.replacements.len() + spec.inserts.len();
                self.finish_edit(
                    conversation,
                    &edit_id,
                    primary,
                    &label,
                    &old_bytes,
                    &old_text,
                    new_text,
                    *dry_run,
                    op_count,
                )?
            }

            MutationRequest::DeleteFile { .. } => {
                let old_bytes = read_required(primary)?;
                let hash_before = ContentHash::of_bytes(&old_bytes);
                let checkpoint_file =
                    self.checkpoint_first_touch(conversation, primary, Some(&old_bytes))?;

                fs::remove_file(primary)?;

                let op = EditOp::Delete {
                    file_path: primary.to_path_buf(),
                    checkpoint_file,
                };
                let message = format!("Deleted {label}");
                (op, Some(hash_before), None, message, None)
            }

            MutationRequest::MoveFile { .. } => {
                let source = source.expect("move request carries a source path");
                let source_bytes = read_required(source)?;
                if primary.exists() {
                    return Err(HistoryError::FileExists {
                        path: primary.to_path_buf(),
                    });
                }
                let hash = ContentHash::of_bytes(&source_bytes);
                let checkpoint_file =
                    self.checkpoint_first_touch(conversation, source, Some(&source_bytes))?;

                fs::rename(source, primary)?;

                let source_label = store.workspace_relative(source);
                let op = EditOp::Move {
                    file_path: primary.to_path_buf(),
                    source_path: source.to_path_buf(),
                    checkpoint_file,
                };
                let message = format!("Moved {source_label} to {label}");
                (op, Some(hash), Some(hash), message, None)
            }
        };

        if let Some(diff) = dry_run_diff {
            // Dry run: validated, locked, hashed - but nothing recorded.
            return Ok(TrackOutcome {
                edit_id: None,
                conversation_id: conversation.clone(),
                started_conversation: started,
                operation: op.kind(),
                message,
                dry_run_diff: Some(diff),
            });
        }

        let entry = EditEntry {
            edit_id: edit_id.clone(),
            conversation_id: conversation.clone(),
            tool_call_index,
            timestamp: Utc::now(),
            op,
            tool_name: request.tool_name().to_string(),
            status: EditStatus::Pending,
            hash_before,
            hash_after,
            updated_at: None,
        };
        store.append_entry(&entry)?;
        debug!(edit_id = %edit_id, conversation = %conversation, index = tool_call_index, "tracked mutation");

        if started {
            message.push_str(&format!(" (conversation {conversation})"));
        }

        Ok(TrackOutcome {
            edit_id: Some(edit_id),
            conversation_id: conversation.clone(),
            started_conversation: started,
            operation: entry.op.kind(),
            message,
            dry_run_diff: None,
        })
    }

    /// Shared tail of the two in-place edit shapes.
    #[allow(clippy::too_many_arguments)]
    fn finish_edit(
        &self,
        conversation: &ConversationId,
        edit_id: &EditId,
        primary: &Path,
        label: &str,
        old_bytes: &[u8],
        old_text: &str,
        new_text: String,
        dry_run: bool,
        op_count: usize,
    ) -> Result<(
        EditOp,
        Option<ContentHash>,
        Option<ContentHash>,
        String,
        Option<String>,
    )> {
        let hash_before = ContentHash::of_bytes(old_bytes);

        if dry_run {
            let diff = generate_diff(old_text, &new_text, label);
            let op = EditOp::Edit {
                file_path: primary.to_path_buf(),
                diff_file: None,
                checkpoint_file: None,
            };
            let message = format!("Validated {op_count} edit operation(s) for {label}");
            return Ok((op, Some(hash_before), Some(hash_before), message, Some(diff)));
        }

        let checkpoint_file = self.checkpoint_first_touch(conversation, primary, Some(old_bytes))?;
        fs::write(primary, new_text.as_bytes())?;
        let hash_after = ContentHash::of_bytes(new_text.as_bytes());
        let diff_file = self.record_diff(conversation, edit_id, old_text, &new_text, label)?;

        let op = EditOp::Edit {
            file_path: primary.to_path_buf(),
            diff_file,
            checkpoint_file,
        };
        let message = format!("Applied {op_count} edit operation(s) to {label}");
        Ok((op, Some(hash_before), Some(hash_after), message, None))
    }

    /// Writes a checkpoint when this is the conversation's first touch of
    /// the logical file.
    fn checkpoint_first_touch(
        &self,
        conversation: &ConversationId,
        path: &Path,
        bytes: Option<&[u8]>,
    ) -> Result<Option<String>> {
        let store = &self.engine.store;
        let prior = store.read_log(conversation)?;
        if prior.iter().any(|e| e.touches(path)) {
            return Ok(None);
        }
        match bytes {
            Some(bytes) => Ok(Some(store.write_checkpoint(conversation, path, bytes)?)),
            None => Ok(None),
        }
    }

    /// Generates and stores the diff when content changed.
    fn record_diff(
        &self,
        conversation: &ConversationId,
        edit_id: &EditId,
        old: &str,
        new: &str,
        label: &str,
    ) -> Result<Option<String>> {
        if old == new {
            return Ok(None);
        }
        let diff = generate_diff(old, new, label);
        if diff.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.engine.store.write_diff(conversation, edit_id, &diff)?))
    }
}

/// Reads a file that may be absent.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads a file that must exist.
fn read_required(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(HistoryError::FileMissing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}
