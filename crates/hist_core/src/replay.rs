//! Deterministic file-state reconstruction from the edit history.
//!
//! Replay rebuilds one logical file from its checkpoint forward, honouring
//! each edit's (possibly proposed) status: `accepted` and `pending` apply,
//! `rejected` is skipped. Work happens on an in-memory buffer and splits
//! into two phases: [`prepare_replay`] proves the chain replays cleanly
//! (restoring the file's base state on failure, so a half-built file never
//! survives), and [`commit_replay`] materializes the result. The reviewer
//! prepares every affected file before committing any of them, which keeps
//! a multi-file conversation all-or-nothing on the verification side.

use crate::diff::apply_diff;
use crate::entry::{ConversationId, EditEntry, EditStatus, OperationKind};
use crate::error::{HistoryError, Result};
use crate::hash::{describe_hash, ContentHash};
use crate::lock::LockSet;
use crate::store::HistoryStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An on-disk state that disagrees with what the history predicts.
#[derive(Debug)]
pub struct ExternalChange {
    /// The file that was modified outside the engine.
    pub path: PathBuf,
    /// Hash the history predicts for the file (None = absent).
    pub expected: Option<ContentHash>,
    /// Hash found on disk (None = missing).
    pub actual: Option<ContentHash>,
    /// Unified diff from the predicted content to the on-disk content,
    /// when the predicted bytes could be reconstructed.
    pub diff: Option<String>,
}

/// Decision seam for interactive review questions.
///
/// The CLI implements this with a terminal prompt; tests inject fixed
/// answers.
pub trait ReviewPrompt {
    /// May the externally modified content be discarded and overwritten by
    /// the replayed state?
    fn confirm_discard(&self, change: &ExternalChange) -> bool;

    /// Pick one index out of several candidates for an ambiguous id
    /// prefix; None cancels.
    fn choose(&self, prompt: &str, candidates: &[String]) -> Option<usize>;
}

/// A prompt that refuses every question: safe for non-interactive paths.
pub struct DenyAll;

impl ReviewPrompt for DenyAll {
    fn confirm_discard(&self, _change: &ExternalChange) -> bool {
        false
    }

    fn choose(&self, _prompt: &str, _candidates: &[String]) -> Option<usize> {
        None
    }
}

/// A prompt that consents to every question: for forced, scripted flows.
pub struct AcceptAll;

impl ReviewPrompt for AcceptAll {
    fn confirm_discard(&self, _change: &ExternalChange) -> bool {
        true
    }

    fn choose(&self, _prompt: &str, _candidates: &[String]) -> Option<usize> {
        Some(0)
    }
}

/// Result of replaying one logical file.
#[derive(Debug)]
pub struct ReplayOutcome {
    /// Where the file ended up (its traced final name).
    pub final_path: PathBuf,
    /// Hash of the materialized content; None when the final state is
    /// "absent".
    pub final_hash: Option<ContentHash>,
    /// Non-fatal final-verification complaint, when one was logged.
    pub warning: Option<String>,
}

/// Collects every name the logical file bears inside the conversation.
///
/// Starting from `target`, move entries are chased in both directions to a
/// fixed point: backward (a move whose destination is known adds its
/// source) and forward (a move whose source is known adds its
/// destination).
pub fn trace_names(entries: &[EditEntry], target: &Path) -> Vec<PathBuf> {
    let mut names: Vec<PathBuf> = vec![target.to_path_buf()];
    loop {
        let mut grew = false;
        for entry in entries {
            if entry.op.kind() != OperationKind::Move {
                continue;
            }
            let dest = entry.op.file_path();
            let source = match entry.op.source_path() {
                Some(s) => s,
                None => continue,
            };
            if names.iter().any(|n| n == dest) && !names.iter().any(|n| n == source) {
                names.push(source.to_path_buf());
                grew = true;
            }
            if names.iter().any(|n| n == source) && !names.iter().any(|n| n == dest) {
                names.push(dest.to_path_buf());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    names.sort();
    names
}

/// The entries of a conversation that touch any of the traced names,
/// ascending by index.
fn relevant_entries<'a>(entries: &'a [EditEntry], names: &[PathBuf]) -> Vec<&'a EditEntry> {
    entries
        .iter()
        .filter(|e| names.iter().any(|n| e.touches(n)))
        .collect()
}

/// The name the file had before the conversation touched it.
fn original_name(first: &EditEntry) -> PathBuf {
    first
        .op
        .source_path()
        .unwrap_or(first.op.file_path())
        .to_path_buf()
}

/// Loads the base state the replay starts from.
///
/// A leading `create` starts from "absent". Anything else needs the
/// checkpoint taken at the conversation's first touch; a missing one is
/// `MissingCheckpoint`.
fn locate_base(
    store: &HistoryStore,
    conversation: &ConversationId,
    relevant: &[&EditEntry],
) -> Result<Option<Vec<u8>>> {
    let first = relevant.first().expect("relevant set is never empty here");
    if first.op.kind() == OperationKind::Create {
        return Ok(None);
    }

    let original = original_name(first);
    let rel = first
        .op
        .checkpoint_file()
        .map(str::to_string)
        .unwrap_or_else(|| store.checkpoint_rel(conversation, &original));

    match store.read_checkpoint(&rel) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(HistoryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(HistoryError::MissingCheckpoint {
                path: original,
                conversation_id: conversation.to_string(),
                edit_id: first.edit_id.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

/// The in-memory state a replay pass produces.
struct ReplayState {
    /// Reconstructed content; None means "file absent".
    buffer: Option<String>,
    /// The logical path after applied moves.
    path: PathBuf,
    /// True once a rejected entry was skipped; from then on the recorded
    /// hash chain no longer describes the buffer.
    diverged: bool,
    /// `hash_after` of the last applied entry.
    last_recorded: Option<ContentHash>,
    /// Whether any entry was applied at all.
    applied_any: bool,
}

impl ReplayState {
    fn buffer_hash(&self) -> Option<ContentHash> {
        self.buffer
            .as_ref()
            .map(|b| ContentHash::of_bytes(b.as_bytes()))
    }
}

/// Runs the replay loop over an in-memory buffer. No disk writes.
fn run_replay(
    store: &HistoryStore,
    relevant: &[&EditEntry],
    base: &Option<Vec<u8>>,
    original: &Path,
) -> Result<ReplayState> {
    let mut state = ReplayState {
        buffer: base
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned()),
        path: original.to_path_buf(),
        diverged: false,
        last_recorded: None,
        applied_any: false,
    };

    for entry in relevant {
        if !state.diverged {
            let have = state.buffer_hash();
            if have != entry.hash_before {
                return Err(HistoryError::InternalHashDrift {
                    edit_id: entry.edit_id.to_string(),
                    expected: describe_hash(entry.hash_before),
                    actual: describe_hash(have),
                });
            }
        }

        if entry.status == EditStatus::Rejected {
            debug!(edit_id = %entry.edit_id, "skipping rejected edit");
            state.diverged = true;
            continue;
        }

        match entry.op.kind() {
            OperationKind::Create | OperationKind::Replace | OperationKind::Edit => {
                let base_text = match (&state.buffer, entry.op.kind()) {
                    (Some(text), _) => text.clone(),
                    (None, OperationKind::Create) => String::new(),
                    (None, _) => {
                        // The file's base was "absent" (its create was
                        // rejected); this edit has no state to patch.
                        return Err(HistoryError::MissingCheckpoint {
                            path: state.path.clone(),
                            conversation_id: entry.conversation_id.to_string(),
                            edit_id: entry.edit_id.to_string(),
                        });
                    }
                };
                let new_text = match entry.op.diff_file() {
                    Some(rel) => {
                        let diff = store.read_diff(rel)?;
                        apply_diff(&base_text, &diff).map_err(|e| match e {
                            HistoryError::PatchContextMismatch {
                                line,
                                expected,
                                found,
                                ..
                            } => HistoryError::PatchContextMismatch {
                                edit_id: Some(entry.edit_id.to_string()),
                                line,
                                expected,
                                found,
                            },
                            other => other,
                        })?
                    }
                    // No diff recorded: the op did not change content.
                    None => base_text,
                };
                state.buffer = Some(new_text);
            }
            OperationKind::Delete => {
                state.buffer = None;
            }
            OperationKind::Move => {
                state.path = entry.op.file_path().to_path_buf();
            }
        }

        state.last_recorded = entry.hash_after;
        state.applied_any = true;
    }

    Ok(state)
}

/// A verified replay, holding its locks, ready to materialize.
pub struct PreparedReplay {
    conversation: ConversationId,
    names: Vec<PathBuf>,
    state: ReplayState,
    _locks: LockSet,
}

impl PreparedReplay {
    /// The traced final name of the file.
    pub fn final_path(&self) -> &Path {
        &self.state.path
    }
}

/// Verifies that one logical file replays cleanly under `proposed`
/// statuses. Nothing is materialized yet; the returned value holds the
/// file locks until [`commit_replay`].
///
/// `proposed` is the full entry list of the conversation with the statuses
/// under consideration (which may differ from the persisted log); `target`
/// names the file by any name it bears inside the conversation.
///
/// On a replay failure the file's base state is restored on disk (never a
/// half-built file) and the error names the offending edit.
pub fn prepare_replay(
    store: &HistoryStore,
    proposed: &[EditEntry],
    target: &Path,
    prompt: &dyn ReviewPrompt,
) -> Result<PreparedReplay> {
    let conversation = match proposed.first() {
        Some(entry) => entry.conversation_id.clone(),
        None => return Err(HistoryError::NoMatch(target.display().to_string())),
    };

    let names = trace_names(proposed, target);
    let relevant = relevant_entries(proposed, &names);
    if relevant.is_empty() {
        return Err(HistoryError::NoMatch(target.display().to_string()));
    }

    let original = original_name(relevant[0]);
    let base = locate_base(store, &conversation, &relevant)?;

    let locks = LockSet::acquire_all(
        &names,
        store.config().locks.timeout(),
        store.config().locks.stale_min_age(),
    )?;

    // What the history says the disk should currently hold: the persisted
    // statuses replayed in memory when this conversation was the last
    // toucher, else the last toucher's recorded post-hash.
    let persisted = store.read_log(&conversation)?;
    let relevant_persisted = relevant_entries(&persisted, &names);
    let persisted_state = run_replay(store, &relevant_persisted, &base, &original).ok();

    preflight(store, &conversation, &names, persisted_state.as_ref(), prompt)?;

    match run_replay(store, &relevant, &base, &original) {
        Ok(state) => Ok(PreparedReplay {
            conversation,
            names,
            state,
            _locks: locks,
        }),
        Err(err) => {
            // Never leave a half-built file: fall back to the base state.
            for name in &names {
                remove_if_present(name)?;
            }
            if let Some(bytes) = &base {
                fs::write(&original, bytes)?;
            }
            warn!(error = %err, file = %original.display(), "replay failed, base state restored");
            Err(err)
        }
    }
}

/// Materializes a prepared replay: safety snapshots, then the final state.
pub fn commit_replay(store: &HistoryStore, prepared: PreparedReplay) -> Result<ReplayOutcome> {
    let PreparedReplay {
        conversation,
        names,
        state,
        _locks,
    } = prepared;

    // Pre-replay safety snapshots of everything about to be touched.
    for name in &names {
        if let Some(bytes) = read_optional(name)? {
            store.write_revert_snapshot(&conversation, name, &bytes)?;
        }
    }

    let warning = final_verification(&state);

    for name in &names {
        remove_if_present(name)?;
    }
    if let Some(content) = &state.buffer {
        fs::write(&state.path, content.as_bytes())?;
    }

    Ok(ReplayOutcome {
        final_hash: state.buffer_hash(),
        final_path: state.path,
        warning,
    })
}

/// Prepares and immediately commits a single file's replay.
pub fn replay_file(
    store: &HistoryStore,
    proposed: &[EditEntry],
    target: &Path,
    prompt: &dyn ReviewPrompt,
) -> Result<ReplayOutcome> {
    let prepared = prepare_replay(store, proposed, target, prompt)?;
    commit_replay(store, prepared)
}

/// Step-8 verification: the buffer must land on the recorded chain unless
/// a rejection tail explains the difference.
fn final_verification(state: &ReplayState) -> Option<String> {
    if state.diverged || !state.applied_any {
        return None;
    }
    let have = state.buffer_hash();
    if have != state.last_recorded {
        let msg = format!(
            "replayed content of {} hashes to {} but the log records {}",
            state.path.display(),
            describe_hash(have),
            describe_hash(state.last_recorded),
        );
        warn!("{msg}");
        return Some(msg);
    }
    None
}

/// Hash-integrity preflight: detects files altered outside the engine.
fn preflight(
    store: &HistoryStore,
    conversation: &ConversationId,
    names: &[PathBuf],
    persisted_state: Option<&ReplayState>,
    prompt: &dyn ReviewPrompt,
) -> Result<()> {
    let all = store.read_all_entries()?;
    let last_toucher = all
        .iter()
        .rev()
        .find(|e| names.iter().any(|n| e.touches(n)));

    let (check_path, expected, expected_text): (PathBuf, Option<ContentHash>, Option<String>) =
        match last_toucher {
            None => return Ok(()),
            Some(last) if last.conversation_id == *conversation => match persisted_state {
                Some(state) => (
                    state.path.clone(),
                    state.buffer_hash(),
                    state.buffer.clone(),
                ),
                // The persisted chain could not be reconstructed; there is
                // nothing trustworthy to compare against.
                None => return Ok(()),
            },
            Some(last) => (last.op.file_path().to_path_buf(), last.hash_after, None),
        };

    let actual = ContentHash::of_file(&check_path)?;
    if actual == expected {
        return Ok(());
    }

    let diff = match (&expected_text, read_optional(&check_path)?) {
        (Some(expected_text), Some(disk_bytes)) => {
            let disk_text = String::from_utf8_lossy(&disk_bytes).into_owned();
            Some(crate::diff::generate_diff(
                expected_text,
                &disk_text,
                &store.workspace_relative(&check_path),
            ))
        }
        _ => None,
    };

    let change = ExternalChange {
        path: check_path.clone(),
        expected,
        actual,
        diff,
    };

    if prompt.confirm_discard(&change) {
        warn!(file = %check_path.display(), "discarding external changes at reviewer's request");
        return Ok(());
    }

    Err(HistoryError::HashMismatchExternal {
        path: check_path,
        expected: describe_hash(expected),
        actual: describe_hash(actual),
    })
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
