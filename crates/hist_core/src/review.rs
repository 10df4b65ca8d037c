//! Reviewer operations: listing, id resolution, accept/reject, cleanup.
//!
//! Status flips are replay-first, flip-on-success: every affected file is
//! verified (and only then materialized) before the log is rewritten, so a
//! failed replay never leaves a misleading status behind.

use crate::entry::{ConversationId, EditEntry, EditId, EditStatus, OperationKind};
use crate::error::{HistoryError, Result};
use crate::hash::ContentHash;
use crate::lock;
use crate::replay::{commit_replay, prepare_replay, trace_names, ReviewPrompt};
use crate::store::HistoryStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Filter over history entries, as driven by `status` flags.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Conversation id prefix (or suffix) to match.
    pub conversation: Option<String>,
    /// Substring of the file path to match.
    pub file: Option<String>,
    /// Exact status to match.
    pub status: Option<EditStatus>,
    /// Exact operation to match.
    pub operation: Option<OperationKind>,
    /// Only entries younger than this.
    pub max_age: Option<Duration>,
    /// Keep only the newest N entries; None lists everything.
    pub limit: Option<usize>,
}

/// Applies a filter, returning matches newest-first.
pub fn filter_entries(entries: &[EditEntry], filter: &EntryFilter, now: DateTime<Utc>) -> Vec<EditEntry> {
    let mut matched: Vec<&EditEntry> = entries
        .iter()
        .filter(|e| {
            if let Some(conv) = &filter.conversation {
                let conv = conv.to_lowercase();
                let id = e.conversation_id.as_str().to_lowercase();
                if !id.starts_with(&conv) && !id.ends_with(&conv) {
                    return false;
                }
            }
            if let Some(fragment) = &filter.file {
                let path = e.op.file_path().to_string_lossy().to_lowercase();
                let source = e
                    .op
                    .source_path()
                    .map(|p| p.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                let fragment = fragment.to_lowercase();
                if !path.contains(&fragment) && !source.contains(&fragment) {
                    return false;
                }
            }
            if let Some(status) = filter.status {
                if e.status != status {
                    return false;
                }
            }
            if let Some(op) = filter.operation {
                if e.op.kind() != op {
                    return false;
                }
            }
            if let Some(max_age) = filter.max_age {
                let cutoff = now
                    - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::zero());
                if e.timestamp < cutoff {
                    return false;
                }
            }
            true
        })
        .collect();

    // Newest first for display.
    matched.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then(b.tool_call_index.cmp(&a.tool_call_index))
    });

    if let Some(limit) = filter.limit {
        matched.truncate(limit);
    }
    matched.into_iter().cloned().collect()
}

/// Parses a compound time span such as `30s`, `5m`, `1h` or `3d1h30m`.
pub fn parse_time_span(input: &str) -> Result<Duration> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut any = false;

    for c in input.trim().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| bad_time_span(input))?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            _ => return Err(bad_time_span(input)),
        };
        total += value * unit;
        any = true;
    }

    if !digits.is_empty() || !any {
        return Err(bad_time_span(input));
    }
    Ok(Duration::from_secs(total))
}

fn bad_time_span(input: &str) -> HistoryError {
    HistoryError::InvalidSelector {
        selector: input.to_string(),
        reason: "time filter must look like 30s, 5m, 1h or 3d1h".to_string(),
    }
}

/// Outcome of resolving an id prefix: explicit variants instead of
/// control-flow exceptions.
#[derive(Debug)]
pub enum Resolution<T> {
    /// Exactly one entity matched.
    Unique(T),
    /// More than one entity matched; the caller decides.
    Ambiguous(Vec<T>),
    /// Nothing matched.
    None,
}

/// Resolves an edit-id prefix (case-insensitive). An exact match wins
/// over longer ids sharing the prefix.
pub fn resolve_edit_prefix<'a>(entries: &'a [EditEntry], prefix: &str) -> Resolution<&'a EditEntry> {
    let prefix_lower = prefix.to_lowercase();
    let matches: Vec<&EditEntry> = entries
        .iter()
        .filter(|e| e.edit_id.as_str().to_lowercase().starts_with(&prefix_lower))
        .collect();

    match matches.len() {
        0 => Resolution::None,
        1 => Resolution::Unique(matches[0]),
        _ => {
            if let Some(exact) = matches
                .iter()
                .find(|e| e.edit_id.as_str().eq_ignore_ascii_case(prefix))
            {
                return Resolution::Unique(*exact);
            }
            Resolution::Ambiguous(matches)
        }
    }
}

/// Resolves a conversation-id prefix; prefix matches win, with a suffix
/// fallback for ids people quote by their tail.
pub fn resolve_conversation_prefix(
    entries: &[EditEntry],
    prefix: &str,
) -> Resolution<ConversationId> {
    let prefix_lower = prefix.to_lowercase();
    let collect = |f: &dyn Fn(&str) -> bool| -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = entries
            .iter()
            .map(|e| e.conversation_id.clone())
            .filter(|c| f(&c.as_str().to_lowercase()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    };

    let mut matches = collect(&|id: &str| id.starts_with(&prefix_lower));
    if matches.is_empty() {
        matches = collect(&|id: &str| id.ends_with(&prefix_lower));
    }

    match matches.len() {
        0 => Resolution::None,
        1 => Resolution::Unique(matches.remove(0)),
        _ => Resolution::Ambiguous(matches),
    }
}

/// What a bare id argument resolved to.
#[derive(Debug, Clone)]
pub enum ReviewTarget {
    /// A single edit.
    Edit(EditId),
    /// A whole conversation.
    Conversation(ConversationId),
}

/// Resolves a bare id argument against edits first, then conversations.
///
/// An unambiguous edit-id prefix takes precedence; any ambiguity is put to
/// the prompt, and cancelling yields `AmbiguousId`.
pub fn resolve_target(
    entries: &[EditEntry],
    prefix: &str,
    prompt: &dyn ReviewPrompt,
) -> Result<ReviewTarget> {
    let edits = resolve_edit_prefix(entries, prefix);
    let conversations = resolve_conversation_prefix(entries, prefix);

    match (edits, conversations) {
        (Resolution::Unique(e), Resolution::None) | (Resolution::Unique(e), Resolution::Unique(_)) => {
            Ok(ReviewTarget::Edit(e.edit_id.clone()))
        }
        (Resolution::None, Resolution::Unique(c)) => Ok(ReviewTarget::Conversation(c)),
        (Resolution::None, Resolution::None) => Err(HistoryError::NoMatch(prefix.to_string())),
        (edits, conversations) => {
            // Overlapping or multi-way matches: let the user pick.
            let mut candidates: Vec<(ReviewTarget, String)> = Vec::new();
            match edits {
                Resolution::Unique(e) => candidates.push((
                    ReviewTarget::Edit(e.edit_id.clone()),
                    format!("edit {} ({} {})", e.edit_id.short(), e.op.kind(), e.op.file_path().display()),
                )),
                Resolution::Ambiguous(list) => {
                    for e in list {
                        candidates.push((
                            ReviewTarget::Edit(e.edit_id.clone()),
                            format!("edit {} ({} {})", e.edit_id.short(), e.op.kind(), e.op.file_path().display()),
                        ));
                    }
                }
                Resolution::None => {}
            }
            match conversations {
                Resolution::Unique(c) => candidates.push((
                    ReviewTarget::Conversation(c.clone()),
                    format!("conversation {}", c.short()),
                )),
                Resolution::Ambiguous(list) => {
                    for c in list {
                        candidates.push((
                            ReviewTarget::Conversation(c.clone()),
                            format!("conversation {}", c.short()),
                        ));
                    }
                }
                Resolution::None => {}
            }

            let labels: Vec<String> = candidates.iter().map(|(_, l)| l.clone()).collect();
            let count = candidates.len();
            match prompt.choose(&format!("'{prefix}' is ambiguous"), &labels) {
                Some(i) if i < count => Ok(candidates.swap_remove(i).0),
                _ => Err(HistoryError::AmbiguousId {
                    prefix: prefix.to_string(),
                    count,
                }),
            }
        }
    }
}

/// Per-file result of a status change.
#[derive(Debug)]
pub struct FileReplayReport {
    /// The file's final traced path.
    pub path: PathBuf,
    /// Hash of the materialized content; None when the file ended absent.
    pub final_hash: Option<ContentHash>,
    /// Non-fatal final-verification complaint.
    pub warning: Option<String>,
}

/// Result of an accept/reject operation.
#[derive(Debug)]
pub struct ReviewReport {
    /// The conversation whose log was rewritten.
    pub conversation: ConversationId,
    /// Edits whose status actually changed.
    pub changed: Vec<EditId>,
    /// Files re-materialized by the replay.
    pub files: Vec<FileReplayReport>,
}

/// Drives accept/reject decisions over a history store.
pub struct Reviewer<'a> {
    store: &'a HistoryStore,
}

impl<'a> Reviewer<'a> {
    /// A reviewer over the given store.
    pub fn new(store: &'a HistoryStore) -> Self {
        Self { store }
    }

    /// Flips one edit's status and re-materializes its file.
    pub fn set_edit_status(
        &self,
        edit_id: &EditId,
        status: EditStatus,
        prompt: &dyn ReviewPrompt,
    ) -> Result<ReviewReport> {
        let conversation = self.conversation_of(edit_id)?;
        let persisted = self.store.read_log(&conversation)?;

        let mut proposed = persisted.clone();
        let mut changed = Vec::new();
        let mut target = None;
        for entry in &mut proposed {
            if entry.edit_id == *edit_id {
                target = Some(entry.op.file_path().to_path_buf());
                if entry.status != status {
                    entry.status = status;
                    entry.updated_at = Some(Utc::now());
                    changed.push(entry.edit_id.clone());
                }
            }
        }
        let target = target.ok_or_else(|| HistoryError::NoMatch(edit_id.to_string()))?;

        if changed.is_empty() {
            debug!(edit_id = %edit_id, "status unchanged, nothing to do");
            return Ok(ReviewReport {
                conversation,
                changed,
                files: Vec::new(),
            });
        }

        self.replay_and_flip(&conversation, proposed, &[target], changed, prompt)
    }

    /// Flips every edit in a conversation and re-materializes all its
    /// files.
    pub fn set_conversation_status(
        &self,
        conversation: &ConversationId,
        status: EditStatus,
        prompt: &dyn ReviewPrompt,
    ) -> Result<ReviewReport> {
        let persisted = self.store.read_log(conversation)?;
        if persisted.is_empty() {
            return Err(HistoryError::NoMatch(conversation.to_string()));
        }

        let mut proposed = persisted.clone();
        let mut changed = Vec::new();
        for entry in &mut proposed {
            if entry.status != status {
                entry.status = status;
                entry.updated_at = Some(Utc::now());
                changed.push(entry.edit_id.clone());
            }
        }

        if changed.is_empty() {
            return Ok(ReviewReport {
                conversation: conversation.clone(),
                changed,
                files: Vec::new(),
            });
        }

        let targets = logical_files(&proposed);
        self.replay_and_flip(conversation, proposed, &targets, changed, prompt)
    }

    /// Replay-first, flip-on-success core shared by both shapes.
    fn replay_and_flip(
        &self,
        conversation: &ConversationId,
        proposed: Vec<EditEntry>,
        targets: &[PathBuf],
        changed: Vec<EditId>,
        prompt: &dyn ReviewPrompt,
    ) -> Result<ReviewReport> {
        // Verify every affected file before materializing any of them; a
        // failure here has already restored that file's base state and
        // leaves the log untouched.
        let mut prepared = Vec::with_capacity(targets.len());
        for target in targets {
            prepared.push(prepare_replay(self.store, &proposed, target, prompt)?);
        }

        let mut files = Vec::with_capacity(prepared.len());
        for p in prepared {
            let outcome = commit_replay(self.store, p)?;
            files.push(FileReplayReport {
                path: outcome.final_path,
                final_hash: outcome.final_hash,
                warning: outcome.warning,
            });
        }

        self.store.rewrite_log(conversation, &proposed)?;
        info!(
            conversation = %conversation,
            edits = changed.len(),
            files = files.len(),
            "review decision applied"
        );

        Ok(ReviewReport {
            conversation: conversation.clone(),
            changed,
            files,
        })
    }

    /// Pending entries oldest-first, optionally restricted to one
    /// conversation: the work list of the interactive review loop.
    pub fn pending_edits(&self, conversation: Option<&ConversationId>) -> Result<Vec<EditEntry>> {
        let mut entries = match conversation {
            Some(conv) => self.store.read_log(conv)?,
            None => self.store.read_all_entries()?,
        };
        entries.retain(|e| e.status == EditStatus::Pending);
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.tool_call_index.cmp(&b.tool_call_index))
        });
        Ok(entries)
    }

    /// Reclaims stale locks under the history root.
    pub fn cleanup(&self, min_age: Duration) -> Result<usize> {
        lock::cleanup_stale_locks(self.store.history_root(), min_age)
    }

    fn conversation_of(&self, edit_id: &EditId) -> Result<ConversationId> {
        for conversation in self.store.conversations()? {
            let entries = self.store.read_log(&conversation)?;
            if entries.iter().any(|e| e.edit_id == *edit_id) {
                return Ok(conversation);
            }
        }
        Err(HistoryError::NoMatch(edit_id.to_string()))
    }
}

/// One representative target path per logical file in the conversation.
fn logical_files(entries: &[EditEntry]) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = Vec::new();
    let mut covered: Vec<PathBuf> = Vec::new();

    for entry in entries {
        let path = entry.op.file_path();
        if covered.iter().any(|p| p == path) {
            continue;
        }
        let names = trace_names(entries, path);
        targets.push(path.to_path_buf());
        covered.extend(names);
    }

    // Deterministic processing (and lock acquisition) order.
    targets.sort();
    targets
}
