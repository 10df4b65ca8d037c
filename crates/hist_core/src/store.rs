//! On-disk history store under `.mcp/edit_history/`.
//!
//! Layout:
//!
//! ```text
//! <workspace>/.mcp/edit_history/
//!   logs/<conversation_id>.log           append-only JSON lines
//!   diffs/<conversation_id>/<edit_id>.diff
//!   checkpoints/<conversation_id>/<sanitized_path>.chkpt
//! ```
//!
//! Logs are append-only for new entries; status flips rewrite the whole
//! file behind a temp-file-plus-rename commit point. Diffs and checkpoints
//! are write-once and need no locking beyond the atomic rename.

use crate::config::EngineConfig;
use crate::entry::{ConversationId, EditEntry, EditId, LogRecord};
use crate::error::{HistoryError, Result};
use crate::lock::{self, LockGuard};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Hidden subtree that marks a governed workspace.
pub const HISTORY_DIR: &str = ".mcp/edit_history";

const LOGS_DIR: &str = "logs";
const DIFFS_DIR: &str = "diffs";
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Extension of checkpoint files.
pub const CHECKPOINT_SUFFIX: &str = ".chkpt";

/// Extension of pre-replay safety snapshots.
pub const REVERT_SUFFIX: &str = ".chkpt.revert";

/// Filename length ceiling before hash-suffixed truncation kicks in.
const MAX_SANITIZED_LEN: usize = 200;

/// The engine's on-disk history store for one workspace.
pub struct HistoryStore {
    workspace_root: PathBuf,
    root: PathBuf,
    config: EngineConfig,
}

impl HistoryStore {
    /// Opens (creating if needed) the history store for a workspace.
    pub fn open(workspace_root: &Path) -> Result<Self> {
        let workspace_root = workspace_root.canonicalize()?;
        let root = workspace_root.join(HISTORY_DIR);
        fs::create_dir_all(root.join(LOGS_DIR))?;
        fs::create_dir_all(root.join(DIFFS_DIR))?;
        fs::create_dir_all(root.join(CHECKPOINTS_DIR))?;
        let config = EngineConfig::load(&root)?;
        Ok(Self {
            workspace_root,
            root,
            config,
        })
    }

    /// Walks upward from `start` to the first directory containing the
    /// history marker.
    pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
        let mut current = start.canonicalize().ok()?;
        loop {
            if current.join(HISTORY_DIR).is_dir() {
                return Some(current);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// The governed workspace root.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The history root (`<workspace>/.mcp/edit_history`).
    pub fn history_root(&self) -> &Path {
        &self.root
    }

    /// The loaded engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the lock timeout for this process (CLI `--timeout`).
    pub fn set_lock_timeout(&mut self, timeout_secs: u64) {
        self.config.locks.timeout_secs = timeout_secs;
    }

    /// Renders a path workspace-relative for diff labels and listings.
    pub fn workspace_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    // --- logs ---

    /// Path of a conversation's log file.
    pub fn log_path(&self, conversation: &ConversationId) -> PathBuf {
        self.root
            .join(LOGS_DIR)
            .join(format!("{}.log", conversation.as_str()))
    }

    /// Acquires the lock serializing writers of a conversation's log.
    pub fn lock_log(&self, conversation: &ConversationId) -> Result<LockGuard> {
        lock::acquire(
            &self.log_path(conversation),
            self.config.locks.timeout(),
            self.config.locks.stale_min_age(),
        )
    }

    /// Lists every conversation with a log file.
    pub fn conversations(&self) -> Result<Vec<ConversationId>> {
        let logs_dir = self.root.join(LOGS_DIR);
        let mut out = Vec::new();
        for entry in fs::read_dir(&logs_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "log") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push(ConversationId::new(stem));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Reads a conversation's entries, sorted by `tool_call_index`.
    ///
    /// Reading takes no lock: a concurrent appender can only leave an
    /// unterminated final line, which is discarded. Interior lines that do
    /// not parse are skipped with a warning rather than failing the read.
    pub fn read_log(&self, conversation: &ConversationId) -> Result<Vec<EditEntry>> {
        let path = self.log_path(conversation);
        if !path.is_file() {
            return Ok(Vec::new());
        }

        let bytes = fs::read(&path)?;
        let content = String::from_utf8_lossy(&bytes);
        let mut entries = Vec::new();

        for (i, line) in content.split_inclusive('\n').enumerate() {
            let terminated = line.ends_with('\n');
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(record) => match EditEntry::try_from(record) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!(log = %path.display(), line = i + 1, error = %e, "skipping invalid log entry");
                    }
                },
                Err(e) if !terminated => {
                    // Mid-append tail from a concurrent writer.
                    debug!(log = %path.display(), error = %e, "discarding unterminated trailing line");
                }
                Err(e) => {
                    warn!(log = %path.display(), line = i + 1, error = %e, "skipping unparseable log line");
                }
            }
        }

        entries.sort_by_key(|e| e.tool_call_index);
        Ok(entries)
    }

    /// Number of entries currently in a conversation's log.
    ///
    /// Callers deriving `tool_call_index` from this must hold the log lock
    /// until their entry is appended.
    pub fn entry_count(&self, conversation: &ConversationId) -> Result<u64> {
        Ok(self.read_log(conversation)?.len() as u64)
    }

    /// Appends one entry to its conversation's log.
    ///
    /// The caller must hold the log lock; the write is a single line plus
    /// fsync so readers never observe a torn record beyond an unterminated
    /// tail.
    pub fn append_entry(&self, entry: &EditEntry) -> Result<()> {
        let path = self.log_path(&entry.conversation_id);
        let record = LogRecord::from(entry);
        let mut line =
            serde_json::to_string(&record).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        debug!(edit_id = %entry.edit_id, log = %path.display(), "appended log entry");
        Ok(())
    }

    /// Rewrites a conversation's log in place, atomically, under its lock.
    ///
    /// This is the only in-place log mutation and exists solely for status
    /// flips; the rename is the commit point.
    pub fn rewrite_log(&self, conversation: &ConversationId, entries: &[EditEntry]) -> Result<()> {
        let path = self.log_path(conversation);
        let _guard = self.lock_log(conversation)?;

        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() > self.config.logs.warn_bytes {
                warn!(
                    log = %path.display(),
                    bytes = meta.len(),
                    "rewriting a log larger than the configured threshold"
                );
            }
        }

        let mut content = String::new();
        for entry in entries {
            let record = LogRecord::from(entry);
            content.push_str(
                &serde_json::to_string(&record)
                    .map_err(|e| HistoryError::Serialization(e.to_string()))?,
            );
            content.push('\n');
        }

        write_atomic(&path, content.as_bytes())
    }

    /// Reads every entry across all conversations, sorted chronologically
    /// (timestamp, then index).
    pub fn read_all_entries(&self) -> Result<Vec<EditEntry>> {
        let mut all = Vec::new();
        for conversation in self.conversations()? {
            all.extend(self.read_log(&conversation)?);
        }
        all.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.tool_call_index.cmp(&b.tool_call_index))
        });
        Ok(all)
    }

    // --- sanitization ---

    /// Maps an absolute workspace path to a safe checkpoint filename.
    ///
    /// Separators and unsafe bytes become `_`; names beyond the filesystem
    /// limit truncate and gain a hash suffix of the full sanitized name so
    /// distinct paths cannot collide. Paths outside the workspace fall back
    /// to the hash of the absolute path.
    pub fn sanitize_path(&self, path: &Path) -> String {
        let relative = match path.strip_prefix(&self.workspace_root) {
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => {
                warn!(path = %path.display(), "path not under workspace root, using hash name");
                return crate::hash::ContentHash::of_bytes(
                    path.to_string_lossy().as_bytes(),
                )
                .as_hex();
            }
        };

        let sanitized: String = relative
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized.len() > MAX_SANITIZED_LEN {
            let digest = crate::hash::ContentHash::of_bytes(sanitized.as_bytes());
            format!("{}_{}", &sanitized[..MAX_SANITIZED_LEN - 9], digest.short())
        } else {
            sanitized
        }
    }

    // --- checkpoints ---

    /// History-root-relative checkpoint path for (conversation, file).
    pub fn checkpoint_rel(&self, conversation: &ConversationId, path: &Path) -> String {
        format!(
            "{}/{}/{}{}",
            CHECKPOINTS_DIR,
            conversation.as_str(),
            self.sanitize_path(path),
            CHECKPOINT_SUFFIX
        )
    }

    /// Writes a checkpoint of `bytes` for (conversation, file).
    ///
    /// Idempotent: a checkpoint that already exists is left untouched, so
    /// the snapshot always reflects the conversation's first touch.
    pub fn write_checkpoint(
        &self,
        conversation: &ConversationId,
        path: &Path,
        bytes: &[u8],
    ) -> Result<String> {
        let rel = self.checkpoint_rel(conversation, path);
        let abs = self.root.join(&rel);
        if abs.exists() {
            return Ok(rel);
        }
        write_atomic(&abs, bytes)?;
        debug!(checkpoint = %rel, "wrote checkpoint");
        Ok(rel)
    }

    /// True when a checkpoint exists for (conversation, file).
    pub fn checkpoint_exists(&self, conversation: &ConversationId, path: &Path) -> bool {
        self.root.join(self.checkpoint_rel(conversation, path)).is_file()
    }

    /// Reads checkpoint bytes by history-root-relative path.
    pub fn read_checkpoint(&self, rel: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.root.join(rel))?)
    }

    /// Writes a pre-replay safety snapshot (`.chkpt.revert`), overwriting
    /// any earlier one for the same file.
    pub fn write_revert_snapshot(
        &self,
        conversation: &ConversationId,
        path: &Path,
        bytes: &[u8],
    ) -> Result<String> {
        let rel = format!(
            "{}/{}/{}{}",
            CHECKPOINTS_DIR,
            conversation.as_str(),
            self.sanitize_path(path),
            REVERT_SUFFIX
        );
        write_atomic(&self.root.join(&rel), bytes)?;
        Ok(rel)
    }

    // --- diffs ---

    /// History-root-relative diff path for an edit.
    pub fn diff_rel(&self, conversation: &ConversationId, edit: &EditId) -> String {
        format!(
            "{}/{}/{}.diff",
            DIFFS_DIR,
            conversation.as_str(),
            edit.as_str()
        )
    }

    /// Writes an edit's unified diff, atomically.
    pub fn write_diff(
        &self,
        conversation: &ConversationId,
        edit: &EditId,
        diff: &str,
    ) -> Result<String> {
        let rel = self.diff_rel(conversation, edit);
        write_atomic(&self.root.join(&rel), diff.as_bytes())?;
        Ok(rel)
    }

    /// Reads a diff by history-root-relative path.
    pub fn read_diff(&self, rel: &str) -> Result<String> {
        let bytes = fs::read(self.root.join(rel))?;
        String::from_utf8(bytes)
            .map_err(|e| HistoryError::Serialization(format!("diff is not UTF-8: {e}")))
    }
}

/// Writes bytes behind a temp-file + fsync + rename commit point.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| HistoryError::Serialization("artifact path has no parent".to_string()))?;
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(
        ".{}.tmp{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string()),
        std::process::id()
    ));

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    // fsync parent directory (Unix-specific for crash safety)
    #[cfg(unix)]
    {
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
    }

    Ok(())
}
