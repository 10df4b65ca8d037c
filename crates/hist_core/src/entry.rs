//! Log entry types: typed in-memory form and the flat wire record.
//!
//! In memory, operation-specific data lives in the `EditOp` sum so a move
//! cannot lose its source path and a delete cannot grow a diff. On the wire
//! each entry is one flat JSON object per log line; the conversion between
//! the two forms is explicit and validates the record invariants.

use crate::error::{HistoryError, Result};
use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Opaque identifier of a single recorded edit.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditId(String);

impl EditId {
    /// Generates a fresh collision-resistant id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EditId({})", self.short())
    }
}

/// Opaque identifier grouping the edits of one LM turn.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generates a fresh conversation id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({})", self.short())
    }
}

/// Review status of an edit. Never terminal: any edit may be re-classified
/// while its log exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditStatus {
    /// Recorded, not yet reviewed. Treated as applied during replay.
    Pending,
    /// Reviewer kept the edit.
    Accepted,
    /// Reviewer discarded the edit; replay skips it.
    Rejected,
}

impl fmt::Display for EditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EditStatus {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(HistoryError::Serialization(format!(
                "unknown status: {other}"
            ))),
        }
    }
}

/// The kind of a recorded operation, as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// New file written where none existed.
    Create,
    /// Whole-file overwrite of an existing file.
    Replace,
    /// In-place edit (line-selector or content-anchored).
    Edit,
    /// File removed.
    Delete,
    /// File renamed within the workspace.
    Move,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Replace => "replace",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Move => "move",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for OperationKind {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "replace" => Ok(Self::Replace),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            "move" | "rename" => Ok(Self::Move),
            other => Err(HistoryError::Serialization(format!(
                "unknown operation: {other}"
            ))),
        }
    }
}

/// Operation payload: one variant per operation, carrying exactly the
/// fields that operation records.
///
/// `diff_file` and `checkpoint_file` are paths relative to the history
/// root. A content op whose bytes did not change has no diff file; the
/// first touch of a pre-existing file in a conversation has a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// A file written where none existed. Never checkpointed: the base
    /// state is "absent".
    Create {
        /// Absolute path of the new file.
        file_path: PathBuf,
        /// Diff from empty to the created content.
        diff_file: Option<String>,
    },
    /// Whole-file overwrite.
    Replace {
        /// Absolute path of the overwritten file.
        file_path: PathBuf,
        /// Diff from the previous content.
        diff_file: Option<String>,
        /// Pre-state snapshot on first touch.
        checkpoint_file: Option<String>,
    },
    /// In-place edit.
    Edit {
        /// Absolute path of the edited file.
        file_path: PathBuf,
        /// Diff from the previous content.
        diff_file: Option<String>,
        /// Pre-state snapshot on first touch.
        checkpoint_file: Option<String>,
    },
    /// File removal.
    Delete {
        /// Absolute path of the removed file.
        file_path: PathBuf,
        /// Pre-state snapshot on first touch.
        checkpoint_file: Option<String>,
    },
    /// Rename within the workspace.
    Move {
        /// Absolute destination path.
        file_path: PathBuf,
        /// Absolute source path.
        source_path: PathBuf,
        /// Snapshot of the source on first touch.
        checkpoint_file: Option<String>,
    },
}

impl EditOp {
    /// The wire kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Replace { .. } => OperationKind::Replace,
            Self::Edit { .. } => OperationKind::Edit,
            Self::Delete { .. } => OperationKind::Delete,
            Self::Move { .. } => OperationKind::Move,
        }
    }

    /// The affected path (destination for moves).
    pub fn file_path(&self) -> &Path {
        match self {
            Self::Create { file_path, .. }
            | Self::Replace { file_path, .. }
            | Self::Edit { file_path, .. }
            | Self::Delete { file_path, .. }
            | Self::Move { file_path, .. } => file_path,
        }
    }

    /// The move source, when this is a move.
    pub fn source_path(&self) -> Option<&Path> {
        match self {
            Self::Move { source_path, .. } => Some(source_path),
            _ => None,
        }
    }

    /// The relative diff path, for content-changing ops that changed bytes.
    pub fn diff_file(&self) -> Option<&str> {
        match self {
            Self::Create { diff_file, .. }
            | Self::Replace { diff_file, .. }
            | Self::Edit { diff_file, .. } => diff_file.as_deref(),
            _ => None,
        }
    }

    /// The relative checkpoint path, when one was taken.
    pub fn checkpoint_file(&self) -> Option<&str> {
        match self {
            Self::Replace {
                checkpoint_file, ..
            }
            | Self::Edit {
                checkpoint_file, ..
            }
            | Self::Delete {
                checkpoint_file, ..
            }
            | Self::Move {
                checkpoint_file, ..
            } => checkpoint_file.as_deref(),
            Self::Create { .. } => None,
        }
    }
}

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditEntry {
    /// Globally unique edit id.
    pub edit_id: EditId,
    /// Conversation the edit belongs to.
    pub conversation_id: ConversationId,
    /// Dense position within the conversation, from 0.
    pub tool_call_index: u64,
    /// When the mutation was recorded.
    pub timestamp: DateTime<Utc>,
    /// The operation and its payload.
    pub op: EditOp,
    /// Name of the invoking mutation tool.
    pub tool_name: String,
    /// Current review status.
    pub status: EditStatus,
    /// Hash of the file before the operation; None if it did not exist.
    pub hash_before: Option<ContentHash>,
    /// Hash of the file after the operation; None if deleted.
    pub hash_after: Option<ContentHash>,
    /// Set when a reviewer last flipped the status.
    pub updated_at: Option<DateTime<Utc>>,
}

impl EditEntry {
    /// True when this entry touches `path` as target or move source.
    pub fn touches(&self, path: &Path) -> bool {
        self.op.file_path() == path || self.op.source_path() == Some(path)
    }
}

/// Millisecond-precision UTC wire timestamps with a `Z` suffix.
mod wire_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &DateTime<Utc>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`wire_time`], for `updated_at`.
mod wire_time_opt {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dt: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// The flat wire form of an entry: one JSON object per log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub edit_id: String,
    pub conversation_id: String,
    pub tool_call_index: u64,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
    pub operation: OperationKind,
    pub file_path: String,
    pub source_path: Option<String>,
    pub tool_name: String,
    pub status: EditStatus,
    pub diff_file: Option<String>,
    pub checkpoint_file: Option<String>,
    pub hash_before: Option<ContentHash>,
    pub hash_after: Option<ContentHash>,
    #[serde(default, with = "wire_time_opt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&EditEntry> for LogRecord {
    fn from(entry: &EditEntry) -> Self {
        Self {
            edit_id: entry.edit_id.as_str().to_string(),
            conversation_id: entry.conversation_id.as_str().to_string(),
            tool_call_index: entry.tool_call_index,
            timestamp: entry.timestamp,
            operation: entry.op.kind(),
            file_path: entry.op.file_path().to_string_lossy().into_owned(),
            source_path: entry
                .op
                .source_path()
                .map(|p| p.to_string_lossy().into_owned()),
            tool_name: entry.tool_name.clone(),
            status: entry.status,
            diff_file: entry.op.diff_file().map(str::to_string),
            checkpoint_file: entry.op.checkpoint_file().map(str::to_string),
            hash_before: entry.hash_before,
            hash_after: entry.hash_after,
            updated_at: entry.updated_at,
        }
    }
}

impl TryFrom<LogRecord> for EditEntry {
    type Error = HistoryError;

    fn try_from(rec: LogRecord) -> Result<Self> {
        let malformed = |reason: &str| HistoryError::MalformedEntry {
            edit_id: Some(rec.edit_id.clone()),
            reason: reason.to_string(),
        };

        if rec.source_path.is_some() && rec.operation != OperationKind::Move {
            return Err(malformed("source_path set on a non-move operation"));
        }
        if rec.hash_after.is_none() && rec.operation != OperationKind::Delete {
            return Err(malformed("null hash_after on a non-delete operation"));
        }
        if rec.hash_before.is_none() && rec.operation != OperationKind::Create {
            return Err(malformed("null hash_before on a non-create operation"));
        }
        if rec.diff_file.is_some()
            && matches!(rec.operation, OperationKind::Delete | OperationKind::Move)
        {
            return Err(malformed("diff_file set on a delete or move operation"));
        }

        let file_path = PathBuf::from(&rec.file_path);
        let op = match rec.operation {
            OperationKind::Create => {
                if rec.checkpoint_file.is_some() {
                    return Err(malformed("checkpoint_file set on a create operation"));
                }
                EditOp::Create {
                    file_path,
                    diff_file: rec.diff_file,
                }
            }
            OperationKind::Replace => EditOp::Replace {
                file_path,
                diff_file: rec.diff_file,
                checkpoint_file: rec.checkpoint_file,
            },
            OperationKind::Edit => EditOp::Edit {
                file_path,
                diff_file: rec.diff_file,
                checkpoint_file: rec.checkpoint_file,
            },
            OperationKind::Delete => EditOp::Delete {
                file_path,
                checkpoint_file: rec.checkpoint_file,
            },
            OperationKind::Move => EditOp::Move {
                file_path,
                source_path: PathBuf::from(
                    rec.source_path
                        .as_ref()
                        .ok_or_else(|| malformed("move operation without source_path"))?,
                ),
                checkpoint_file: rec.checkpoint_file,
            },
        };

        Ok(EditEntry {
            edit_id: EditId::new(rec.edit_id),
            conversation_id: ConversationId::new(rec.conversation_id),
            tool_call_index: rec.tool_call_index,
            timestamp: rec.timestamp,
            op,
            tool_name: rec.tool_name,
            status: rec.status,
            hash_before: rec.hash_before,
            hash_after: rec.hash_after,
            updated_at: rec.updated_at,
        })
    }
}
