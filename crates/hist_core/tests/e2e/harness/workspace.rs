use anyhow::{Context, Result};
use hist_core::{
    ContentEdits, ConversationId, DenyAll, EditEntry, EditId, EditStatus, Engine, EngineConfig,
    HistoryStore, MutationRequest, ReviewPrompt, ReviewReport, Reviewer, TrackOutcome,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// An isolated workspace with a running engine.
pub struct TestWorkspace {
    _dir: TempDir,
    engine: Engine,
}

impl TestWorkspace {
    /// An empty governed workspace.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("failed to create temp workspace")?;

        // Tests fabricate stale locks and must reclaim them immediately.
        let history_root = dir.path().join(hist_core::HISTORY_DIR);
        fs::create_dir_all(&history_root)?;
        let config = EngineConfig {
            locks: hist_core::LockConfig {
                timeout_secs: 2,
                stale_min_age_secs: 0,
            },
            ..Default::default()
        };
        config.save(&history_root)?;

        let engine = Engine::open(dir.path())?;
        Ok(Self { _dir: dir, engine })
    }

    /// A workspace pre-seeded with untracked files.
    pub fn with_files(files: &[(&str, &str)]) -> Result<Self> {
        let workspace = Self::new()?;
        for (name, content) in files {
            workspace.human_write(name, content)?;
        }
        Ok(workspace)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn store(&self) -> &HistoryStore {
        self.engine.store()
    }

    /// Absolute path of a workspace file.
    pub fn abs(&self, name: &str) -> PathBuf {
        self.store().workspace_root().join(name)
    }

    // --- untracked actors ---

    /// A write outside the engine, as a human editor would do it.
    pub fn human_write(&self, name: &str, content: &str) -> Result<()> {
        let path = self.abs(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content.as_bytes())?;
        Ok(())
    }

    /// A deletion outside the engine.
    pub fn human_delete(&self, name: &str) -> Result<()> {
        fs::remove_file(self.abs(name))?;
        Ok(())
    }

    // --- tracked mutations ---

    pub fn lm_write(
        &self,
        name: &str,
        content: &str,
        conversation: Option<&ConversationId>,
    ) -> Result<TrackOutcome> {
        Ok(self.engine.tracker().track(
            MutationRequest::WriteFile {
                path: self.abs(name),
                content: content.to_string(),
            },
            conversation.cloned(),
        )?)
    }

    pub fn lm_edit_lines(
        &self,
        name: &str,
        edits: &[(&str, &str)],
        conversation: Option<&ConversationId>,
    ) -> Result<TrackOutcome> {
        let edits: BTreeMap<String, String> = edits
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(self.engine.tracker().track(
            MutationRequest::EditLines {
                path: self.abs(name),
                edits,
                dry_run: false,
            },
            conversation.cloned(),
        )?)
    }

    pub fn lm_replace_text(
        &self,
        name: &str,
        from: &str,
        to: &str,
        conversation: Option<&ConversationId>,
    ) -> Result<TrackOutcome> {
        let spec = ContentEdits {
            replacements: [(from.to_string(), to.to_string())].into(),
            ..Default::default()
        };
        Ok(self.engine.tracker().track(
            MutationRequest::EditContent {
                path: self.abs(name),
                spec,
                dry_run: false,
            },
            conversation.cloned(),
        )?)
    }

    pub fn lm_move(
        &self,
        from: &str,
        to: &str,
        conversation: Option<&ConversationId>,
    ) -> Result<TrackOutcome> {
        Ok(self.engine.tracker().track(
            MutationRequest::MoveFile {
                source: self.abs(from),
                destination: self.abs(to),
            },
            conversation.cloned(),
        )?)
    }

    pub fn lm_delete(
        &self,
        name: &str,
        conversation: Option<&ConversationId>,
    ) -> Result<TrackOutcome> {
        Ok(self.engine.tracker().track(
            MutationRequest::DeleteFile {
                path: self.abs(name),
            },
            conversation.cloned(),
        )?)
    }

    // --- review ---

    pub fn accept_edit(&self, edit: &EditId) -> hist_core::Result<ReviewReport> {
        Reviewer::new(self.store()).set_edit_status(edit, EditStatus::Accepted, &DenyAll)
    }

    pub fn reject_edit(&self, edit: &EditId) -> hist_core::Result<ReviewReport> {
        Reviewer::new(self.store()).set_edit_status(edit, EditStatus::Rejected, &DenyAll)
    }

    pub fn accept_conversation(
        &self,
        conversation: &ConversationId,
    ) -> hist_core::Result<ReviewReport> {
        Reviewer::new(self.store()).set_conversation_status(
            conversation,
            EditStatus::Accepted,
            &DenyAll,
        )
    }

    pub fn reject_conversation(
        &self,
        conversation: &ConversationId,
    ) -> hist_core::Result<ReviewReport> {
        Reviewer::new(self.store()).set_conversation_status(
            conversation,
            EditStatus::Rejected,
            &DenyAll,
        )
    }

    pub fn reject_conversation_with(
        &self,
        conversation: &ConversationId,
        prompt: &dyn ReviewPrompt,
    ) -> hist_core::Result<ReviewReport> {
        Reviewer::new(self.store()).set_conversation_status(
            conversation,
            EditStatus::Rejected,
            prompt,
        )
    }

    // --- assertions ---

    pub fn read(&self, name: &str) -> String {
        let path = self.abs(name);
        String::from_utf8(fs::read(&path).unwrap_or_else(|e| {
            panic!("could not read {}: {e}", path.display());
        }))
        .expect("test file is not UTF-8")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.abs(name).exists()
    }

    pub fn entries(&self, conversation: &ConversationId) -> Vec<EditEntry> {
        self.store().read_log(conversation).expect("readable log")
    }

    /// The single edit id of a one-edit outcome.
    pub fn edit_id(outcome: &TrackOutcome) -> EditId {
        outcome.edit_id.clone().expect("outcome has an edit id")
    }

    /// Checkpoint bytes for (conversation, file), when one was taken.
    pub fn checkpoint(&self, conversation: &ConversationId, name: &str) -> Option<Vec<u8>> {
        let path = self.abs(name);
        let rel = self.store().checkpoint_rel(conversation, &path);
        self.store().read_checkpoint(&rel).ok()
    }
}
