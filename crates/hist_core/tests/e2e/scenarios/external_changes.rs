use crate::harness::TestWorkspace;
use hist_core::{AcceptAll, EditStatus, ExternalChange, HistoryError, ReviewPrompt};
use std::sync::Mutex;

/// Prompt that consents and captures what it was shown.
struct Recording {
    seen: Mutex<Vec<String>>,
}

impl Recording {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl ReviewPrompt for Recording {
    fn confirm_discard(&self, change: &ExternalChange) -> bool {
        self.seen
            .lock()
            .unwrap()
            .push(change.diff.clone().unwrap_or_default());
        true
    }

    fn choose(&self, _prompt: &str, _candidates: &[String]) -> Option<usize> {
        Some(0)
    }
}

/// A manual edit between tracking and review is detected, and declining
/// leaves everything untouched.
#[test]
fn test_manual_edit_detected_and_decline_aborts() {
    let ws = TestWorkspace::with_files(&[("d.txt", "original\n")]).unwrap();
    let outcome = ws
        .lm_replace_text("d.txt", "original", "tracked", None)
        .unwrap();
    let conv = outcome.conversation_id.clone();

    // A human touches the file behind the engine's back.
    ws.human_write("d.txt", "manual interference\n").unwrap();

    let err = ws.reject_conversation(&conv).unwrap_err();
    assert!(
        matches!(err, HistoryError::HashMismatchExternal { .. }),
        "got {err:?}"
    );

    assert_eq!(ws.read("d.txt"), "manual interference\n");
    let entries = ws.entries(&conv);
    assert_eq!(entries[0].status, EditStatus::Pending);
}

/// Consenting discards the manual change and materializes the replayed
/// state; the prompt is shown a diff of the interference.
#[test]
fn test_manual_edit_discarded_on_consent() {
    let ws = TestWorkspace::with_files(&[("d.txt", "original\n")]).unwrap();
    let outcome = ws
        .lm_replace_text("d.txt", "original", "tracked", None)
        .unwrap();
    let conv = outcome.conversation_id.clone();

    ws.human_write("d.txt", "manual interference\n").unwrap();

    let prompt = Recording::new();
    ws.reject_conversation_with(&conv, &prompt).unwrap();

    // Reject of the only edit restores the checkpoint state.
    assert_eq!(ws.read("d.txt"), "original\n");
    let entries = ws.entries(&conv);
    assert_eq!(entries[0].status, EditStatus::Rejected);

    let seen = prompt.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(
        seen[0].contains("manual interference"),
        "prompt saw the external diff: {:?}",
        seen[0]
    );
}

/// An externally deleted file is interference too.
#[test]
fn test_external_deletion_detected() {
    let ws = TestWorkspace::with_files(&[("d.txt", "original\n")]).unwrap();
    let outcome = ws
        .lm_replace_text("d.txt", "original", "tracked", None)
        .unwrap();

    ws.human_delete("d.txt").unwrap();

    let err = ws
        .accept_edit(&TestWorkspace::edit_id(&outcome))
        .unwrap_err();
    assert!(matches!(err, HistoryError::HashMismatchExternal { .. }));
}

/// With consent, an accept over interference re-materializes the tracked
/// content.
#[test]
fn test_accept_over_interference_with_consent() {
    let ws = TestWorkspace::with_files(&[("d.txt", "original\n")]).unwrap();
    let outcome = ws
        .lm_replace_text("d.txt", "original", "tracked", None)
        .unwrap();

    ws.human_write("d.txt", "manual interference\n").unwrap();

    hist_core::Reviewer::new(ws.store())
        .set_edit_status(
            &TestWorkspace::edit_id(&outcome),
            EditStatus::Accepted,
            &AcceptAll,
        )
        .unwrap();

    assert_eq!(ws.read("d.txt"), "tracked\n");
}

/// A pre-replay safety snapshot of the interfered state is kept for
/// manual recovery.
#[test]
fn test_revert_snapshot_preserves_overwritten_state() {
    let ws = TestWorkspace::with_files(&[("d.txt", "original\n")]).unwrap();
    let outcome = ws
        .lm_replace_text("d.txt", "original", "tracked", None)
        .unwrap();
    let conv = outcome.conversation_id.clone();

    ws.human_write("d.txt", "manual interference\n").unwrap();

    let prompt = Recording::new();
    ws.reject_conversation_with(&conv, &prompt).unwrap();

    let rel = format!(
        "checkpoints/{}/{}{}",
        conv.as_str(),
        "d.txt",
        hist_core::REVERT_SUFFIX
    );
    let snapshot = ws.store().read_checkpoint(&rel).unwrap();
    assert_eq!(snapshot, b"manual interference\n");
}
