use crate::harness::TestWorkspace;
use hist_core::{EditStatus, HistoryError};

/// Rejecting a create while keeping a later edit on the same file cannot
/// produce a sane state: the edit's base never existed.
#[test]
fn test_reject_create_under_later_edit_reports_missing_checkpoint() {
    let ws = TestWorkspace::new().unwrap();
    let create = ws.lm_write("b.txt", "one\ntwo\n", None).unwrap();
    let conv = create.conversation_id.clone();
    ws.lm_edit_lines("b.txt", &[("2", "TWO\n")], Some(&conv)).unwrap();

    let err = ws
        .reject_edit(&TestWorkspace::edit_id(&create))
        .unwrap_err();
    assert!(
        matches!(err, HistoryError::MissingCheckpoint { .. }),
        "got {err:?}"
    );

    // Replay-first means the failed flip never lands.
    let entries = ws.entries(&conv);
    assert!(entries.iter().all(|e| e.status == EditStatus::Pending));
    // No half-built file: the base state (absent) was restored.
    assert!(!ws.exists("b.txt"));
}

/// Rejecting the middle of a dependent chain fails patch context matching
/// and rolls everything back to the checkpoint.
#[test]
fn test_reject_middle_of_chain_rolls_back() {
    let ws = TestWorkspace::with_files(&[("c.txt", "A\n")]).unwrap();
    let first = ws.lm_write("c.txt", "B\n", None).unwrap();
    let conv = first.conversation_id.clone();
    let second = ws.lm_write("c.txt", "C\n", Some(&conv)).unwrap();
    ws.lm_write("c.txt", "D\n", Some(&conv)).unwrap();

    let err = ws
        .reject_edit(&TestWorkspace::edit_id(&second))
        .unwrap_err();
    assert!(
        matches!(err, HistoryError::PatchContextMismatch { .. }),
        "got {err:?}"
    );

    assert_eq!(ws.read("c.txt"), "A\n", "base state restored");
    let entries = ws.entries(&conv);
    assert!(
        entries.iter().all(|e| e.status == EditStatus::Pending),
        "the failed status flip was not persisted"
    );
}

/// Rejecting the middle edit together with everything after it is fine.
#[test]
fn test_reject_tail_of_chain_succeeds() {
    let ws = TestWorkspace::with_files(&[("c.txt", "A\n")]).unwrap();
    let first = ws.lm_write("c.txt", "B\n", None).unwrap();
    let conv = first.conversation_id.clone();
    let second = ws.lm_write("c.txt", "C\n", Some(&conv)).unwrap();
    let third = ws.lm_write("c.txt", "D\n", Some(&conv)).unwrap();

    ws.reject_edit(&TestWorkspace::edit_id(&third)).unwrap();
    assert_eq!(ws.read("c.txt"), "C\n");

    ws.reject_edit(&TestWorkspace::edit_id(&second)).unwrap();
    assert_eq!(ws.read("c.txt"), "B\n");
}

/// Accepting an edit and then rejecting it lands exactly where never
/// accepting it would have.
#[test]
fn test_status_toggles_are_idempotent() {
    let ws = TestWorkspace::with_files(&[("a.txt", "start\n")]).unwrap();
    let outcome = ws.lm_replace_text("a.txt", "start", "changed", None).unwrap();
    let edit = TestWorkspace::edit_id(&outcome);

    ws.accept_edit(&edit).unwrap();
    assert_eq!(ws.read("a.txt"), "changed\n");

    ws.reject_edit(&edit).unwrap();
    assert_eq!(ws.read("a.txt"), "start\n");

    ws.accept_edit(&edit).unwrap();
    assert_eq!(ws.read("a.txt"), "changed\n");

    ws.reject_edit(&edit).unwrap();
    assert_eq!(ws.read("a.txt"), "start\n");
}

/// A create-then-delete conversation leaves no file for every decision
/// combination that is internally consistent.
#[test]
fn test_create_then_delete_leaves_nothing() {
    // All accepted: the delete wins.
    let ws = TestWorkspace::new().unwrap();
    let create = ws.lm_write("t.txt", "temp\n", None).unwrap();
    let conv = create.conversation_id.clone();
    ws.lm_delete("t.txt", Some(&conv)).unwrap();
    ws.accept_conversation(&conv).unwrap();
    assert!(!ws.exists("t.txt"));

    // All rejected: nothing was ever applied.
    let ws = TestWorkspace::new().unwrap();
    let create = ws.lm_write("t.txt", "temp\n", None).unwrap();
    let conv = create.conversation_id.clone();
    ws.lm_delete("t.txt", Some(&conv)).unwrap();
    ws.reject_conversation(&conv).unwrap();
    assert!(!ws.exists("t.txt"));

    // Create rejected, delete accepted: still nothing.
    let ws = TestWorkspace::new().unwrap();
    let create = ws.lm_write("t.txt", "temp\n", None).unwrap();
    let conv = create.conversation_id.clone();
    let delete = ws.lm_delete("t.txt", Some(&conv)).unwrap();
    ws.reject_edit(&TestWorkspace::edit_id(&create)).unwrap();
    assert!(!ws.exists("t.txt"));
    ws.accept_edit(&TestWorkspace::edit_id(&delete)).unwrap();
    assert!(!ws.exists("t.txt"));
}

/// Move tracking: rejecting the conversation puts the file back under its
/// old name with its old content.
#[test]
fn test_move_and_edit_reject_restores_original_name() {
    let ws = TestWorkspace::with_files(&[("old.txt", "content\n")]).unwrap();
    let mv = ws.lm_move("old.txt", "new.txt", None).unwrap();
    let conv = mv.conversation_id.clone();
    ws.lm_replace_text("new.txt", "content", "CONTENT", Some(&conv))
        .unwrap();

    assert_eq!(ws.read("new.txt"), "CONTENT\n");

    ws.reject_conversation(&conv).unwrap();
    assert!(!ws.exists("new.txt"));
    assert_eq!(ws.read("old.txt"), "content\n");
}

#[test]
fn test_move_and_edit_accept_keeps_final_name() {
    let ws = TestWorkspace::with_files(&[("old.txt", "content\n")]).unwrap();
    let mv = ws.lm_move("old.txt", "new.txt", None).unwrap();
    let conv = mv.conversation_id.clone();
    ws.lm_replace_text("new.txt", "content", "CONTENT", Some(&conv))
        .unwrap();

    ws.accept_conversation(&conv).unwrap();
    assert!(!ws.exists("old.txt"));
    assert_eq!(ws.read("new.txt"), "CONTENT\n");
}

/// Rejecting a delete restores the file from its checkpoint.
#[test]
fn test_reject_delete_restores_file() {
    let ws = TestWorkspace::with_files(&[("keep.txt", "precious\n")]).unwrap();
    let delete = ws.lm_delete("keep.txt", None).unwrap();
    assert!(!ws.exists("keep.txt"));

    ws.reject_edit(&TestWorkspace::edit_id(&delete)).unwrap();
    assert_eq!(ws.read("keep.txt"), "precious\n");
}

/// Replaying a conversation accepted in full reproduces each recorded
/// post-hash on disk.
#[test]
fn test_accept_all_matches_recorded_hashes() {
    let ws = TestWorkspace::with_files(&[("f.txt", "v0\n")]).unwrap();
    let first = ws.lm_write("f.txt", "v1\n", None).unwrap();
    let conv = first.conversation_id.clone();
    ws.lm_write("f.txt", "v2\n", Some(&conv)).unwrap();

    let report = ws.accept_conversation(&conv).unwrap();
    let entries = ws.entries(&conv);
    let last_hash = entries.last().unwrap().hash_after;
    assert_eq!(report.files[0].final_hash, last_hash);
    assert!(report.files[0].warning.is_none());
    assert_eq!(ws.read("f.txt"), "v2\n");
}
