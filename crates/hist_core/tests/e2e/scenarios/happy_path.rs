use crate::harness::TestWorkspace;
use hist_core::{ContentHash, EditStatus, OperationKind};

#[test]
fn test_anchored_edit_records_full_history() {
    let ws = TestWorkspace::with_files(&[("a.txt", "hello\n")]).unwrap();

    let outcome = ws.lm_replace_text("a.txt", "hello", "world", None).unwrap();
    assert!(outcome.started_conversation);

    assert_eq!(ws.read("a.txt"), "world\n");

    let entries = ws.entries(&outcome.conversation_id);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.status, EditStatus::Pending);
    assert_eq!(entry.op.kind(), OperationKind::Edit);
    assert_eq!(entry.hash_before, Some(ContentHash::of_bytes(b"hello\n")));
    assert_eq!(entry.hash_after, Some(ContentHash::of_bytes(b"world\n")));
    assert!(entry.op.diff_file().is_some());

    let checkpoint = ws
        .checkpoint(&outcome.conversation_id, "a.txt")
        .expect("first touch wrote a checkpoint");
    assert_eq!(checkpoint, b"hello\n");
}

#[test]
fn test_accept_keeps_new_content() {
    let ws = TestWorkspace::with_files(&[("a.txt", "hello\n")]).unwrap();
    let outcome = ws.lm_replace_text("a.txt", "hello", "world", None).unwrap();

    let report = ws.accept_edit(&TestWorkspace::edit_id(&outcome)).unwrap();
    assert_eq!(report.changed.len(), 1);

    assert_eq!(ws.read("a.txt"), "world\n");
    let entries = ws.entries(&outcome.conversation_id);
    assert_eq!(entries[0].status, EditStatus::Accepted);
    assert!(entries[0].updated_at.is_some());
}

#[test]
fn test_reject_restores_checkpoint_content() {
    let ws = TestWorkspace::with_files(&[("a.txt", "hello\n")]).unwrap();
    let outcome = ws.lm_replace_text("a.txt", "hello", "world", None).unwrap();

    ws.reject_edit(&TestWorkspace::edit_id(&outcome)).unwrap();

    assert_eq!(ws.read("a.txt"), "hello\n");
    let entries = ws.entries(&outcome.conversation_id);
    assert_eq!(entries[0].status, EditStatus::Rejected);
    // The checkpoint is never deleted.
    assert!(ws.checkpoint(&outcome.conversation_id, "a.txt").is_some());
}

#[test]
fn test_create_accept_and_reject() {
    let ws = TestWorkspace::new().unwrap();
    let outcome = ws.lm_write("new.txt", "fresh\n", None).unwrap();
    assert_eq!(outcome.operation, OperationKind::Create);
    assert_eq!(ws.read("new.txt"), "fresh\n");

    ws.accept_edit(&TestWorkspace::edit_id(&outcome)).unwrap();
    assert_eq!(ws.read("new.txt"), "fresh\n");

    ws.reject_edit(&TestWorkspace::edit_id(&outcome)).unwrap();
    assert!(!ws.exists("new.txt"), "rejected create removes the file");
}

#[test]
fn test_multi_file_conversation_reject_restores_everything() {
    let ws = TestWorkspace::with_files(&[("a.txt", "alpha\n"), ("b.txt", "beta\n")]).unwrap();

    let first = ws.lm_replace_text("a.txt", "alpha", "ALPHA", None).unwrap();
    let conv = first.conversation_id.clone();
    ws.lm_replace_text("b.txt", "beta", "BETA", Some(&conv)).unwrap();
    ws.lm_write("c.txt", "gamma\n", Some(&conv)).unwrap();

    let report = ws.reject_conversation(&conv).unwrap();
    assert_eq!(report.changed.len(), 3);
    assert_eq!(report.files.len(), 3);

    assert_eq!(ws.read("a.txt"), "alpha\n");
    assert_eq!(ws.read("b.txt"), "beta\n");
    assert!(!ws.exists("c.txt"));
}

#[test]
fn test_conversation_id_round_trips_through_outcome() {
    let ws = TestWorkspace::new().unwrap();
    let first = ws.lm_write("a.txt", "one\n", None).unwrap();
    let conv = first.conversation_id.clone();

    let second = ws.lm_write("a.txt", "two\n", Some(&conv)).unwrap();
    assert!(!second.started_conversation);
    assert_eq!(second.conversation_id, conv);
    assert_eq!(second.operation, OperationKind::Replace);

    let entries = ws.entries(&conv);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].tool_call_index, 1);
}

#[test]
fn test_line_edit_tool_shape() {
    let ws = TestWorkspace::with_files(&[("b.txt", "one\ntwo\n")]).unwrap();
    let outcome = ws.lm_edit_lines("b.txt", &[("2", "TWO\n")], None).unwrap();

    assert_eq!(ws.read("b.txt"), "one\nTWO\n");
    assert_eq!(outcome.operation, OperationKind::Edit);
}
