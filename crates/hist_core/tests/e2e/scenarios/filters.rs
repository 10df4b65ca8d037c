use crate::harness::TestWorkspace;
use chrono::Utc;
use hist_core::{
    filter_entries, resolve_edit_prefix, resolve_target, DenyAll, EditStatus, EntryFilter,
    Resolution, ReviewTarget,
};
use std::fs::OpenOptions;
use std::io::Write;

/// An empty workspace lists nothing and breaks nothing.
#[test]
fn test_empty_workspace_status() {
    let ws = TestWorkspace::new().unwrap();
    let entries = ws.store().read_all_entries().unwrap();
    assert!(entries.is_empty());
    assert!(filter_entries(&entries, &EntryFilter::default(), Utc::now()).is_empty());
}

#[test]
fn test_status_filters_compose() {
    let ws = TestWorkspace::with_files(&[("src.rs", "fn main() {}\n")]).unwrap();
    let a = ws.lm_write("a.txt", "a\n", None).unwrap();
    let conv_a = a.conversation_id.clone();
    ws.lm_write("b.txt", "b\n", None).unwrap();
    let edit = ws
        .lm_replace_text("src.rs", "main", "start", Some(&conv_a))
        .unwrap();
    ws.accept_edit(&TestWorkspace::edit_id(&edit)).unwrap();

    let all = ws.store().read_all_entries().unwrap();
    assert_eq!(all.len(), 3);

    // By conversation.
    let filter = EntryFilter {
        conversation: Some(conv_a.as_str().to_string()),
        ..Default::default()
    };
    assert_eq!(filter_entries(&all, &filter, Utc::now()).len(), 2);

    // By file fragment.
    let filter = EntryFilter {
        file: Some("src".into()),
        ..Default::default()
    };
    assert_eq!(filter_entries(&all, &filter, Utc::now()).len(), 1);

    // By status.
    let filter = EntryFilter {
        status: Some(EditStatus::Pending),
        ..Default::default()
    };
    assert_eq!(filter_entries(&all, &filter, Utc::now()).len(), 2);

    // Same filter twice returns the same entries: listing is read-only.
    let filter = EntryFilter::default();
    let first: Vec<String> = filter_entries(&all, &filter, Utc::now())
        .iter()
        .map(|e| e.edit_id.to_string())
        .collect();
    let second: Vec<String> = filter_entries(&all, &filter, Utc::now())
        .iter()
        .map(|e| e.edit_id.to_string())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn test_limit_keeps_newest() {
    let ws = TestWorkspace::new().unwrap();
    let first = ws.lm_write("f.txt", "v1\n", None).unwrap();
    let conv = first.conversation_id.clone();
    ws.lm_write("f.txt", "v2\n", Some(&conv)).unwrap();
    let last = ws.lm_write("f.txt", "v3\n", Some(&conv)).unwrap();

    let all = ws.store().read_all_entries().unwrap();
    let filter = EntryFilter {
        limit: Some(1),
        ..Default::default()
    };
    let out = filter_entries(&all, &filter, Utc::now());
    assert_eq!(out.len(), 1);
    assert_eq!(Some(&out[0].edit_id), last.edit_id.as_ref());
}

/// Unique edit-id prefixes resolve; UUIDS make one-char prefixes
/// ambiguous quickly.
#[test]
fn test_prefix_resolution_against_real_ids() {
    let ws = TestWorkspace::new().unwrap();
    let outcome = ws.lm_write("a.txt", "x\n", None).unwrap();
    let edit_id = TestWorkspace::edit_id(&outcome);
    let all = ws.store().read_all_entries().unwrap();

    // An 8-char UUID prefix is unique in a one-entry store.
    match resolve_edit_prefix(&all, &edit_id.as_str()[..8]) {
        Resolution::Unique(e) => assert_eq!(e.edit_id, edit_id),
        other => panic!("expected unique resolution: {other:?}"),
    }

    // The bare id resolves to the edit through the combined resolver too.
    match resolve_target(&all, edit_id.as_str(), &DenyAll).unwrap() {
        ReviewTarget::Edit(id) => assert_eq!(id, edit_id),
        other => panic!("expected edit target: {other:?}"),
    }
}

/// The review loop's work list is pending-only and oldest-first.
#[test]
fn test_pending_edits_oldest_first() {
    let ws = TestWorkspace::new().unwrap();
    let first = ws.lm_write("f.txt", "v1\n", None).unwrap();
    let conv = first.conversation_id.clone();
    ws.lm_write("f.txt", "v2\n", Some(&conv)).unwrap();
    let other = ws.lm_write("g.txt", "x\n", None).unwrap();
    ws.accept_edit(&TestWorkspace::edit_id(&other)).unwrap();

    let reviewer = hist_core::Reviewer::new(ws.store());

    let everywhere = reviewer.pending_edits(None).unwrap();
    assert_eq!(everywhere.len(), 2, "accepted edits are not pending");
    assert!(everywhere[0].tool_call_index <= everywhere[1].tool_call_index);

    let scoped = reviewer.pending_edits(Some(&conv)).unwrap();
    assert_eq!(scoped.len(), 2);
    assert_eq!(scoped[0].tool_call_index, 0);
}

/// A torn final log line (writer died mid-append) does not poison the
/// listing.
#[test]
fn test_torn_log_tail_tolerated() {
    let ws = TestWorkspace::new().unwrap();
    let outcome = ws.lm_write("a.txt", "x\n", None).unwrap();
    let conv = outcome.conversation_id.clone();

    let mut log = OpenOptions::new()
        .append(true)
        .open(ws.store().log_path(&conv))
        .unwrap();
    log.write_all(b"{\"edit_id\":\"half-writ").unwrap();
    drop(log);

    let entries = ws.store().read_all_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(Some(&entries[0].edit_id), outcome.edit_id.as_ref());
}
