mod common;

use std::fs::OpenOptions;
use std::io::Write;

use migrate_golem::journal::*;
use migrate_golem::mg_error::AdapterError;
use migrate_golem::types::*;

use common::{descriptor, fixed_time};

fn succeeded_item(index: usize, repo: &str) -> WorkItem {
    let mut item = WorkItem::new(index, descriptor(repo));
    item.mark_queued(fixed_time()).unwrap();
    item.mark_running().unwrap();
    item.record_submission(CorrelationId::new(format!("RM_{}", repo)))
        .unwrap();
    item.finish(Outcome::Succeeded {
        correlation_id: None,
        completed_at: fixed_time(),
    })
    .unwrap();
    item
}

fn failed_item(index: usize, repo: &str) -> WorkItem {
    let mut item = WorkItem::new(index, descriptor(repo));
    item.mark_queued(fixed_time()).unwrap();
    item.finish(Outcome::from_error(
        &AdapterError::Lock("locked".to_string()),
        None,
        fixed_time(),
    ))
    .unwrap();
    item
}

#[test]
fn entry_from_item_copies_outcome_details() {
    let entry = JournalEntry::from_item("run-a", &failed_item(3, "billing"), fixed_time());

    assert_eq!(entry.run_id, "run-a");
    assert_eq!(entry.index, 3);
    assert_eq!(entry.label, "contoso-gh/billing");
    assert_eq!(entry.source, "contoso/Platform/billing");
    assert_eq!(entry.target, "contoso-gh/billing");
    assert_eq!(entry.state, ItemState::Failed);
    assert_eq!(entry.failure_kind, Some(FailureKind::LockFailure));
    assert_eq!(entry.error.as_deref(), Some("Lock failed: locked"));
    assert_eq!(entry.correlation_id, None);
}

#[test]
fn append_then_read_in_write_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/journal.jsonl");

    let first = JournalEntry::from_item("run-a", &succeeded_item(1, "api"), fixed_time());
    let second = JournalEntry::from_item("run-a", &failed_item(0, "web"), fixed_time());
    append_entry(&path, &first).unwrap();
    append_entry(&path, &second).unwrap();

    let entries = read_entries(&path).unwrap();
    assert_eq!(entries, vec![first, second]);
    assert_eq!(
        entries[0].correlation_id,
        Some(CorrelationId::new("RM_api"))
    );
}

#[test]
fn one_json_object_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.jsonl");
    append_entry(
        &path,
        &JournalEntry::from_item("run-a", &succeeded_item(0, "api"), fixed_time()),
    )
    .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.ends_with('\n'));
    // Optional fields that are absent are omitted
    assert!(!contents.contains("failure_kind"));
}

#[test]
fn missing_journal_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let entries = read_entries(&dir.path().join("journal.jsonl")).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn torn_and_blank_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.jsonl");
    let entry = JournalEntry::from_item("run-a", &succeeded_item(0, "api"), fixed_time());
    append_entry(&path, &entry).unwrap();

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"\n{\"run_id\":\"run-a\",\"recorded").unwrap();
    drop(file);

    let entries = read_entries(&path).unwrap();
    assert_eq!(entries, vec![entry]);
}

#[test]
fn entries_are_filtered_by_run() {
    let a = JournalEntry::from_item("run-a", &succeeded_item(0, "api"), fixed_time());
    let b = JournalEntry::from_item("run-b", &succeeded_item(0, "api"), fixed_time());
    let a2 = JournalEntry::from_item("run-a", &failed_item(1, "web"), fixed_time());
    let all = vec![a.clone(), b, a2.clone()];

    let for_a = entries_for_run(&all, "run-a");
    assert_eq!(for_a, vec![&a, &a2]);
    assert!(entries_for_run(&all, "run-c").is_empty());
}

#[test]
fn load_run_reads_back_one_runs_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.jsonl");
    let a = JournalEntry::from_item("run-a", &succeeded_item(0, "api"), fixed_time());
    let b = JournalEntry::from_item("run-b", &failed_item(0, "api"), fixed_time());
    append_entry(&path, &a).unwrap();
    append_entry(&path, &b).unwrap();

    assert_eq!(load_run(&path, "run-b").unwrap(), vec![b]);
    assert!(load_run(&dir.path().join("absent.jsonl"), "run-a")
        .unwrap()
        .is_empty());
}
