mod common;
use common::{Collector, TestEnv};
use kvjournal::{HandlerError, Journal, Record, SyncPolicy};
use std::fs::OpenOptions;
use std::io::Write;

fn replay(env: &TestEnv, sync_policy: SyncPolicy) -> (Journal, Collector, kvjournal::ReplaySummary) {
  let mut journal = env.open(sync_policy);
  let mut collector = Collector::default();
  let summary = journal.replay(&mut collector).unwrap();
  (journal, collector, summary)
}

#[test]
fn test_put_then_delete_scenario() {
  let env = TestEnv::new();

  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/k1", b"v1").unwrap(); // PUT
  journal.append(2, b"/k1", b"").unwrap(); // DELETE
  journal.close().unwrap();

  let (_journal, collector, summary) = replay(&env, SyncPolicy::Always);

  assert_eq!(
    collector.records,
    vec![Record::new(1, "/k1", "v1"), Record::new(2, "/k1", "")]
  );
  assert_eq!(summary.replayed, 2);
  assert!(summary.is_clean());
}

#[test]
fn test_replay_in_order_and_positioned_at_end() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Threshold);
  for i in 0..100u32 {
    journal.append(i % 3, format!("/key/{}", i).as_bytes(), format!("value_{}", i).as_bytes()).unwrap();
  }
  journal.close().unwrap();
  let len = env.file_len();

  let (mut journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert_eq!(summary.replayed, 100);
  assert_eq!(summary.end_offset, len);
  for (i, record) in collector.records.iter().enumerate() {
    assert_eq!(record.uri, format!("/key/{}", i).into_bytes());
    assert_eq!(record.body, format!("value_{}", i).into_bytes());
  }

  // New appends land right after the last record.
  journal.append(1, b"/next", b"n").unwrap();
  let expected_tail = kvjournal::encode(1, b"/next", b"n").unwrap();
  let bytes = env.file_bytes();
  assert_eq!(bytes.len() as u64, len + expected_tail.len() as u64);
  assert_eq!(&bytes[len as usize..], &expected_tail[..]);
}

#[test]
fn test_empty_journal_replays_nothing() {
  let env = TestEnv::new();
  let (_journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert!(collector.records.is_empty());
  assert_eq!(summary.replayed, 0);
  assert_eq!(summary.end_offset, 0);
  assert!(summary.is_clean());
}

#[test]
fn test_partial_write_recovery() {
  let env = TestEnv::new();

  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/valid", b"valid_data").unwrap();
  journal.append(1, b"/victim", b"victim_data").unwrap();
  journal.close().unwrap();

  // Chop the victim record in half, as a crash mid-write would.
  let good_len = kvjournal::encode(1, b"/valid", b"valid_data").unwrap().len() as u64;
  let file = OpenOptions::new().write(true).open(&env.path).unwrap();
  let len = file.metadata().unwrap().len();
  file.set_len(len - 10).unwrap();
  drop(file);

  let (mut journal, collector, summary) = replay(&env, SyncPolicy::Always);

  assert_eq!(collector.records, vec![Record::new(1, "/valid", "valid_data")]);
  assert_eq!(summary.replayed, 1);
  let tail = summary.corruption.expect("corruption should be reported");
  assert_eq!(tail.offset, good_len);
  assert_eq!(env.file_len(), good_len);

  // The journal stays writable, starting exactly where the good data ends.
  journal.append(1, b"/new", b"new_life").unwrap();
  journal.close().unwrap();

  let mut expected = kvjournal::encode(1, b"/valid", b"valid_data").unwrap();
  expected.extend(kvjournal::encode(1, b"/new", b"new_life").unwrap());
  assert_eq!(env.file_bytes(), expected);
}

#[test]
fn test_partial_head_marker_recovery() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/a", b"1").unwrap();
  journal.close().unwrap();

  let mut file = OpenOptions::new().append(true).open(&env.path).unwrap();
  file.write_all(&kvjournal::RECORD_HEAD[..2]).unwrap();
  drop(file);

  let (_journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert_eq!(collector.records.len(), 1);
  assert!(!summary.is_clean());
  assert_eq!(env.file_bytes(), kvjournal::encode(1, b"/a", b"1").unwrap());
}

#[test]
fn test_zero_pad_recovery() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/a", b"A").unwrap();
  journal.close().unwrap();

  // Append 1KB of zeros (simulating pre-allocation or sparse file garbage)
  let mut file = OpenOptions::new().append(true).open(&env.path).unwrap();
  file.write_all(&[0u8; 1024]).unwrap();
  drop(file);

  let (mut journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert_eq!(collector.records, vec![Record::new(1, "/a", "A")]);
  assert!(!summary.is_clean());

  journal.append(1, b"/b", b"B").unwrap();
  journal.close().unwrap();

  let (_journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert_eq!(collector.records, vec![Record::new(1, "/a", "A"), Record::new(1, "/b", "B")]);
  assert!(summary.is_clean());
}

#[test]
fn test_damaged_marker_stops_replay() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/a", b"1").unwrap();
  journal.append(1, b"/b", b"2").unwrap();
  journal.append(1, b"/c", b"3").unwrap();
  journal.close().unwrap();

  // Damage the tail marker of the second record. The byte count still matches,
  // so only a comparison against the real marker catches it.
  let first_len = kvjournal::encode(1, b"/a", b"1").unwrap().len();
  let second_len = kvjournal::encode(1, b"/b", b"2").unwrap().len();
  let mut bytes = env.file_bytes();
  bytes[first_len + second_len - 2] = b'#';
  std::fs::write(&env.path, &bytes).unwrap();

  let (_journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert_eq!(collector.records, vec![Record::new(1, "/a", "1")]);
  assert_eq!(summary.corruption.unwrap().offset, first_len as u64);
  // Everything from the damaged record onwards is discarded.
  assert_eq!(env.file_len(), first_len as u64);
}

#[test]
fn test_append_without_replay_keeps_existing_records() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/a", b"1").unwrap();
  journal.close().unwrap();

  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/b", b"2").unwrap();
  journal.close().unwrap();

  let (_journal, collector, _) = replay(&env, SyncPolicy::Always);
  assert_eq!(collector.records, vec![Record::new(1, "/a", "1"), Record::new(1, "/b", "2")]);
}

#[test]
fn test_handler_failure_aborts_without_truncating() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/a", b"1").unwrap();
  journal.append(9, b"/bad", b"").unwrap();
  journal.append(1, b"/c", b"3").unwrap();
  journal.close().unwrap();
  let len = env.file_len();

  let mut journal = env.open(SyncPolicy::Always);
  let mut applied = 0;
  let mut handler = |r: &Record| -> Result<(), HandlerError> {
    if r.verb == 9 {
      return Err("unknown verb".into());
    }
    applied += 1;
    Ok(())
  };
  let err = journal.replay(&mut handler).unwrap_err();
  assert!(matches!(err, kvjournal::Error::Handler { .. }));
  assert_eq!(applied, 1);
  assert_eq!(env.file_len(), len);

  // Later appends still go to the end, never over unreplayed records.
  journal.append(1, b"/d", b"4").unwrap();
  journal.close().unwrap();
  assert_eq!(env.file_len(), len + kvjournal::encode(1, b"/d", b"4").unwrap().len() as u64);
}

fn populate_large(env: &TestEnv, count: usize) -> Vec<Record> {
  let mut journal = env.open(SyncPolicy::Threshold);
  let body = vec![b'v'; 1024];
  let mut records = Vec::new();
  for i in 0..count {
    let uri = format!("/key/{}", i);
    journal.append(1, uri.as_bytes(), &body).unwrap();
    records.push(Record::new(1, uri, body.clone()));
  }
  journal.close().unwrap();
  records
}

fn always_fail(_: &Record) -> Result<(), HandlerError> {
  Err("store unavailable".into())
}

#[test]
fn test_failed_replay_appends_at_end_of_large_journal() {
  let env = TestEnv::new();
  // Well beyond the replay read-ahead, so the cursor stops mid-file on failure.
  let mut expected = populate_large(&env, 400);
  let len = env.file_len();

  let mut journal = env.open(SyncPolicy::Threshold);
  let err = journal.replay(&mut always_fail).unwrap_err();
  assert!(matches!(err, kvjournal::Error::Handler { offset: 0, .. }));

  journal.append(1, b"/after", b"y").unwrap();
  journal.close().unwrap();

  let after = kvjournal::encode(1, b"/after", b"y").unwrap();
  assert_eq!(env.file_len(), len + after.len() as u64);

  let (_journal, collector, summary) = replay(&env, SyncPolicy::Threshold);
  expected.push(Record::new(1, "/after", "y"));
  assert!(summary.is_clean());
  assert_eq!(collector.records, expected);
}

#[test]
fn test_replay_after_append_is_rejected() {
  let env = TestEnv::new();
  let mut expected = populate_large(&env, 400);

  let mut journal = env.open(SyncPolicy::Threshold);
  journal.append(1, b"/early", b"x").unwrap();
  let err = journal.replay(&mut always_fail).unwrap_err();
  assert!(matches!(err, kvjournal::Error::InvalidState(_)));

  journal.append(1, b"/after", b"y").unwrap();
  journal.close().unwrap();

  // Nothing was overwritten: every original record plus both new ones.
  let (_journal, collector, summary) = replay(&env, SyncPolicy::Threshold);
  expected.push(Record::new(1, "/early", "x"));
  expected.push(Record::new(1, "/after", "y"));
  assert!(summary.is_clean());
  assert_eq!(collector.records, expected);
}

#[test]
fn test_live_appends_are_never_replayed() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Threshold);
  journal.append(1, b"/live", b"v").unwrap();

  let mut collector = Collector::default();
  for _ in 0..2 {
    let err = journal.replay(&mut collector).unwrap_err();
    assert!(matches!(err, kvjournal::Error::InvalidState(_)));
  }
  assert!(collector.records.is_empty());
}

#[test]
fn test_replay_runs_once() {
  let env = TestEnv::new();
  let mut journal = env.open(SyncPolicy::Always);
  journal.append(1, b"/a", b"1").unwrap();
  journal.close().unwrap();

  let (mut journal, collector, summary) = replay(&env, SyncPolicy::Always);
  assert_eq!(summary.replayed, 1);

  let mut again = Collector::default();
  let err = journal.replay(&mut again).unwrap_err();
  assert!(matches!(err, kvjournal::Error::InvalidState(_)));
  assert!(again.records.is_empty());
  assert_eq!(collector.records, vec![Record::new(1, "/a", "1")]);

  // The journal stays usable after the rejected call.
  journal.append(1, b"/b", b"2").unwrap();
  journal.close().unwrap();
  let mut expected = kvjournal::encode(1, b"/a", b"1").unwrap();
  expected.extend(kvjournal::encode(1, b"/b", b"2").unwrap());
  assert_eq!(env.file_bytes(), expected);
}
