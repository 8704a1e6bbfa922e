#![allow(dead_code)]

use kvjournal::{HandlerError, Journal, JournalOptions, Record, SyncPolicy};
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestEnv {
  // The TempDir guard must be kept alive to prevent premature deletion of the directory.
  pub _dir: TempDir,
  pub path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal.db");
    Self { _dir: dir, path }
  }

  pub fn options(&self, sync_policy: SyncPolicy) -> JournalOptions {
    let mut opts = JournalOptions::new(&self.path);
    opts.sync_policy = sync_policy;
    opts
  }

  /// Opens a journal on this environment's file without replaying it.
  pub fn open(&self, sync_policy: SyncPolicy) -> Journal {
    let mut journal = Journal::new(self.options(sync_policy));
    journal.open().unwrap();
    journal
  }

  pub fn file_bytes(&self) -> Vec<u8> {
    std::fs::read(&self.path).unwrap()
  }

  pub fn file_len(&self) -> u64 {
    std::fs::metadata(&self.path).unwrap().len()
  }
}

/// Replay handler that records everything it is given.
#[derive(Default)]
pub struct Collector {
  pub records: Vec<Record>,
}

impl kvjournal::ReplayHandler for Collector {
  fn apply(&mut self, record: &Record) -> Result<(), HandlerError> {
    self.records.push(record.clone());
    Ok(())
  }
}
