use std::io::{Seek, SeekFrom};
use std::path::Path;

use tracing::{error, info};

use crate::config::JournalOptions;
use crate::error::{Error, Result};
use crate::replay::{ReplayHandler, ReplaySummary, Replayer};
use crate::writer::JournalWriter;

/// Outcome of `Journal::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
  /// The journal file is open and records will be persisted.
  Enabled,
  /// No path is configured. Every journal operation is a no-op.
  Disabled,
}

/// The request journal of the store.
///
/// Owned by the storage subsystem and passed to whoever appends, flushes or
/// replays. Calls must be serialized by the owner; there is a single writer.
///
/// The lifecycle is `new` → `open` → `replay` → `append`/`flush`/`sync` → `close`.
/// Dropping an open journal closes it.
pub struct Journal {
  options: JournalOptions,
  writer: Option<JournalWriter>,
  /// A request was appended while the journal was open.
  appended: bool,
  /// A replay already ran.
  replayed: bool,
}

impl Default for Journal {
  fn default() -> Self {
    Self::new(JournalOptions::default())
  }
}

impl Journal {
  pub fn new(options: JournalOptions) -> Self {
    Self {
      options,
      writer: None,
      appended: false,
      replayed: false,
    }
  }

  pub fn options(&self) -> &JournalOptions {
    &self.options
  }

  pub fn path(&self) -> Option<&Path> {
    self.options.path.as_deref()
  }

  /// True while a journal file is open.
  pub fn is_enabled(&self) -> bool {
    self.writer.is_some()
  }

  /// Bytes appended but not yet handed to the OS.
  pub fn staged_len(&self) -> usize {
    self.writer.as_ref().map_or(0, |w| w.staged_len())
  }

  /// Opens the journal file. Without a configured path the journal stays
  /// disabled, which is not an error. Opening an open journal does nothing.
  pub fn open(&mut self) -> Result<OpenStatus> {
    if self.writer.is_some() {
      return Ok(OpenStatus::Enabled);
    }

    self.options.validate()?;

    let Some(path) = self.options.path.as_deref() else {
      info!(target: "kvjournal", "No journal file configured, journaling disabled");
      return Ok(OpenStatus::Disabled);
    };

    let writer = JournalWriter::open(path, &self.options)?;
    info!(
      target: "kvjournal",
      "Opened journal {:?} (policy: {:?}, buffer: {} bytes)",
      path,
      self.options.sync_policy,
      self.options.buffer_size
    );

    self.writer = Some(writer);
    Ok(OpenStatus::Enabled)
  }

  /// Logs one mutating request.
  ///
  /// An `Err` means the request was not logged, unless the failure came after
  /// some of its bytes reached the file (see `JournalWriter::append`).
  pub fn append(&mut self, verb: u32, uri: &[u8], body: &[u8]) -> Result<()> {
    match self.writer.as_mut() {
      Some(writer) => {
        self.appended = true;
        writer.append(verb, uri, body)
      }
      None => Ok(()),
    }
  }

  /// Hands staged records to the OS, forcing them to disk when `sync` is set.
  pub fn flush(&mut self, sync: bool) -> Result<()> {
    match self.writer.as_mut() {
      Some(writer) => writer.flush(sync),
      None => Ok(()),
    }
  }

  /// Makes every appended record durable. Meant to be called every
  /// `fsync_period` by the owner's timer under `SyncPolicy::Threshold`.
  pub fn sync(&mut self) -> Result<()> {
    match self.writer.as_mut() {
      Some(writer) => writer.sync(),
      None => Ok(()),
    }
  }

  /// Replays the whole journal into `handler`, from the first record.
  ///
  /// Runs at most once, before any append: records the live store has
  /// already applied are never fed back to it. Later calls fail with
  /// `Error::InvalidState`. Afterwards appends continue right after the last
  /// valid record; a corrupt tail is cut off and reported in the summary.
  /// If replay fails part-way, appends go to the end of the file.
  pub fn replay<H: ReplayHandler + ?Sized>(&mut self, handler: &mut H) -> Result<ReplaySummary> {
    let Some(writer) = self.writer.as_mut() else {
      return Ok(ReplaySummary::default());
    };

    if self.replayed {
      return Err(Error::InvalidState("journal was already replayed".into()));
    }
    if self.appended {
      return Err(Error::InvalidState("journal cannot be replayed after appends".into()));
    }
    self.replayed = true;

    // Until replay finishes, the cursor says nothing about where appends belong.
    writer.reset_position();
    let file = writer.file_mut();
    file.seek(SeekFrom::Start(0))?;

    let mut replayer = Replayer::new(file)?;
    let summary = replayer.replay_all(handler)?;
    replayer.finish()?;

    writer.mark_positioned();
    Ok(summary)
  }

  /// Flushes and syncs staged records, then releases the file.
  ///
  /// If the final flush fails the journal stays open with the unwritten
  /// bytes still staged, so the caller may retry. Closing a closed or
  /// disabled journal does nothing.
  pub fn close(&mut self) -> Result<()> {
    let Some(writer) = self.writer.as_mut() else {
      return Ok(());
    };

    writer.close()?;
    info!(target: "kvjournal", "Closed journal {:?}", writer.path());
    self.writer = None;
    Ok(())
  }

  /// Closes the journal and resets it to the disabled state, releasing the
  /// file and staging buffer even when the final flush fails.
  pub fn free(&mut self) -> Result<()> {
    let result = self.close();
    self.writer = None;
    self.options.path = None;
    self.appended = false;
    self.replayed = false;
    result
  }
}

impl Drop for Journal {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!(target: "kvjournal", "Failed to close journal on drop. Data loss possible. Error: {}", e);
    }
  }
}
