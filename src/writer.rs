use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::{JournalOptions, RetryPolicy, SyncPolicy};
use crate::error::Result;
use crate::record;

/// Owns the journal file and the staging buffer in front of it.
///
/// Records are encoded straight into the staging buffer. The sync policy
/// decides when the buffer is written out, and whether the write is followed
/// by `fdatasync`.
pub struct JournalWriter {
  path: PathBuf,
  file: File,
  staging: Vec<u8>,
  buffer_size: usize,
  sync_policy: SyncPolicy,
  retry: RetryPolicy,
  /// True once the file cursor is known to sit right after the last valid record.
  positioned: bool,
  /// Bytes have been written since the last `fdatasync`.
  unsynced: bool,
}

impl JournalWriter {
  /// Opens (creating if absent) the journal file for reading and writing.
  ///
  /// The cursor is left at the start of the file so a replay can run first.
  /// If nothing replays, the first flush moves to the end before writing.
  pub fn open(path: &Path, options: &JournalOptions) -> Result<Self> {
    let file = open_file(path)?;

    if options.lock {
      file.try_lock_exclusive()?;
    }

    Ok(Self {
      path: path.to_path_buf(),
      file,
      staging: Vec::with_capacity(options.buffer_size.min(1024 * 1024)),
      buffer_size: options.buffer_size,
      sync_policy: options.sync_policy,
      retry: options.retry,
      positioned: false,
      unsynced: false,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Bytes currently staged and not yet handed to the OS.
  pub fn staged_len(&self) -> usize {
    self.staging.len()
  }

  /// Encodes a request into the staging buffer and applies the sync policy.
  ///
  /// When the policy-driven flush fails and no byte of this record reached
  /// the file, the record is taken back off the staging buffer: an `Err`
  /// means the request was not logged. If the failure happened part-way
  /// through the record, its remainder stays staged so the file is never
  /// left with a torn record once a later flush succeeds.
  pub fn append(&mut self, verb: u32, uri: &[u8], body: &[u8]) -> Result<()> {
    let len = record::encode_into(&mut self.staging, verb, uri, body)?;

    let outcome = match self.sync_policy {
      SyncPolicy::Always => self.flush(true),
      SyncPolicy::Threshold if self.staging.len() > self.buffer_size => self.flush(false),
      SyncPolicy::Threshold => Ok(()),
    };

    if outcome.is_err() && self.staging.len() >= len {
      self.staging.truncate(self.staging.len() - len);
    }
    outcome
  }

  /// Writes the staging buffer to the file, then optionally `fdatasync`s it.
  ///
  /// Bytes are drained as soon as the OS accepts them. If the write fails
  /// part-way, the unwritten remainder stays staged and the next flush
  /// resumes from it.
  pub fn flush(&mut self, sync: bool) -> Result<()> {
    if self.staging.is_empty() {
      return Ok(());
    }

    self.ensure_positioned()?;

    let (written, outcome) = write_retrying(&mut self.file, &self.staging, &self.retry);
    self.staging.drain(..written);
    if written > 0 {
      self.unsynced = true;
    }
    outcome?;

    debug!(target: "kvjournal", "Flushed {} bytes to {:?} (sync: {})", written, self.path, sync);

    if sync {
      self.file.sync_data()?;
      self.unsynced = false;
    }
    Ok(())
  }

  /// Flushes staged bytes and makes everything written so far durable,
  /// including earlier unsynced threshold flushes.
  pub fn sync(&mut self) -> Result<()> {
    self.flush(true)?;
    if self.unsynced {
      self.file.sync_data()?;
      self.unsynced = false;
    }
    Ok(())
  }

  /// Flushes with sync, then forces a full metadata sync.
  /// The file handle itself is released when the writer is dropped.
  pub fn close(&mut self) -> Result<()> {
    self.flush(true)?;
    self.file.sync_all()?;
    self.unsynced = false;
    Ok(())
  }

  pub(crate) fn file_mut(&mut self) -> &mut File {
    &mut self.file
  }

  /// Records that the cursor was placed at the end of the valid data by a replay.
  pub(crate) fn mark_positioned(&mut self) {
    self.positioned = true;
  }

  /// Forgets the known append position; the next flush seeks to the end of the file.
  pub(crate) fn reset_position(&mut self) {
    self.positioned = false;
  }

  fn ensure_positioned(&mut self) -> Result<()> {
    if !self.positioned {
      self.file.seek(SeekFrom::End(0))?;
      self.positioned = true;
    }
    Ok(())
  }
}

fn open_file(path: &Path) -> io::Result<File> {
  let mut opts = OpenOptions::new();
  opts.read(true).write(true).create(true).truncate(false);

  #[cfg(unix)]
  {
    use std::os::unix::fs::OpenOptionsExt;
    opts.mode(0o600);
  }

  #[cfg(target_os = "linux")]
  {
    use std::os::unix::fs::OpenOptionsExt;
    let mut noatime = opts.clone();
    noatime.custom_flags(libc::O_NOATIME);
    match noatime.open(path) {
      Ok(file) => return Ok(file),
      // O_NOATIME is refused for files we do not own, and by some filesystems.
      Err(e) if matches!(e.raw_os_error(), Some(libc::EPERM) | Some(libc::EINVAL)) => {}
      Err(e) => return Err(e),
    }
  }

  opts.open(path)
}

/// Writes all of `buf`, retrying interrupted writes and backing off while the
/// sink reports `WouldBlock`.
///
/// Returns how many bytes were accepted alongside the outcome, so callers can
/// drain exactly that much even when the write ultimately fails.
pub(crate) fn write_retrying<W: Write>(sink: &mut W, buf: &[u8], retry: &RetryPolicy) -> (usize, io::Result<()>) {
  let mut written = 0;
  let mut would_block = 0;

  while written < buf.len() {
    match sink.write(&buf[written..]) {
      Ok(0) => {
        let err = io::Error::new(io::ErrorKind::WriteZero, "journal write accepted zero bytes");
        return (written, Err(err));
      }
      Ok(n) => {
        written += n;
        would_block = 0;
      }
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        would_block += 1;
        if would_block > retry.max_attempts {
          return (written, Err(e));
        }
        warn!(
          target: "kvjournal",
          "Journal write would block, retrying in {:?} ({}/{})",
          retry.backoff,
          would_block,
          retry.max_attempts
        );
        thread::sleep(retry.backoff);
      }
      Err(e) => return (written, Err(e)),
    }
  }

  (written, Ok(()))
}
