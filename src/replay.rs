use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};

use tracing::{info, warn};

use crate::error::{Error, HandlerError, Result};
use crate::record::{self, Decoded, Record};

const READ_BUFFER_SIZE: usize = 128 * 1024; // 128 KB

/// The request-handling layer that replayed records are applied to.
pub trait ReplayHandler {
  fn apply(&mut self, record: &Record) -> std::result::Result<(), HandlerError>;
}

impl<F> ReplayHandler for F
where
  F: FnMut(&Record) -> std::result::Result<(), HandlerError>,
{
  fn apply(&mut self, record: &Record) -> std::result::Result<(), HandlerError> {
    self(record)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
  /// One record was decoded and applied.
  Applied,
  /// Clean end of the journal.
  Eof,
}

/// Where replay stopped on an unreadable record, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptTail {
  /// Offset the file was truncated to.
  pub offset: u64,
  pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
  /// Number of records applied.
  pub replayed: u64,
  /// Offset right after the last applied record.
  pub end_offset: u64,
  /// Set when replay stopped at a corrupt or incomplete record.
  pub corruption: Option<CorruptTail>,
}

impl ReplaySummary {
  pub fn is_clean(&self) -> bool {
    self.corruption.is_none()
  }
}

/// Counts the bytes pulled through it so record boundaries are known exactly,
/// whatever the buffered reader has read ahead.
struct CountingReader<R> {
  inner: R,
  count: u64,
}

impl<R: Read> Read for CountingReader<R> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    let n = self.inner.read(buf)?;
    self.count += n as u64;
    Ok(n)
  }
}

/// Sequentially decodes records from the journal file and applies them.
///
/// Reading starts at the file's current position. Call `finish` when done to
/// leave the file cursor right after the last applied record.
pub struct Replayer<'a> {
  reader: BufReader<&'a mut File>,
  offset: u64,
}

impl<'a> Replayer<'a> {
  pub fn new(file: &'a mut File) -> Result<Self> {
    let offset = file.stream_position()?;
    Ok(Self {
      reader: BufReader::with_capacity(READ_BUFFER_SIZE, file),
      offset,
    })
  }

  /// Offset of the next record to decode.
  pub fn position(&self) -> u64 {
    self.offset
  }

  /// Decodes the next record and applies it.
  ///
  /// A corrupt or incomplete record truncates the file at the offset where
  /// the record began and is reported as `Error::Corrupt`.
  pub fn replay_one<H: ReplayHandler + ?Sized>(&mut self, handler: &mut H) -> Result<ReplayStep> {
    let mut counted = CountingReader {
      inner: &mut self.reader,
      count: 0,
    };
    let decoded = record::decode(&mut counted)?;
    let consumed = counted.count;

    match decoded {
      Decoded::Eof => Ok(ReplayStep::Eof),
      Decoded::Corrupt(reason) => {
        self.truncate_tail();
        Err(Error::Corrupt {
          offset: self.offset,
          reason,
        })
      }
      Decoded::Record(record) => {
        handler.apply(&record).map_err(|source| Error::Handler {
          offset: self.offset,
          source,
        })?;
        self.offset += consumed;
        Ok(ReplayStep::Applied)
      }
    }
  }

  /// Replays records until the end of the journal or the first corrupt one.
  ///
  /// A corrupt tail is not an error: it is truncated, logged, and reported in
  /// the summary. I/O and handler failures stop replay and are returned.
  pub fn replay_all<H: ReplayHandler + ?Sized>(&mut self, handler: &mut H) -> Result<ReplaySummary> {
    info!(target: "kvjournal", "Replaying journal from offset {}", self.offset);

    let mut summary = ReplaySummary::default();
    loop {
      match self.replay_one(handler) {
        Ok(ReplayStep::Applied) => summary.replayed += 1,
        Ok(ReplayStep::Eof) => break,
        Err(Error::Corrupt { offset, reason }) => {
          warn!(
            target: "kvjournal",
            "Possibly corrupted journal: discarding tail at offset {} ({})",
            offset,
            reason
          );
          summary.corruption = Some(CorruptTail { offset, reason });
          break;
        }
        Err(e) => {
          warn!(target: "kvjournal", "Replay aborted after {} transactions: {}", summary.replayed, e);
          return Err(e);
        }
      }
    }

    summary.end_offset = self.offset;
    info!(target: "kvjournal", "{} transactions replayed", summary.replayed);
    Ok(summary)
  }

  /// Moves the file cursor to the end of the replayed data and returns that offset.
  pub fn finish(mut self) -> Result<u64> {
    self.reader.seek(SeekFrom::Start(self.offset))?;
    Ok(self.offset)
  }

  fn truncate_tail(&mut self) {
    let offset = self.offset;
    // Seeking through the BufReader also discards its read-ahead.
    let result = self
      .reader
      .seek(SeekFrom::Start(offset))
      .and_then(|_| self.reader.get_ref().set_len(offset));

    if let Err(e) = result {
      warn!(target: "kvjournal", "Failed to truncate journal at offset {}: {}", offset, e);
    }
  }
}
