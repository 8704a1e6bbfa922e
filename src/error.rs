use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by a replay handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  #[error("Journal Corruption at offset {offset}: {reason}")]
  Corrupt { offset: u64, reason: String },

  #[error("Record too large: {field} is {len} bytes, limit is {max}")]
  RecordTooLarge { field: &'static str, len: usize, max: usize },

  #[error("Invalid record: {0}")]
  InvalidRecord(String),

  #[error("Replay handler failed for record at offset {offset}: {source}")]
  Handler {
    offset: u64,
    #[source]
    source: HandlerError,
  },

  #[error("Invalid journal state: {0}")]
  InvalidState(String),

  #[error("Configuration Error: {0}")]
  Config(String),
}

impl Error {
  pub fn is_corrupt(&self) -> bool {
    matches!(self, Error::Corrupt { .. })
  }
}
