use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Defines when appended records are pushed to the file and forced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
  /// Write and `fdatasync` after every single `append`.
  /// Safest, but highest latency.
  Always,

  /// Keep records in the staging buffer until it grows past
  /// `buffer_size`, then hand them to the OS without syncing.
  /// Forcing data to disk is left to a periodic `Journal::sync`.
  Threshold,
}

impl SyncPolicy {
  /// Maps the legacy `fsync_period` setting (in seconds) to a policy.
  /// A period of zero means every request is synced immediately.
  pub fn from_fsync_period(secs: u64) -> Self {
    if secs == 0 {
      SyncPolicy::Always
    } else {
      SyncPolicy::Threshold
    }
  }
}

/// Bounds the flush loop when the file reports `WouldBlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Maximum number of consecutive would-block retries before the flush fails.
  /// Default: 50.
  pub max_attempts: u32,

  /// Delay between retries.
  /// Default: 100 ms.
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 50,
      backoff: Duration::from_millis(100),
    }
  }
}

#[derive(Debug, Clone)]
pub struct JournalOptions {
  /// Journal file. `None` disables journaling: every operation becomes a no-op.
  pub path: Option<PathBuf>,

  /// Staging buffer size that triggers a flush under `SyncPolicy::Threshold`.
  /// Default: 64 KB.
  pub buffer_size: usize,

  pub sync_policy: SyncPolicy,

  /// How often the owner of the journal is expected to call `Journal::sync`.
  /// The journal never schedules this itself.
  /// Default: 1 second.
  pub fsync_period: Duration,

  pub retry: RetryPolicy,

  /// Take an advisory exclusive lock on the file when opening it.
  /// Default: true.
  pub lock: bool,
}

impl Default for JournalOptions {
  fn default() -> Self {
    Self {
      path: None,
      buffer_size: 64 * 1024, // 64 KB
      sync_policy: SyncPolicy::Threshold,
      fsync_period: Duration::from_secs(1),
      retry: RetryPolicy::default(),
      lock: true,
    }
  }
}

impl JournalOptions {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      ..Default::default()
    }
  }

  /// Options with journaling turned off.
  pub fn disabled() -> Self {
    Self::default()
  }

  /// Applies the legacy numeric `fsync_period` setting, which selects both
  /// the sync policy and the period of the external sync timer.
  pub fn with_fsync_period(mut self, secs: u64) -> Self {
    self.sync_policy = SyncPolicy::from_fsync_period(secs);
    self.fsync_period = Duration::from_secs(secs);
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.retry.max_attempts == 0 {
      return Err(Error::Config("retry.max_attempts must be at least 1".into()));
    }
    if let Some(path) = &self.path {
      if path.as_os_str().is_empty() {
        return Err(Error::Config("Journal path cannot be empty".into()));
      }
    }
    Ok(())
  }
}
