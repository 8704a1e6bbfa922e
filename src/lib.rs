//! # kvjournal
//!
//! `kvjournal` is the write-ahead request journal of an HTTP key-value store.
//! Every mutating request is logged before it is acknowledged, and after a
//! crash the store is rebuilt by replaying the journal into the request
//! handler.
//!
//! ## Key Features
//!
//! * **Stable Text Format**: Records are hex length-prefixed and bracketed by
//!   fixed markers, byte-compatible with existing journal files.
//! * **Sync Policies**: `fdatasync` after every request, or stage records up to
//!   a size threshold and sync on an external timer.
//! * **Crash Recovery**: Replay stops at the first incomplete record and
//!   truncates it, so new appends continue from the last good record.
//! * **Disabled Mode**: Without a configured path every operation is a no-op.
//!
//! ## Example
//!
//! ```no_run
//! use kvjournal::{HandlerError, Journal, JournalOptions, Record, SyncPolicy};
//!
//! # fn main() -> kvjournal::Result<()> {
//! let mut opts = JournalOptions::new("journal.db");
//! opts.sync_policy = SyncPolicy::Always;
//!
//! let mut journal = Journal::new(opts);
//! journal.open()?;
//!
//! // Rebuild state from the previous run
//! let mut apply = |record: &Record| -> Result<(), HandlerError> {
//!   println!("replay {} {:?}", record.verb, record.uri);
//!   Ok(())
//! };
//! let summary = journal.replay(&mut apply)?;
//! println!("{} transactions replayed", summary.replayed);
//!
//! // Log a new request
//! journal.append(1, b"/k1", b"v1")?;
//! journal.close()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod journal;
mod record;
mod replay;
mod writer;

// Re-exports for the flat public API
pub use config::{JournalOptions, RetryPolicy, SyncPolicy};
pub use error::{Error, HandlerError, Result};
pub use journal::{Journal, OpenStatus};
pub use record::{decode, encode, encode_into, Decoded, Record, MAX_BODY_LEN, MAX_URI_LEN, RECORD_HEAD, RECORD_TAIL};
pub use replay::{CorruptTail, ReplayHandler, ReplayStep, ReplaySummary, Replayer};
pub use writer::JournalWriter;
