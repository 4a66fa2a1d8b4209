//! rollcall-store — The roster store and its synchronization layer.
//!
//! Classes persist as whole documents behind a [`DocumentStore`]. All writes
//! go through [`RosterStore`], which re-reads, applies, and commits with a
//! revision check and bounded retry. Observers follow a class by polling
//! ([`RosterObserver`], [`spawn_poller`]).

pub mod document;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod sync;

pub use document::{DocumentStore, WriteOutcome};
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;
pub use store::{Committed, RetryPolicy, RosterStore};
pub use sync::{spawn_poller, PollOutcome, PollerHandle, RosterObserver, DEFAULT_POLL_INTERVAL};
