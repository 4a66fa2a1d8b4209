//! Key-value document primitives the roster store is built on.
//!
//! A class is persisted as one whole document keyed by class id, with a
//! unique secondary index on the join code. There are no partial-document
//! writes: [`DocumentStore::replace`] swaps the whole document, and only if
//! the stored revision is still the one the caller read.

use rollcall_core::{Class, ClassSnapshot, RosterError};
use std::future::Future;

/// Result of a revision-checked whole-document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Document written; it now carries this revision.
    Committed { revision: u64 },
    /// Another writer committed after the caller's read.
    Stale { current: u64 },
    /// No document with that id.
    Missing,
}

pub trait DocumentStore: Send + Sync + 'static {
    /// Insert a new class at revision 1. Fails with `JoinCodeTaken` if the
    /// join code is already indexed.
    fn insert(&self, class: &Class) -> impl Future<Output = Result<u64, RosterError>> + Send;

    fn fetch(
        &self,
        class_id: &str,
    ) -> impl Future<Output = Result<Option<ClassSnapshot>, RosterError>> + Send;

    fn fetch_by_join_code(
        &self,
        join_code: &str,
    ) -> impl Future<Output = Result<Option<ClassSnapshot>, RosterError>> + Send;

    /// Replace the whole document if its stored revision equals `expected_revision`.
    ///
    /// The join code indexed at insert is kept; a different `class.join_code`
    /// is overwritten with it.
    fn replace(
        &self,
        class: &Class,
        expected_revision: u64,
    ) -> impl Future<Output = Result<WriteOutcome, RosterError>> + Send;

    /// All classes, newest first.
    fn list(&self) -> impl Future<Output = Result<Vec<ClassSnapshot>, RosterError>> + Send;

    /// Store image bytes under their digest. Idempotent.
    fn put_image(
        &self,
        digest: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), RosterError>> + Send;

    fn fetch_image(
        &self,
        digest: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, RosterError>> + Send;
}
