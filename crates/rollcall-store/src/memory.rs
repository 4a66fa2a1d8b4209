//! In-process document store.
//!
//! Every operation yields to the scheduler before touching state, so
//! concurrent sessions interleave between their reads and writes the way
//! they do against a remote store.

use crate::document::{DocumentStore, WriteOutcome};
use rollcall_core::{Class, ClassSnapshot, RosterError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    classes: HashMap<String, ClassSnapshot>,
    join_index: HashMap<String, String>,
    images: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable; every call fails with `Store`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of committed document writes (inserts and replaces).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<tokio::sync::MutexGuard<'_, Inner>, RosterError> {
        tokio::task::yield_now().await;
        if self.offline.load(Ordering::SeqCst) {
            return Err(RosterError::store(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "memory store offline",
            )));
        }
        Ok(self.inner.lock().await)
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, class: &Class) -> Result<u64, RosterError> {
        let mut inner = self.enter().await?;
        if inner.join_index.contains_key(&class.join_code) {
            return Err(RosterError::JoinCodeTaken(class.join_code.clone()));
        }
        inner
            .join_index
            .insert(class.join_code.clone(), class.id.clone());
        inner.classes.insert(
            class.id.clone(),
            ClassSnapshot {
                class: class.clone(),
                revision: 1,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    async fn fetch(&self, class_id: &str) -> Result<Option<ClassSnapshot>, RosterError> {
        let inner = self.enter().await?;
        Ok(inner.classes.get(class_id).cloned())
    }

    async fn fetch_by_join_code(&self, join_code: &str) -> Result<Option<ClassSnapshot>, RosterError> {
        let inner = self.enter().await?;
        Ok(inner
            .join_index
            .get(join_code)
            .and_then(|id| inner.classes.get(id))
            .cloned())
    }

    async fn replace(&self, class: &Class, expected_revision: u64) -> Result<WriteOutcome, RosterError> {
        let mut inner = self.enter().await?;
        let Some(stored) = inner.classes.get_mut(&class.id) else {
            return Ok(WriteOutcome::Missing);
        };
        if stored.revision != expected_revision {
            return Ok(WriteOutcome::Stale {
                current: stored.revision,
            });
        }
        // Join codes are immutable once indexed.
        let mut next = class.clone();
        next.join_code = stored.class.join_code.clone();
        stored.class = next;
        stored.revision += 1;
        let revision = stored.revision;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Committed { revision })
    }

    async fn list(&self) -> Result<Vec<ClassSnapshot>, RosterError> {
        let inner = self.enter().await?;
        let mut all: Vec<ClassSnapshot> = inner.classes.values().cloned().collect();
        all.sort_by(|a, b| b.class.created_at.cmp(&a.class.created_at));
        Ok(all)
    }

    async fn put_image(&self, digest: &str, bytes: &[u8]) -> Result<(), RosterError> {
        let mut inner = self.enter().await?;
        inner
            .images
            .entry(digest.to_string())
            .or_insert_with(|| bytes.to_vec());
        Ok(())
    }

    async fn fetch_image(&self, digest: &str) -> Result<Option<Vec<u8>>, RosterError> {
        let inner = self.enter().await?;
        Ok(inner.images.get(digest).cloned())
    }
}
