//! Polling synchronization — each observer keeps a whole-class snapshot that
//! it replaces on every poll.
//!
//! The store is the only writer of canonical state, so a poll never merges.
//! The one thing an observer must track is its own write: once it has
//! committed revision `r`, snapshots older than `r` are discarded so the view
//! never flips back to the pre-write state.

use crate::document::DocumentStore;
use crate::store::RosterStore;
use rollcall_core::{ClassSnapshot, RosterError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What a single poll did to the observer's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A newer snapshot replaced the local one.
    Replaced { revision: u64 },
    /// The store returned the revision already held.
    Unchanged,
    /// The store has not caught up with this observer's own write yet.
    AwaitingOwnWrite { seen: u64, expected: u64 },
}

pub struct RosterObserver<D> {
    store: RosterStore<D>,
    class_id: String,
    snapshot: Option<ClassSnapshot>,
    expected_revision: u64,
}

impl<D: DocumentStore> RosterObserver<D> {
    pub fn new(store: RosterStore<D>, class_id: impl Into<String>) -> Self {
        Self {
            store,
            class_id: class_id.into(),
            snapshot: None,
            expected_revision: 0,
        }
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn snapshot(&self) -> Option<&ClassSnapshot> {
        self.snapshot.as_ref()
    }

    /// Record that this observer committed a write at `revision`.
    pub fn expect_revision(&mut self, revision: u64) {
        self.expected_revision = self.expected_revision.max(revision);
    }

    /// True while the observer's own last write is not yet in its snapshot.
    pub fn has_pending_write(&self) -> bool {
        self.snapshot
            .as_ref()
            .map_or(self.expected_revision > 0, |s| s.revision < self.expected_revision)
    }

    pub async fn poll_once(&mut self) -> Result<PollOutcome, RosterError> {
        let polled = self.store.poll(&self.class_id).await?;

        if polled.revision < self.expected_revision {
            tracing::debug!(
                class_id = %self.class_id,
                seen = polled.revision,
                expected = self.expected_revision,
                "poll predates own write; keeping snapshot"
            );
            return Ok(PollOutcome::AwaitingOwnWrite {
                seen: polled.revision,
                expected: self.expected_revision,
            });
        }

        if self.snapshot.as_ref().map(|s| s.revision) == Some(polled.revision) {
            return Ok(PollOutcome::Unchanged);
        }

        let revision = polled.revision;
        self.snapshot = Some(polled);
        Ok(PollOutcome::Replaced { revision })
    }
}

/// Handle to a background poller. Dropping it stops the task.
pub struct PollerHandle {
    snapshots: watch::Receiver<Option<ClassSnapshot>>,
    expected: watch::Sender<u64>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Receiver that is notified each time the snapshot is replaced.
    pub fn subscribe(&self) -> watch::Receiver<Option<ClassSnapshot>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<ClassSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Forward a locally committed revision to the poller.
    pub fn expect_revision(&self, revision: u64) {
        self.expected.send_modify(|r| *r = (*r).max(revision));
    }

    /// Stop polling and wait for the task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Poll `observer` every `interval` on a tokio task, publishing each new
/// snapshot. A failed poll is logged and the last snapshot is kept.
pub fn spawn_poller<D: DocumentStore>(mut observer: RosterObserver<D>, interval: Duration) -> PollerHandle {
    let (snapshot_tx, snapshot_rx) = watch::channel(observer.snapshot.clone());
    let (expected_tx, mut expected_rx) = watch::channel(observer.expected_revision);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }

            observer.expect_revision(*expected_rx.borrow_and_update());

            match observer.poll_once().await {
                Ok(PollOutcome::Replaced { revision }) => {
                    tracing::debug!(class_id = %observer.class_id, revision, "snapshot replaced");
                    let _ = snapshot_tx.send(observer.snapshot.clone());
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(class_id = %observer.class_id, error = %err, "roster poll failed");
                }
            }
        }
        tracing::debug!(class_id = %observer.class_id, "poller stopped");
    });

    PollerHandle {
        snapshots: snapshot_rx,
        expected: expected_tx,
        shutdown_tx,
        task: Some(task),
    }
}
