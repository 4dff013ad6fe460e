//! Offline queue draining.
//!
//! The queue itself lives in the cache under `offlineQueue`.  This module owns
//! the replay loop: snapshot-and-clear, replay in order, put failures back in
//! front of anything enqueued meanwhile.  The snapshot is held in a batch that
//! restores whatever it still owns if the drain is dropped part way.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use classpet_store::{Database, QueueEntry};

use crate::engine::entry_scope;
use crate::error::{lock_db, Result};
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::push::push_op;
use crate::remote::RemoteAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AdapterNotReady,
    AlreadyDraining,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries that reached the remote.
    pub replayed: usize,
    /// Entries put back for the next cycle.
    pub requeued: usize,
    pub passes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Completed(DrainReport),
}

impl DrainOutcome {
    /// Whether the queue was left with nothing this drain put back.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Completed(report) if report.requeued == 0)
    }
}

/// Replays queued writes.  At most one drain runs at a time.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The entries one pass took out of the persisted queue.
///
/// Anything not yet replayed, plus everything kept for retry, goes back to
/// the front of the persisted queue when the batch is dropped.  A cancelled
/// drain future therefore loses nothing; an entry whose push was in flight is
/// replayed again on the next drain.
struct PassBatch<'a> {
    db: &'a Mutex<Database>,
    events: &'a EventBus,
    kept: Vec<QueueEntry>,
    unsettled: VecDeque<QueueEntry>,
}

impl<'a> PassBatch<'a> {
    fn new(db: &'a Mutex<Database>, events: &'a EventBus, entries: Vec<QueueEntry>) -> Self {
        Self {
            db,
            events,
            kept: Vec::new(),
            unsettled: entries.into(),
        }
    }

    /// Move the front entry to the retry list.  Returns its attempt count.
    fn keep_front(&mut self, count_attempt: bool) -> u32 {
        let Some(mut entry) = self.unsettled.pop_front() else {
            return 0;
        };
        if count_attempt {
            entry.attempts = entry.attempts.saturating_add(1);
        }
        let attempts = entry.attempts;
        self.kept.push(entry);
        attempts
    }

    fn remaining(&mut self) -> Vec<QueueEntry> {
        let mut entries = std::mem::take(&mut self.kept);
        entries.extend(self.unsettled.drain(..));
        entries
    }

    fn restore(&self, entries: Vec<QueueEntry>) -> Result<usize> {
        Ok(lock_db(self.db)?.requeue_front(entries)?)
    }

    /// Persist the kept entries ahead of anything enqueued during the pass.
    /// Returns the new queue length.
    fn finish(mut self) -> Result<usize> {
        let entries = self.remaining();
        self.restore(entries.clone()).map_err(|e| {
            // Handed back so the drop path gets a second try.
            self.kept = entries;
            e
        })
    }
}

impl Drop for PassBatch<'_> {
    fn drop(&mut self) {
        let entries = self.remaining();
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        match self.restore(entries) {
            Ok(pending) => {
                tracing::warn!(restored = count, pending, "Drain interrupted, entries put back");
                self.events.emit(SyncEvent::QueueChanged { pending });
            }
            Err(e) => {
                tracing::error!(lost = count, error = %e, "Failed to put back queue entries")
            }
        }
    }
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Append to the persisted queue.  Returns the new length.
    pub(crate) fn enqueue(
        &self,
        db: &Mutex<Database>,
        events: &EventBus,
        entry: &QueueEntry,
    ) -> Result<usize> {
        let pending = lock_db(db)?.push_queue_entry(entry)?;
        tracing::debug!(op = entry.op.kind(), entry = %entry.id, pending, "Queued remote write");
        events.emit(SyncEvent::QueueChanged { pending });
        Ok(pending)
    }

    /// Replay the queue against the remote.
    ///
    /// Every entry gets one attempt per pass; a failure does not stop the
    /// pass.  Entries without a captured scope are replayed under the current
    /// one, and stay queued while there is none.
    pub async fn drain(
        &self,
        db: &Mutex<Database>,
        remote: &dyn RemoteAdapter,
        network: &NetworkMonitor,
        events: &EventBus,
    ) -> Result<DrainOutcome> {
        if !network.is_online() {
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }
        if !remote.is_initialized() {
            return Ok(DrainOutcome::Skipped(SkipReason::AdapterNotReady));
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(DrainOutcome::Skipped(SkipReason::AlreadyDraining));
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        loop {
            let (mut pass, current) = {
                let db_guard = lock_db(db)?;
                let current = db_guard.current_scope()?;
                (PassBatch::new(db, events, db_guard.take_queue()?), current)
            };
            if pass.unsettled.is_empty() {
                break;
            }
            report.passes += 1;
            tracing::info!(
                entries = pass.unsettled.len(),
                pass = report.passes,
                "Draining offline queue"
            );

            while let Some(entry) = pass.unsettled.front().cloned() {
                let Some(scope) = entry_scope(&entry).or_else(|| current.clone()) else {
                    tracing::debug!(entry = %entry.id, "No class scope yet, keeping entry");
                    pass.keep_front(false);
                    continue;
                };
                match push_op(remote, &scope, &entry.op).await {
                    Ok(()) => {
                        pass.unsettled.pop_front();
                        report.replayed += 1;
                    }
                    Err(e) => {
                        let attempts = pass.keep_front(true);
                        tracing::warn!(
                            op = entry.op.kind(),
                            entry = %entry.id,
                            attempts,
                            error = %e,
                            "Replay failed, keeping entry"
                        );
                    }
                }
            }

            let had_failures = !pass.kept.is_empty();
            report.requeued += pass.kept.len();
            let pending = pass.finish()?;
            events.emit(SyncEvent::QueueChanged { pending });

            // Retry failures on the next trigger, not in a tight loop.
            if had_failures || pending == 0 {
                break;
            }
        }

        tracing::info!(
            replayed = report.replayed,
            requeued = report.requeued,
            passes = report.passes,
            "Offline queue drained"
        );
        Ok(DrainOutcome::Completed(report))
    }
}
