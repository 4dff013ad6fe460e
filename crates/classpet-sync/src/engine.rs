//! The sync engine: optimistic local writes backed by a single remote writer.
//!
//! Every mutating operation runs in three phases:
//!
//! 1. apply the change to the cache inside one transaction and emit events
//! 2. hand the matching [`PendingOp`]s to the background writer
//! 3. the writer pushes them to the remote, or parks them in the offline
//!    queue when the device is offline, the adapter is not ready, no class is
//!    selected, older writes are still queued, or the remote write fails
//!
//! Phases 2 and 3 never undo phase 1.

use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};

use classpet_shared::constants::WRITE_DEFERRED_MESSAGE;
use classpet_shared::types::new_doc_id;
use classpet_shared::ClassScope;
use classpet_store::{
    Database, Emotion, Notice, Notification, PendingOp, Pet, Praise, QueueEntry, Settings, Student,
};

use crate::config::SyncConfig;
use crate::error::{lock_db, Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::push::push_op;
use crate::queue::{DrainOutcome, OfflineQueue};
use crate::realtime::RealtimeMerge;
use crate::remote::RemoteAdapter;

/// Why a write went to the offline queue instead of the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    Offline,
    AdapterNotReady,
    NoScope,
    /// Older writes are still waiting; this one queues behind them.
    QueueBacklog,
    RemoteFailed(String),
    WriterUnavailable,
}

/// Final fate of the remote half of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Synced,
    Queued { reason: DeferReason },
    /// The remote write failed and the offline queue could not be saved
    /// either.  The local change stands.
    Unpersisted(String),
}

/// Result of a mutating operation: the locally applied value, plus the
/// outcome of its remote write once the writer gets to it.
#[derive(Debug)]
pub struct PendingWrite<T> {
    pub value: T,
    outcome: oneshot::Receiver<WriteOutcome>,
}

impl<T> PendingWrite<T> {
    pub(crate) fn settled(value: T) -> Self {
        let (tx, outcome) = oneshot::channel();
        let _ = tx.send(WriteOutcome::Synced);
        Self { value, outcome }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Wait for the remote attempt.
    pub async fn outcome(self) -> Result<WriteOutcome> {
        self.outcome.await.map_err(|_| SyncError::WriterStopped)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PendingWrite<U> {
        PendingWrite {
            value: f(self.value),
            outcome: self.outcome,
        }
    }
}

/// Result of an optimistic apply: the caller's value, the remote ops to
/// replay, and the events to emit once the cache lock is released.
pub(crate) struct Applied<T> {
    pub value: T,
    pub ops: Vec<PendingOp>,
    pub events: Vec<SyncEvent>,
}

impl<T> Applied<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            ops: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn op(mut self, op: PendingOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn event(mut self, event: SyncEvent) -> Self {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }
}

struct WriteRequest {
    entries: Vec<QueueEntry>,
    reply: oneshot::Sender<WriteOutcome>,
}

pub(crate) struct Shared {
    pub db: Mutex<Database>,
    pub remote: Arc<dyn RemoteAdapter>,
    pub network: NetworkMonitor,
    pub events: EventBus,
    pub queue: OfflineQueue,
    pub realtime: RealtimeMerge,
    pub config: SyncConfig,
    writer_tx: mpsc::UnboundedSender<WriteRequest>,
}

/// Handle to a running engine.  Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) shared: Arc<Shared>,
}

impl SyncEngine {
    /// Build an engine over an open cache.
    ///
    /// Spawns the writer and connectivity tasks, so this must be called from
    /// within a Tokio runtime.  Both tasks stop once the last handle drops.
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteAdapter>,
        network: NetworkMonitor,
        config: SyncConfig,
    ) -> Self {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let connectivity = network.subscribe();
        let shared = Arc::new(Shared {
            db: Mutex::new(db),
            remote,
            network,
            events: EventBus::new(),
            queue: OfflineQueue::new(),
            realtime: RealtimeMerge::new(),
            config,
            writer_tx,
        });

        tokio::spawn(writer_loop(Arc::downgrade(&shared), writer_rx));
        tokio::spawn(connectivity_loop(Arc::downgrade(&shared), connectivity));

        tracing::info!(online = shared.network.is_online(), "Sync engine started");
        Self { shared }
    }

    /// Open the cache configured by `config` and build an engine over it.
    pub fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteAdapter>,
        network: NetworkMonitor,
    ) -> Result<Self> {
        let db = config.open_database()?;
        Ok(Self::new(db, remote, network, config))
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.shared.network
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub(crate) fn db(&self) -> Result<std::sync::MutexGuard<'_, Database>> {
        lock_db(&self.shared.db)
    }

    /// Run the optimistic phase and submit the resulting ops.
    pub(crate) fn apply<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<Applied<T>>,
    ) -> Result<PendingWrite<T>> {
        let (applied, scope) = {
            let db = self.db()?;
            let applied = db.atomically(f)?;
            let scope = db.current_scope()?;
            (applied, scope)
        };
        self.shared.events.emit_all(applied.events);
        self.submit(applied.value, applied.ops, scope.as_ref())
    }

    fn submit<T>(
        &self,
        value: T,
        ops: Vec<PendingOp>,
        scope: Option<&ClassScope>,
    ) -> Result<PendingWrite<T>> {
        if ops.is_empty() {
            return Ok(PendingWrite::settled(value));
        }
        let entries: Vec<QueueEntry> = ops.into_iter().map(|op| queue_entry(op, scope)).collect();
        let (reply, outcome) = oneshot::channel();
        if let Err(mpsc::error::SendError(request)) =
            self.shared.writer_tx.send(WriteRequest { entries, reply })
        {
            tracing::warn!("Writer task gone, queueing directly");
            let outcome = self
                .shared
                .defer(request.entries, DeferReason::WriterUnavailable);
            let _ = request.reply.send(outcome);
        }
        Ok(PendingWrite { value, outcome })
    }

    // -- reads ---------------------------------------------------------------

    pub fn current_scope(&self) -> Result<Option<ClassScope>> {
        Ok(self.db()?.current_scope()?)
    }

    pub fn students(&self) -> Result<Vec<Student>> {
        Ok(self.db()?.students()?)
    }

    pub fn student(&self, id: &str) -> Result<Student> {
        self.db()?
            .get_student(id)
            .map_err(|e| crate::error::or_missing(e, || SyncError::StudentNotFound(id.into())))
    }

    pub fn pets(&self) -> Result<Vec<Pet>> {
        Ok(self.db()?.pets()?)
    }

    pub fn pets_for_student(&self, student_id: &str) -> Result<Vec<Pet>> {
        Ok(self.db()?.pets_for_student(student_id)?)
    }

    pub fn praise_log(&self) -> Result<Vec<Praise>> {
        Ok(self.db()?.praise_log()?)
    }

    pub fn praises_for_student(&self, student_id: &str) -> Result<Vec<Praise>> {
        Ok(self.db()?.praises_for_student(student_id)?)
    }

    pub fn emotion_log(&self) -> Result<Vec<Emotion>> {
        Ok(self.db()?.emotion_log()?)
    }

    pub fn notices(&self) -> Result<Vec<Notice>> {
        Ok(self.db()?.notices()?)
    }

    pub fn notifications(&self) -> Result<Vec<Notification>> {
        Ok(self.db()?.notifications()?)
    }

    pub fn unread_notification_count(&self) -> Result<usize> {
        Ok(self.db()?.unread_notification_count()?)
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(self.db()?.settings()?)
    }

    // -- queue ---------------------------------------------------------------

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.db()?.offline_queue()?.len())
    }

    pub fn pending_entries(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.db()?.offline_queue()?)
    }

    pub fn is_draining(&self) -> bool {
        self.shared.queue.is_draining()
    }

    /// Drain the offline queue now.
    pub async fn flush(&self) -> Result<DrainOutcome> {
        self.shared.drain().await
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("online", &self.shared.network.is_online())
            .field("draining", &self.shared.queue.is_draining())
            .finish()
    }
}

pub(crate) fn entry_scope(entry: &QueueEntry) -> Option<ClassScope> {
    match (&entry.teacher_uid, &entry.class_id) {
        (Some(uid), Some(cid)) => Some(ClassScope::new(uid, cid)),
        _ => None,
    }
}

fn queue_entry(op: PendingOp, scope: Option<&ClassScope>) -> QueueEntry {
    QueueEntry {
        id: new_doc_id(),
        op,
        teacher_uid: scope.map(|s| s.teacher_uid.clone()),
        class_id: scope.map(|s| s.class_id.clone()),
        timestamp: Utc::now(),
        attempts: 0,
    }
}

impl Shared {
    pub(crate) async fn drain(&self) -> Result<DrainOutcome> {
        self.queue
            .drain(&self.db, self.remote.as_ref(), &self.network, &self.events)
            .await
    }

    /// Push `entries` in order, or queue them.
    async fn write_through(&self, entries: Vec<QueueEntry>) -> WriteOutcome {
        if !self.network.is_online() {
            return self.defer(entries, DeferReason::Offline);
        }
        if !self.remote.is_initialized() {
            return self.defer(entries, DeferReason::AdapterNotReady);
        }
        let Some(scope) = entries.first().and_then(entry_scope) else {
            return self.defer(entries, DeferReason::NoScope);
        };

        // Older queued writes go out first.
        if let Err(e) = self.drain().await {
            tracing::warn!(error = %e, "Drain before write failed");
        }
        let backlog = match lock_db(&self.db).and_then(|db| Ok(db.offline_queue()?.len())) {
            Ok(n) => n,
            Err(e) => return WriteOutcome::Unpersisted(e.to_string()),
        };
        if backlog > 0 || self.queue.is_draining() {
            return self.defer(entries, DeferReason::QueueBacklog);
        }

        // One request always carries a single scope.
        let mut entries = entries.into_iter();
        while let Some(mut entry) = entries.next() {
            if let Err(e) = push_op(self.remote.as_ref(), &scope, &entry.op).await {
                tracing::warn!(op = entry.op.kind(), error = %e, "Remote write failed");
                entry.attempts = 1;
                let rest = std::iter::once(entry).chain(entries).collect();
                return self.defer(rest, DeferReason::RemoteFailed(e.to_string()));
            }
            tracing::debug!(op = entry.op.kind(), %scope, "Remote write synced");
        }
        WriteOutcome::Synced
    }

    fn defer(&self, entries: Vec<QueueEntry>, reason: DeferReason) -> WriteOutcome {
        let Some(first) = entries.first() else {
            return WriteOutcome::Synced;
        };
        let op_kind = first.op.kind().to_string();
        for entry in &entries {
            if let Err(e) = self.queue.enqueue(&self.db, &self.events, entry) {
                tracing::error!(op = entry.op.kind(), error = %e, "Failed to persist queued write");
                return WriteOutcome::Unpersisted(e.to_string());
            }
        }
        tracing::warn!(op = %op_kind, ?reason, entries = entries.len(), "Remote write deferred, queued");
        self.events.emit(SyncEvent::WriteDeferred {
            op_kind,
            message: WRITE_DEFERRED_MESSAGE.to_string(),
        });
        WriteOutcome::Queued { reason }
    }
}

async fn writer_loop(shared: Weak<Shared>, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(request) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let outcome = shared.write_through(request.entries).await;
        let _ = request.reply.send(outcome);
    }
    tracing::debug!("Writer task stopped");
}

async fn connectivity_loop(shared: Weak<Shared>, mut rx: watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared
            .events
            .emit(SyncEvent::ConnectivityChanged { online });
        if online {
            match shared.drain().await {
                Ok(outcome) => tracing::debug!(?outcome, "Drain after reconnect"),
                Err(e) => tracing::error!(error = %e, "Drain after reconnect failed"),
            }
        }
    }
    tracing::debug!("Connectivity task stopped");
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use classpet_shared::Collection;

    #[tokio::test]
    async fn test_write_syncs_when_online() {
        let h = scoped(true);
        let write = h.engine.add_student(1, "Kim").unwrap();
        let id = write.value.id.clone();
        assert_eq!(write.outcome().await.unwrap(), WriteOutcome::Synced);

        let path = ClassScope::new("t1", "c1")
            .doc(Collection::Students, &id)
            .unwrap();
        assert_eq!(h.remote.doc(&path).unwrap()["name"], "Kim");
        assert_eq!(h.engine.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_queues_when_offline() {
        let h = scoped(false);
        let write = h.engine.add_student(1, "Kim").unwrap();
        assert_eq!(
            write.outcome().await.unwrap(),
            WriteOutcome::Queued {
                reason: DeferReason::Offline
            }
        );
        assert_eq!(h.engine.pending_count().unwrap(), 1);
        assert!(h.remote.writes().is_empty());
        assert!(h
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SyncEvent::WriteDeferred { message, .. } if message == WRITE_DEFERRED_MESSAGE)));
    }

    #[tokio::test]
    async fn test_write_queues_without_scope() {
        let h = harness(true);
        let write = h.engine.add_student(1, "Kim").unwrap();
        assert_eq!(
            write.outcome().await.unwrap(),
            WriteOutcome::Queued {
                reason: DeferReason::NoScope
            }
        );
        let entries = h.engine.pending_entries().unwrap();
        assert_eq!(entries[0].teacher_uid, None);
    }

    #[tokio::test]
    async fn test_remote_failure_queues_rest_of_batch() {
        let h = scoped(true);
        let student = h.engine.add_student(1, "Kim").unwrap();
        student.outcome().await.unwrap();
        let pet = h
            .engine
            .select_pet(&h.engine.students().unwrap()[0].id, "dog", "Bori")
            .unwrap();
        pet.outcome().await.unwrap();

        h.remote.fail_writes(true);
        let id = h.engine.students().unwrap()[0].id.clone();
        let praise = h.engine.add_praise(&id, "effort").unwrap();
        match praise.outcome().await.unwrap() {
            WriteOutcome::Queued {
                reason: DeferReason::RemoteFailed(_),
            } => {}
            other => panic!("unexpected outcome {other:?}"),
        }
        let kinds: Vec<&str> = h
            .engine
            .pending_entries()
            .unwrap()
            .iter()
            .map(|e| e.op.kind())
            .collect();
        assert_eq!(kinds, ["savePraise", "saveStudent", "savePet"]);
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let h = scoped(false);
        h.engine
            .add_student(1, "Kim")
            .unwrap()
            .outcome()
            .await
            .unwrap();
        assert_eq!(h.engine.pending_count().unwrap(), 1);

        h.engine.network().set_online(true);
        for _ in 0..100 {
            if h.engine.pending_count().unwrap() == 0 && !h.remote.writes().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(h.engine.pending_count().unwrap(), 0);
        assert_eq!(h.remote.writes().len(), 1);
        assert!(h
            .events
            .lock()
            .unwrap()
            .contains(&SyncEvent::ConnectivityChanged { online: true }));
    }

    #[tokio::test]
    async fn test_cancelled_flush_keeps_queued_writes() {
        let h = scoped(false);
        for (number, name) in [(1, "Kim"), (2, "Lee")] {
            h.engine
                .add_student(number, name)
                .unwrap()
                .outcome()
                .await
                .unwrap();
        }

        // Let the reconnect drain see an unready adapter and skip.
        h.remote.set_initialized(false);
        h.engine.network().set_online(true);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        h.remote.set_initialized(true);

        h.remote.pause_writes();
        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(50), h.engine.flush()).await;
        assert!(cancelled.is_err());
        assert_eq!(h.engine.pending_count().unwrap(), 2);
        assert!(!h.engine.is_draining());

        h.remote.resume_writes();
        assert!(h.engine.flush().await.unwrap().is_clean());
        assert_eq!(h.engine.pending_count().unwrap(), 0);
        assert_eq!(h.remote.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_new_write_queues_behind_backlog() {
        let h = scoped(true);
        h.remote.fail_writes(true);
        h.engine
            .add_student(1, "Kim")
            .unwrap()
            .outcome()
            .await
            .unwrap();

        // The first write is still queued and fails again on the pre-write
        // drain, so the second one must not overtake it.
        let second = h.engine.add_student(2, "Lee").unwrap();
        assert_eq!(
            second.outcome().await.unwrap(),
            WriteOutcome::Queued {
                reason: DeferReason::QueueBacklog
            }
        );
        assert_eq!(h.engine.pending_count().unwrap(), 2);

        h.remote.fail_writes(false);
        assert!(h.engine.flush().await.unwrap().is_clean());
        let names: Vec<String> = h
            .remote
            .writes()
            .iter()
            .filter_map(|w| match w {
                crate::remote::memory::WriteRecord::Save { data, .. } => {
                    data["name"].as_str().map(str::to_string)
                }
                _ => None,
            })
            .collect();
        assert_eq!(names, ["Kim", "Lee"]);
    }
}
