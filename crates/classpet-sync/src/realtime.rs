//! Live subscriptions and the dedup merge of their snapshots.
//!
//! Each snapshot is decoded, filtered down to records whose `firebaseId` the
//! cache has not seen, and the survivors are prepended to the cached
//! collection in one write.  The echo of an optimistic write carries the
//! same `firebaseId` and is dropped.  Records deleted on this device, and
//! praises or emotions of students no longer cached, are never merged back.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{Local, SecondsFormat, TimeZone, Utc};
use tokio::task::JoinHandle;

use classpet_shared::{ClassScope, Collection};
use classpet_store::{Database, Emotion, Notice, Notification, Praise};

use crate::documents::{from_documents, RemoteRecord};
use crate::engine::{Shared, SyncEngine};
use crate::error::{lock_db, Result, SyncError};
use crate::events::SyncEvent;
use crate::remote::{QueryFilter, RemoteDoc, SnapshotStream};

/// A remote query the engine can keep mirrored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    /// Emotions recorded since local midnight.
    TodayEmotions,
    StudentPraises(String),
    ClassPraises,
    Notices,
    Notifications,
}

impl WatchTarget {
    pub fn collection(&self) -> Collection {
        match self {
            Self::TodayEmotions => Collection::Emotions,
            Self::StudentPraises(_) | Self::ClassPraises => Collection::Praises,
            Self::Notices => Collection::Notices,
            Self::Notifications => Collection::Notifications,
        }
    }

    pub fn filter(&self) -> QueryFilter {
        match self {
            Self::TodayEmotions => QueryFilter::all().gte("timestamp", start_of_today()),
            Self::StudentPraises(student_id) => QueryFilter::all().eq("studentId", student_id.as_str()),
            Self::ClassPraises | Self::Notices | Self::Notifications => QueryFilter::all(),
        }
    }
}

fn start_of_today() -> String {
    let midnight = Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    midnight.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// One live query.  Ends when unsubscribed or dropped.
#[derive(Debug)]
pub struct Subscription {
    scope: ClassScope,
    target: WatchTarget,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn new(scope: ClassScope, target: WatchTarget, task: JoinHandle<()>) -> Self {
        Self {
            scope,
            target,
            task: Some(task),
        }
    }

    pub fn scope(&self) -> &ClassScope {
        &self.scope
    }

    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the snapshot task.  Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(scope = %self.scope, target = ?self.target, "Unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Registry of live subscriptions, one per `(scope, target)`.
#[derive(Debug, Default)]
pub struct RealtimeMerge {
    subscriptions: Mutex<HashMap<(ClassScope, WatchTarget), Subscription>>,
}

impl RealtimeMerge {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<(ClassScope, WatchTarget), Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, subscription: Subscription) {
        let key = (subscription.scope.clone(), subscription.target.clone());
        if let Some(mut old) = self.subscriptions().insert(key, subscription) {
            old.unsubscribe();
        }
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, scope: &ClassScope, target: &WatchTarget) -> bool {
        let removed = self
            .subscriptions()
            .remove(&(scope.clone(), target.clone()));
        match removed {
            Some(mut sub) => {
                sub.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Drop every subscription.  Returns how many there were.
    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<Subscription> = self.subscriptions().drain().map(|(_, s)| s).collect();
        let count = drained.len();
        for mut sub in drained {
            sub.unsubscribe();
        }
        count
    }

    pub fn targets(&self) -> Vec<(ClassScope, WatchTarget)> {
        self.subscriptions().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Prepend the records of `incoming` whose `firebaseId` is not yet in
/// `existing`.  Returns the merged list and how many records were added.
pub fn merge_new<T: RemoteRecord>(existing: Vec<T>, incoming: Vec<T>) -> (Vec<T>, usize) {
    let mut known: HashSet<String> = existing
        .iter()
        .filter_map(|r| r.firebase_id().map(str::to_string))
        .collect();
    let fresh: Vec<T> = incoming
        .into_iter()
        .filter(|r| match r.firebase_id() {
            Some(fid) => known.insert(fid.to_string()),
            None => false,
        })
        .collect();
    let added = fresh.len();
    if added == 0 {
        return (existing, 0);
    }
    let mut merged = fresh;
    merged.extend(existing);
    (merged, added)
}

/// Records the cache must not take back: ones deleted on this device, and
/// per-student records whose student is gone.
struct Graveyard {
    buried: HashSet<String>,
    students: Option<HashSet<String>>,
}

impl Graveyard {
    fn load<T: RemoteRecord>(db: &Database, incoming: &[T]) -> Result<Self> {
        let students = if incoming.iter().any(|r| r.student_id().is_some()) {
            Some(db.students()?.into_iter().map(|s| s.id).collect())
        } else {
            None
        };
        Ok(Self {
            buried: db.buried_ids(T::COLLECTION)?,
            students,
        })
    }

    fn admits<T: RemoteRecord>(&self, record: &T) -> bool {
        let id = record.firebase_id().unwrap_or(record.id());
        if self.buried.contains(id) {
            return false;
        }
        match (record.student_id(), &self.students) {
            (Some(student), Some(students)) => students.contains(student),
            _ => true,
        }
    }
}

fn merge_into<T: RemoteRecord>(
    db: &Database,
    docs: &[RemoteDoc],
    load: fn(&Database) -> classpet_store::Result<Vec<T>>,
    save: fn(&Database, &[T]) -> classpet_store::Result<()>,
) -> Result<usize> {
    let incoming = from_documents::<T>(docs);
    let graveyard = Graveyard::load(db, &incoming)?;
    let total = incoming.len();
    let incoming: Vec<T> = incoming.into_iter().filter(|r| graveyard.admits(r)).collect();
    if incoming.len() < total {
        tracing::debug!(
            collection = %T::COLLECTION,
            skipped = total - incoming.len(),
            "Ignoring deleted records in snapshot"
        );
    }
    let (merged, added) = merge_new(load(db)?, incoming);
    if added > 0 {
        save(db, &merged)?;
    }
    Ok(added)
}

/// Merge one snapshot.  Fails with [`SyncError::ScopeChanged`] if the class
/// moved on since the subscription was made.
fn merge_snapshot(
    shared: &Shared,
    scope: &ClassScope,
    target: &WatchTarget,
    docs: &[RemoteDoc],
) -> Result<usize> {
    let (added, event) = {
        let db = lock_db(&shared.db)?;
        if db.current_scope()?.as_ref() != Some(scope) {
            return Err(SyncError::ScopeChanged);
        }
        match target.collection() {
            Collection::Praises => (
                merge_into::<Praise>(&db, docs, Database::praise_log, Database::save_praise_log)?,
                SyncEvent::PraiseLogChanged,
            ),
            Collection::Emotions => (
                merge_into::<Emotion>(&db, docs, Database::emotion_log, Database::save_emotion_log)?,
                SyncEvent::EmotionLogChanged,
            ),
            Collection::Notices => (
                merge_into::<Notice>(&db, docs, Database::notices, Database::save_notices)?,
                SyncEvent::NoticesChanged,
            ),
            Collection::Notifications => (
                merge_into::<Notification>(
                    &db,
                    docs,
                    Database::notifications,
                    Database::save_notifications,
                )?,
                SyncEvent::NotificationsChanged,
            ),
            Collection::Students => (0, SyncEvent::StudentsChanged),
        }
    };
    if added > 0 {
        tracing::debug!(%scope, ?target, added, "Merged realtime snapshot");
        shared.events.emit(event);
    }
    Ok(added)
}

async fn snapshot_loop(
    shared: Weak<Shared>,
    scope: ClassScope,
    target: WatchTarget,
    mut rx: SnapshotStream,
) {
    while let Some(docs) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match merge_snapshot(&shared, &scope, &target, &docs) {
            Ok(_) => {}
            Err(SyncError::ScopeChanged) => {
                tracing::debug!(%scope, ?target, "Scope changed, dropping subscription");
                break;
            }
            Err(e) => tracing::warn!(%scope, ?target, error = %e, "Failed to merge snapshot"),
        }
    }
}

impl SyncEngine {
    /// Start mirroring `target` for the current class, replacing any earlier
    /// subscription to it.
    pub async fn watch(&self, target: WatchTarget) -> Result<()> {
        let scope = self.current_scope()?.ok_or(SyncError::NoScope)?;
        if !self.shared.remote.is_initialized() {
            return Err(SyncError::AdapterUnavailable);
        }

        // The old stream must be gone before the new one delivers anything.
        self.shared.realtime.unsubscribe(&scope, &target);

        let collection = scope.collection(target.collection())?;
        let rx = self
            .shared
            .remote
            .subscribe(&collection, &target.filter())
            .await?;
        if self.current_scope()?.as_ref() != Some(&scope) {
            return Err(SyncError::ScopeChanged);
        }

        let task = tokio::spawn(snapshot_loop(
            Arc::downgrade(&self.shared),
            scope.clone(),
            target.clone(),
            rx,
        ));
        tracing::info!(%scope, ?target, "Watching");
        self.shared
            .realtime
            .insert(Subscription::new(scope, target, task));
        Ok(())
    }

    /// Stop mirroring `target` for the current class.
    pub fn unwatch(&self, target: &WatchTarget) -> Result<bool> {
        Ok(match self.current_scope()? {
            Some(scope) => self.shared.realtime.unsubscribe(&scope, target),
            None => false,
        })
    }

    pub fn watched(&self) -> Vec<WatchTarget> {
        self.shared
            .realtime
            .targets()
            .into_iter()
            .map(|(_, target)| target)
            .collect()
    }
}
