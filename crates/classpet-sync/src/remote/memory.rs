//! In-process [`RemoteAdapter`] backed by a map of documents.
//!
//! Used by the test suite and for running the engine without a backend.
//! Supports failure injection and a write gate so tests can hold a remote
//! write in flight.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use classpet_shared::paths::class_code_doc;
use classpet_shared::{ClassCode, ClassScope, DocPath};

use super::{QueryFilter, RemoteAdapter, RemoteDoc, RemoteError, SnapshotStream};

/// A write that reached the store, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
    Save { path: String, data: Value },
    Delete { path: String },
}

impl WriteRecord {
    pub fn path(&self) -> &str {
        match self {
            Self::Save { path, .. } | Self::Delete { path } => path,
        }
    }
}

struct Watcher {
    collection: String,
    filter: QueryFilter,
    tx: mpsc::UnboundedSender<Vec<RemoteDoc>>,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, Value>,
    watchers: Vec<Watcher>,
    writes: Vec<WriteRecord>,
}

impl State {
    fn collection(&self, collection: &str, filter: &QueryFilter) -> Vec<RemoteDoc> {
        let prefix = format!("{collection}/");
        self.docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, data)| {
                let id = &path[prefix.len()..];
                (!id.contains('/') && filter.matches(data)).then(|| RemoteDoc {
                    id: id.to_string(),
                    data: data.clone(),
                })
            })
            .collect()
    }

    fn notify(&mut self, path: &DocPath) {
        let Some(parent) = path.parent() else { return };
        let parent = parent.as_str().to_string();
        let snapshots: Vec<(usize, Vec<RemoteDoc>)> = self
            .watchers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.collection == parent)
            .map(|(i, w)| (i, self.collection(&w.collection, &w.filter)))
            .collect();
        for (i, docs) in snapshots {
            // A closed receiver is pruned below.
            let _ = self.watchers[i].tx.send(docs);
        }
        self.watchers.retain(|w| !w.tx.is_closed());
    }
}

pub struct MemoryRemote {
    state: Mutex<State>,
    initialized: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    paused: watch::Sender<bool>,
    blocked: AtomicUsize,
    next_uid: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// An initialized, healthy remote with no documents.
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Mutex::new(State::default()),
            initialized: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            paused,
            blocked: AtomicUsize::new(0),
            next_uid: AtomicU64::new(1),
        }
    }

    /// A remote whose client never finished initializing.
    pub fn uninitialized() -> Self {
        let remote = Self::new();
        remote.set_initialized(false);
        remote
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent write until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.paused.send_replace(false);
    }

    /// Writes currently parked on the gate.
    pub fn blocked_writes(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` writes are parked on the gate.
    pub async fn wait_for_blocked(&self, n: usize) {
        while self.blocked_writes() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Insert a document without recording a write or failing.
    pub fn seed(&self, path: &DocPath, data: Value) {
        let mut state = self.state();
        state.docs.insert(path.as_str().to_string(), data);
        state.notify(path);
    }

    pub fn doc(&self, path: &DocPath) -> Option<Value> {
        self.state().docs.get(path.as_str()).cloned()
    }

    pub fn docs_in(&self, collection: &DocPath) -> Vec<RemoteDoc> {
        self.state()
            .collection(collection.as_str(), &QueryFilter::all())
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    pub fn watcher_count(&self) -> usize {
        let mut state = self.state();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_ready(&self) -> Result<(), RemoteError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NotInitialized)
        }
    }

    fn check_read(&self) -> Result<(), RemoteError> {
        self.check_ready()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    async fn begin_write(&self) -> Result<(), RemoteError> {
        self.check_ready()?;
        let mut gate = self.paused.subscribe();
        if *gate.borrow_and_update() {
            let _parked = Parked::enter(&self.blocked);
            let released = gate.wait_for(|paused| !*paused).await.is_ok();
            if !released {
                return Err(RemoteError::Unavailable("remote dropped".into()));
            }
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

/// Counts a write parked on the gate, including one whose future is dropped.
struct Parked<'a>(&'a AtomicUsize);

impl<'a> Parked<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteAdapter for MemoryRemote {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn sign_in_anonymously(&self) -> Result<String, RemoteError> {
        self.check_read()?;
        let n = self.next_uid.fetch_add(1, Ordering::SeqCst);
        Ok(format!("anon-{n}"))
    }

    async fn save_doc(&self, path: &DocPath, data: Value) -> Result<(), RemoteError> {
        if !path.is_document() {
            return Err(RemoteError::Rejected(format!("{path} is not a document")));
        }
        self.begin_write().await?;
        let mut state = self.state();
        state.docs.insert(path.as_str().to_string(), data.clone());
        state.writes.push(WriteRecord::Save {
            path: path.as_str().to_string(),
            data,
        });
        state.notify(path);
        Ok(())
    }

    async fn get_doc(&self, path: &DocPath) -> Result<Option<Value>, RemoteError> {
        self.check_read()?;
        Ok(self.doc(path))
    }

    async fn query_docs(
        &self,
        collection: &DocPath,
        filter: &QueryFilter,
    ) -> Result<Vec<RemoteDoc>, RemoteError> {
        self.check_read()?;
        Ok(self.state().collection(collection.as_str(), filter))
    }

    async fn delete_doc(&self, path: &DocPath) -> Result<(), RemoteError> {
        self.begin_write().await?;
        let mut state = self.state();
        let prefix = format!("{}/", path.as_str());
        state
            .docs
            .retain(|p, _| p != path.as_str() && !p.starts_with(&prefix));
        state.writes.push(WriteRecord::Delete {
            path: path.as_str().to_string(),
        });
        state.notify(path);
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &DocPath,
        filter: &QueryFilter,
    ) -> Result<SnapshotStream, RemoteError> {
        self.check_read()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        let initial = state.collection(collection.as_str(), filter);
        let _ = tx.send(initial);
        state.watchers.push(Watcher {
            collection: collection.as_str().to_string(),
            filter: filter.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn resolve_code_to_scope(
        &self,
        code: &ClassCode,
    ) -> Result<Option<ClassScope>, RemoteError> {
        self.check_read()?;
        let path = class_code_doc(code)?;
        match self.doc(&path) {
            None => Ok(None),
            Some(data) => serde_json::from_value(data)
                .map(Some)
                .map_err(|e| RemoteError::Malformed {
                    path: path.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> DocPath {
        DocPath::parse(p).unwrap()
    }

    #[tokio::test]
    async fn test_save_query_delete() {
        let remote = MemoryRemote::new();
        remote
            .save_doc(&path("c/a"), json!({ "n": 1 }))
            .await
            .unwrap();
        remote
            .save_doc(&path("c/b"), json!({ "n": 2 }))
            .await
            .unwrap();
        remote
            .save_doc(&path("c/a/sub/x"), json!({ "n": 3 }))
            .await
            .unwrap();

        let docs = remote
            .query_docs(&path("c"), &QueryFilter::all().eq("n", 2))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "b");

        remote.delete_doc(&path("c/a")).await.unwrap();
        assert!(remote.doc(&path("c/a/sub/x")).is_none());
        assert_eq!(remote.writes().len(), 4);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let remote = MemoryRemote::new();
        remote.fail_writes(true);
        let err = remote.save_doc(&path("c/a"), json!({})).await.unwrap_err();
        assert!(err.is_transient());
        assert!(remote.writes().is_empty());

        let remote = MemoryRemote::uninitialized();
        assert!(!remote.is_initialized());
        assert_eq!(
            remote.get_doc(&path("c/a")).await.unwrap_err(),
            RemoteError::NotInitialized
        );
    }

    #[tokio::test]
    async fn test_subscribe_receives_snapshots() {
        let remote = MemoryRemote::new();
        remote.seed(&path("c/a"), json!({ "n": 1 }));
        let mut rx = remote
            .subscribe(&path("c"), &QueryFilter::all())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);

        remote
            .save_doc(&path("c/b"), json!({ "n": 2 }))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 2);

        drop(rx);
        assert_eq!(remote.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_paused_write_waits_for_resume() {
        let remote = std::sync::Arc::new(MemoryRemote::new());
        remote.pause_writes();
        let r = remote.clone();
        let task = tokio::spawn(async move { r.save_doc(&path("c/a"), json!({})).await });
        remote.wait_for_blocked(1).await;
        assert!(remote.doc(&path("c/a")).is_none());
        remote.resume_writes();
        task.await.unwrap().unwrap();
        assert!(remote.doc(&path("c/a")).is_some());
    }

    #[tokio::test]
    async fn test_resolve_code() {
        let remote = MemoryRemote::new();
        let code = ClassCode::parse("ABC234").unwrap();
        assert_eq!(remote.resolve_code_to_scope(&code).await.unwrap(), None);
        remote.seed(
            &class_code_doc(&code).unwrap(),
            json!({ "teacherUid": "t1", "classId": "c1" }),
        );
        assert_eq!(
            remote.resolve_code_to_scope(&code).await.unwrap(),
            Some(ClassScope::new("t1", "c1"))
        );
    }
}
