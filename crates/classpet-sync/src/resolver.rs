//! Class scope management: creating and joining classes, switching between
//! them, and loading a class's data from the remote.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use classpet_shared::paths::class_code_doc;
use classpet_shared::types::new_doc_id;
use classpet_shared::{ClassCode, ClassScope, Collection, DocPath};
use classpet_store::{
    Emotion, Notice, Notification, PendingOp, Pet, Praise, QueueEntry, Student, Tombstone,
};

use crate::documents::from_documents;
use crate::engine::{entry_scope, SyncEngine};
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::remote::{QueryFilter, RemoteAdapter, RemoteDoc, RemoteError};

/// Input for [`SyncEngine::create_class`].
#[derive(Debug, Clone, Default)]
pub struct NewClass {
    pub name: String,
    pub teacher_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCreated {
    pub class_id: String,
    pub teacher_uid: String,
    pub class_code: ClassCode,
}

impl ClassCreated {
    pub fn scope(&self) -> ClassScope {
        ClassScope::new(&self.teacher_uid, &self.class_id)
    }
}

/// Record counts written by [`SyncEngine::load_class_data`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub students: usize,
    pub pets: usize,
    pub praises: usize,
    pub emotions: usize,
    pub notices: usize,
    pub notifications: usize,
    /// Queued local writes laid over the remote data.
    pub pending_applied: usize,
}

#[derive(Default)]
struct ClassData {
    students: Vec<Student>,
    pets: Vec<Pet>,
    praises: Vec<Praise>,
    emotions: Vec<Emotion>,
    notices: Vec<Notice>,
    notifications: Vec<Notification>,
}

fn upsert_by<T>(list: &mut Vec<T>, item: T, id: impl Fn(&T) -> &str) {
    match list.iter().position(|x| id(x) == id(&item)) {
        Some(i) => list[i] = item,
        None => list.insert(0, item),
    }
}

/// Retain matching items.  Returns how many were removed.
fn retain_count<T>(list: &mut Vec<T>, keep: impl FnMut(&T) -> bool) -> usize {
    let before = list.len();
    list.retain(keep);
    before - list.len()
}

impl ClassData {
    /// Let the student copy of the pet fields follow the active pet.
    fn overlay_active_pets(&mut self) {
        for student in &mut self.students {
            if let Some(pet) = self
                .pets
                .iter()
                .find(|p| p.student_id == student.id && p.is_active())
            {
                student.pet_type = Some(pet.pet_type.clone());
                student.pet_name = Some(pet.pet_name.clone());
                student.active_pet_id = Some(pet.id.clone());
            }
        }
    }

    /// Drop records deleted on this device and per-student records whose
    /// student is gone.  Returns the tombstones that still hid a remote copy.
    fn drop_buried(&mut self, tombstones: &[Tombstone]) -> Vec<Tombstone> {
        let mut shadowing = Vec::new();
        for tombstone in tombstones {
            let id = tombstone.id.as_str();
            let hit = match tombstone.collection {
                Collection::Students => retain_count(&mut self.students, |s| s.id != id),
                Collection::Praises => retain_count(&mut self.praises, |p| p.id != id),
                Collection::Emotions => retain_count(&mut self.emotions, |e| e.id != id),
                Collection::Notices => retain_count(&mut self.notices, |n| n.id != id),
                Collection::Notifications => {
                    retain_count(&mut self.notifications, |n| n.id != id)
                }
            };
            if hit > 0 {
                shadowing.push(tombstone.clone());
            }
        }

        let students: HashSet<String> = self.students.iter().map(|s| s.id.clone()).collect();
        let orphans = retain_count(&mut self.pets, |p| students.contains(&p.student_id))
            + retain_count(&mut self.praises, |p| students.contains(&p.student_id))
            + retain_count(&mut self.emotions, |e| students.contains(&e.student_id));
        if orphans > 0 {
            tracing::debug!(orphans, "Dropping records of deleted students");
        }
        shadowing
    }

    /// Replay not-yet-synced local writes on top of the remote state.
    fn overlay_pending(&mut self, entries: &[QueueEntry]) {
        for entry in entries {
            match entry.op.clone() {
                PendingOp::SaveStudent(s) => upsert_by(&mut self.students, s, |x| &x.id),
                PendingOp::DeleteStudent { student_id } => {
                    self.students.retain(|s| s.id != student_id);
                    self.pets.retain(|p| p.student_id != student_id);
                    self.praises.retain(|p| p.student_id != student_id);
                    self.emotions.retain(|e| e.student_id != student_id);
                }
                PendingOp::SavePet(p) => upsert_by(&mut self.pets, p, |x| &x.id),
                PendingOp::SavePraise(p) => upsert_by(&mut self.praises, p, |x| &x.id),
                PendingOp::SaveEmotion(e) => upsert_by(&mut self.emotions, e, |x| &x.id),
                PendingOp::SaveNotice(n) => upsert_by(&mut self.notices, n, |x| &x.id),
                PendingOp::DeleteNotice { notice_id } => self.notices.retain(|n| n.id != notice_id),
                PendingOp::SaveNotification(n) => upsert_by(&mut self.notifications, n, |x| &x.id),
            }
        }
        self.students.sort_by_key(|s| s.number);
    }

    fn report(&self, pending_applied: usize) -> LoadReport {
        LoadReport {
            students: self.students.len(),
            pets: self.pets.len(),
            praises: self.praises.len(),
            emotions: self.emotions.len(),
            notices: self.notices.len(),
            notifications: self.notifications.len(),
            pending_applied,
        }
    }
}

/// Decode documents that keep their id in the body, falling back to the
/// document id.
fn decode_plain<T: DeserializeOwned>(docs: Vec<RemoteDoc>, what: &str) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| {
            let mut data = doc.data;
            if let Value::Object(body) = &mut data {
                body.entry("id").or_insert_with(|| Value::String(doc.id.clone()));
            }
            match serde_json::from_value(data) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(what, doc = %doc.id, error = %e, "Skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

async fn query_all(
    remote: &dyn RemoteAdapter,
    collection: DocPath,
) -> std::result::Result<Vec<RemoteDoc>, RemoteError> {
    remote.query_docs(&collection, &QueryFilter::all()).await
}

impl SyncEngine {
    /// Poll until the remote adapter reports ready, up to the configured wait.
    pub async fn wait_for_adapter(&self) -> bool {
        let config = self.config();
        let deadline = Instant::now() + config.adapter_wait;
        loop {
            if self.shared.remote.is_initialized() {
                return true;
            }
            if Instant::now() >= deadline {
                tracing::warn!(wait_ms = config.adapter_wait.as_millis() as u64, "Remote adapter not ready");
                return false;
            }
            sleep(config.adapter_poll).await;
        }
    }

    /// Make `scope` the current class.  Returns `false` if it already was.
    ///
    /// Realtime subscriptions of the previous class are dropped first.
    pub fn set_scope(&self, scope: ClassScope) -> Result<bool> {
        if self.current_scope()?.as_ref() == Some(&scope) {
            return Ok(false);
        }
        let dropped = self.shared.realtime.unsubscribe_all();
        {
            let db = self.db()?;
            db.set_current_scope(&scope)?;
            db.clear_tombstones()?;
        }
        tracing::info!(%scope, dropped, "Class scope set");
        self.events().emit(SyncEvent::ClassChanged(Some(scope)));
        Ok(true)
    }

    /// Leave the current class.  Cached data stays until the next load.
    pub fn logout(&self) -> Result<()> {
        let dropped = self.shared.realtime.unsubscribe_all();
        {
            let db = self.db()?;
            db.clear_current_scope()?;
            db.clear_tombstones()?;
        }
        tracing::info!(dropped, "Logged out");
        self.events().emit(SyncEvent::ClassChanged(None));
        Ok(())
    }

    /// Create a class on the remote and make it current.
    ///
    /// Fails with [`SyncError::AdapterUnavailable`] rather than creating a
    /// local-only class nobody could join.
    pub async fn create_class(&self, class: NewClass) -> Result<ClassCreated> {
        if !self.wait_for_adapter().await {
            return Err(SyncError::AdapterUnavailable);
        }
        let remote = &self.shared.remote;

        let teacher_uid = match self.current_scope()? {
            Some(scope) => scope.teacher_uid,
            None => remote.sign_in_anonymously().await?,
        };

        let attempts = self.config().class_code_attempts;
        let mut class_code = None;
        for _ in 0..attempts {
            let candidate = ClassCode::generate(&mut rand::thread_rng());
            if remote.resolve_code_to_scope(&candidate).await?.is_none() {
                class_code = Some(candidate);
                break;
            }
            tracing::debug!(code = %candidate, "Class code taken");
        }
        let class_code = class_code.ok_or(SyncError::ClassCodeExhausted(attempts))?;

        let created = ClassCreated {
            class_id: new_doc_id(),
            teacher_uid,
            class_code,
        };
        let scope = created.scope();
        let now = chrono::Utc::now();
        remote
            .save_doc(
                &scope.class_doc()?,
                json!({
                    "className": class.name,
                    "teacherName": class.teacher_name,
                    "classCode": created.class_code,
                    "createdAt": now,
                }),
            )
            .await?;
        remote
            .save_doc(
                &class_code_doc(&created.class_code)?,
                json!({
                    "teacherUid": created.teacher_uid,
                    "classId": created.class_id,
                    "className": class.name,
                }),
            )
            .await?;
        tracing::info!(%scope, code = %created.class_code, "Class created");

        let mut settings = self.settings()?;
        settings.class_name = class.name;
        settings.teacher_name = class.teacher_name;
        self.save_settings(&settings)?;

        self.set_scope(scope.clone())?;
        if let Err(e) = self.load_class_data(&scope).await {
            tracing::warn!(%scope, error = %e, "Initial load of new class failed");
        }
        Ok(created)
    }

    /// Resolve a class code and switch to that class.
    ///
    /// `None` for a malformed or unknown code, or when the remote cannot be
    /// reached; the caller decides whether to continue offline.
    pub async fn join_class_by_code(&self, code: &str) -> Result<Option<ClassScope>> {
        let code = match ClassCode::parse(code) {
            Ok(code) => code,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected class code");
                return Ok(None);
            }
        };
        if !self.wait_for_adapter().await {
            return Ok(None);
        }
        let scope = match self.shared.remote.resolve_code_to_scope(&code).await {
            Ok(Some(scope)) => scope,
            Ok(None) => {
                tracing::info!(%code, "Class code not found");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(%code, error = %e, "Class code lookup failed");
                return Ok(None);
            }
        };

        self.set_scope(scope.clone())?;
        if let Err(e) = self.load_class_data(&scope).await {
            tracing::warn!(%scope, error = %e, "Class data load failed, using cache");
        }
        Ok(Some(scope))
    }

    /// Switch to another class the device already knows and reload it.
    pub async fn switch_class(&self, scope: ClassScope) -> Result<LoadReport> {
        self.set_scope(scope.clone())?;
        self.load_class_data(&scope).await
    }

    /// Replace the cached class collections with the remote state of
    /// `scope`, keeping any local writes still waiting in the offline queue.
    pub async fn load_class_data(&self, scope: &ClassScope) -> Result<LoadReport> {
        if !self.shared.remote.is_initialized() {
            return Err(SyncError::AdapterUnavailable);
        }
        let remote = self.shared.remote.as_ref();

        let (students, praises, emotions, notices, notifications) = (
            scope.collection(Collection::Students)?,
            scope.collection(Collection::Praises)?,
            scope.collection(Collection::Emotions)?,
            scope.collection(Collection::Notices)?,
            scope.collection(Collection::Notifications)?,
        );
        let (students, praises, emotions, notices, notifications) = futures::try_join!(
            query_all(remote, students),
            query_all(remote, praises),
            query_all(remote, emotions),
            query_all(remote, notices),
            query_all(remote, notifications),
        )?;

        let mut data = ClassData {
            students: decode_plain(students, "student"),
            pets: Vec::new(),
            praises: from_documents(&praises),
            emotions: from_documents(&emotions),
            notices: from_documents(&notices),
            notifications: from_documents(&notifications),
        };
        for student in &data.students {
            let docs = query_all(remote, scope.pets(&student.id)?).await?;
            data.pets.extend(decode_plain::<Pet>(docs, "pet"));
        }
        data.praises.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        data.emotions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        data.notices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        data.notifications
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        data.overlay_active_pets();

        let report = {
            let db = self.db()?;
            if db.current_scope()?.as_ref() != Some(scope) {
                return Err(SyncError::ScopeChanged);
            }
            let pending: Vec<QueueEntry> = db
                .offline_queue()?
                .into_iter()
                .filter(|e| entry_scope(e).map_or(true, |s| &s == scope))
                .collect();
            data.overlay_pending(&pending);
            let tombstones = db.tombstones()?;
            let shadowing = data.drop_buried(&tombstones);
            // With nothing left to push, a tombstone that hid nothing has
            // seen its remote delete land.
            let tombstones = if pending.is_empty() { shadowing } else { tombstones };

            db.atomically(|db| -> Result<()> {
                db.save_tombstones(&tombstones)?;
                db.save_students(&data.students)?;
                db.save_pets(&data.pets)?;
                db.save_praise_log(&data.praises)?;
                db.save_emotion_log(&data.emotions)?;
                db.save_notices(&data.notices)?;
                db.save_notifications(&data.notifications)?;
                Ok(())
            })?;
            data.report(pending.len())
        };

        tracing::info!(%scope, ?report, "Class data loaded");
        self.events().emit_all([
            SyncEvent::StudentsChanged,
            SyncEvent::PetsChanged,
            SyncEvent::PraiseLogChanged,
            SyncEvent::EmotionLogChanged,
            SyncEvent::NoticesChanged,
            SyncEvent::NotificationsChanged,
        ]);
        Ok(report)
    }
}
