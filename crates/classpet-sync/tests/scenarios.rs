//! End-to-end scenarios against the in-memory remote.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use classpet_shared::{ClassScope, Collection};
use classpet_store::{Database, PetStatus};
use classpet_sync::remote::memory::WriteRecord;
use classpet_sync::{
    DeferReason, MemoryRemote, NetworkMonitor, NewClass, SyncConfig, SyncEngine, WatchTarget,
    WriteOutcome,
};

fn engine_with(remote: &Arc<MemoryRemote>, online: bool) -> SyncEngine {
    SyncEngine::new(
        Database::open_in_memory().unwrap(),
        remote.clone(),
        NetworkMonitor::new(online),
        SyncConfig::default(),
    )
}

fn class_engine(online: bool) -> (SyncEngine, Arc<MemoryRemote>, ClassScope) {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_with(&remote, online);
    let scope = ClassScope::new("teacher-1", "class-1");
    engine.set_scope(scope.clone()).unwrap();
    (engine, remote, scope)
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn saved_names(remote: &MemoryRemote) -> Vec<String> {
    remote
        .writes()
        .into_iter()
        .filter_map(|w| match w {
            WriteRecord::Save { path, data } if path.contains("/students/") => {
                data["name"].as_str().map(str::to_string)
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn praise_levels_up_and_pet_can_be_replaced() {
    let (engine, remote, scope) = class_engine(true);
    let kim = engine.add_student(1, "Kim").unwrap().into_value();
    let first = engine.select_pet(&kim.id, "cat", "Nabi").unwrap().into_value();

    let mut last = None;
    for _ in 0..10 {
        last = Some(engine.add_praise(&kim.id, "effort").unwrap());
    }
    let kim_now = engine.student(&kim.id).unwrap();
    assert_eq!(kim_now.exp, 100);
    assert_eq!(kim_now.level, 2);
    assert_eq!(kim_now.total_praises, 10);
    assert_eq!(last.unwrap().outcome().await.unwrap(), WriteOutcome::Synced);

    let second = engine
        .complete_and_change_pet(&kim.id, "dog", "Bori")
        .unwrap();
    let second_id = second.value.id.clone();
    assert_eq!(second.outcome().await.unwrap(), WriteOutcome::Synced);

    let old_doc = remote.doc(&scope.pet(&kim.id, &first.id).unwrap()).unwrap();
    assert_eq!(old_doc["status"], "completed");
    assert!(old_doc.get("completedAt").is_some());

    let new_doc = remote.doc(&scope.pet(&kim.id, &second_id).unwrap()).unwrap();
    assert_eq!(new_doc["status"], "active");
    assert_eq!(new_doc["exp"], 0);
    assert_eq!(new_doc["level"], 1);

    let pets = engine.pets_for_student(&kim.id).unwrap();
    assert_eq!(pets.iter().filter(|p| p.status == PetStatus::Active).count(), 1);
}

#[tokio::test]
async fn later_offline_write_wins_after_reconnect() {
    let (engine, remote, scope) = class_engine(false);
    let mut kim = engine.add_student(1, "Kim").unwrap().into_value();
    kim.name = "Kim Minji".into();
    let update = engine.update_student(kim.clone()).unwrap();
    assert_eq!(
        update.outcome().await.unwrap(),
        WriteOutcome::Queued {
            reason: DeferReason::Offline
        }
    );
    assert_eq!(engine.pending_count().unwrap(), 2);

    engine.network().set_online(true);
    assert!(eventually(|| engine.pending_count().unwrap() == 0).await);

    let doc = remote
        .doc(&scope.doc(Collection::Students, &kim.id).unwrap())
        .unwrap();
    assert_eq!(doc["name"], "Kim Minji");
    assert_eq!(saved_names(&remote), ["Kim", "Kim Minji"]);
}

#[tokio::test]
async fn queued_writes_replay_in_enqueue_order() {
    let (engine, remote, _) = class_engine(false);
    let names = ["Ahn", "Baek", "Cho", "Do", "Eom"];
    for (i, name) in names.iter().enumerate() {
        engine.add_student(i as u32 + 1, name).unwrap();
    }
    // Let the writer park all of them.
    assert!(eventually(|| engine.pending_count().unwrap() == names.len()).await);

    engine.network().set_online(true);
    assert!(eventually(|| engine.pending_count().unwrap() == 0).await);
    assert_eq!(saved_names(&remote), names);
}

#[tokio::test]
async fn write_made_during_drain_is_not_lost() {
    let (engine, remote, _) = class_engine(false);
    engine.add_student(1, "Ahn").unwrap();
    assert!(eventually(|| engine.pending_count().unwrap() == 1).await);

    remote.pause_writes();
    engine.network().set_online(true);
    remote.wait_for_blocked(1).await;
    assert!(engine.is_draining());

    // The drain has already taken its snapshot.
    let late = engine.add_student(2, "Baek").unwrap();
    assert_eq!(
        late.outcome().await.unwrap(),
        WriteOutcome::Queued {
            reason: DeferReason::QueueBacklog
        }
    );
    assert_eq!(engine.pending_count().unwrap(), 1);

    remote.resume_writes();
    assert!(eventually(|| engine.pending_count().unwrap() == 0 && !engine.is_draining()).await);
    assert_eq!(saved_names(&remote), ["Ahn", "Baek"]);
}

#[tokio::test]
async fn repeated_snapshots_never_duplicate_records() {
    let (engine, remote, scope) = class_engine(true);
    engine.watch(WatchTarget::Notices).await.unwrap();

    let path = scope.doc(Collection::Notices, "n-remote").unwrap();
    let body = json!({
        "id": "n-remote",
        "title": "Sports day",
        "content": "<p>Wear sneakers</p>",
        "plainText": "Wear sneakers",
        "date": "2024-05-01",
        "createdAt": { "seconds": 1714521600, "nanoseconds": 0 },
        "updatedAt": 1714521600000i64
    });
    for _ in 0..3 {
        remote.seed(&path, body.clone());
    }
    assert!(eventually(|| engine.notices().unwrap().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let notices = engine.notices().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].firebase_id.as_deref(), Some("n-remote"));
    assert_eq!(notices[0].created_at.to_rfc3339(), "2024-05-01T00:00:00+00:00");

    // Our own notice echoes back through the same watch.
    let due = chrono::NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
    let mine = engine.add_notice("Homework", "<p>Page 12</p>", due).unwrap();
    mine.outcome().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.notices().unwrap().len(), 2);
}

#[tokio::test]
async fn teacher_creates_class_and_student_device_joins() {
    let remote = Arc::new(MemoryRemote::new());
    let teacher = engine_with(&remote, true);
    let created = teacher
        .create_class(NewClass {
            name: "4-1".into(),
            teacher_name: "Mr. Han".into(),
        })
        .await
        .unwrap();
    let kim = teacher.add_student(3, "Kim").unwrap();
    kim.outcome().await.unwrap();

    let student_device = engine_with(&remote, true);
    let code = created.class_code.as_str().to_lowercase();
    let scope = student_device.join_class_by_code(&code).await.unwrap();
    assert_eq!(scope, Some(created.scope()));

    let me = student_device.authenticate_student(3, "0003").unwrap();
    assert_eq!(me.map(|s| s.name), Some("Kim".to_string()));
}

#[tokio::test]
async fn class_creation_fails_closed_without_adapter() {
    let remote = Arc::new(MemoryRemote::uninitialized());
    let config = SyncConfig {
        adapter_wait: Duration::from_millis(30),
        adapter_poll: Duration::from_millis(10),
        ..SyncConfig::default()
    };
    let engine = SyncEngine::new(
        Database::open_in_memory().unwrap(),
        remote.clone(),
        NetworkMonitor::new(true),
        config,
    );
    assert!(engine.create_class(NewClass::default()).await.is_err());
    assert!(engine.current_scope().unwrap().is_none());

    // Joining degrades to "not found" instead of failing.
    assert_eq!(engine.join_class_by_code("ABC234").await.unwrap(), None);
}
