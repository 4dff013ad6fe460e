//! Praise: the main exp source.

use chrono::Utc;

use classpet_shared::types::new_doc_id;
use classpet_store::{Database, PendingOp, Praise};

use crate::engine::{Applied, PendingWrite, SyncEngine};
use crate::error::{or_missing, Result, SyncError};
use crate::events::SyncEvent;

impl SyncEngine {
    /// Record a praise and grant its exp to the student and their active pet
    /// in the same local transaction.
    pub fn add_praise(&self, student_id: &str, category_id: &str) -> Result<PendingWrite<Praise>> {
        self.apply(|db| {
            let settings = db.settings()?;
            let category = settings
                .category(category_id)
                .ok_or_else(|| SyncError::UnknownCategory(category_id.into()))?;

            let id = new_doc_id();
            let praise = Praise {
                firebase_id: Some(id.clone()),
                id,
                timestamp: Utc::now(),
                student_id: student_id.into(),
                category: category.name.clone(),
                exp_gain: category.exp,
            };
            db.prepend_praise(&praise)?;
            let applied = Applied::new(praise.clone())
                .op(PendingOp::SavePraise(praise))
                .event(SyncEvent::PraiseLogChanged);
            tracing::debug!(student = student_id, category = category_id, exp = category.exp, "Praise added");
            grant_exp(db, student_id, category.exp, true, applied)
        })
    }
}

/// Add `gain` to the student and their active pet, appending the saves to
/// `applied`.
pub(crate) fn grant_exp<T>(
    db: &Database,
    student_id: &str,
    gain: u32,
    counts_as_praise: bool,
    applied: Applied<T>,
) -> Result<Applied<T>> {
    let mut student = db
        .get_student(student_id)
        .map_err(|e| or_missing(e, || SyncError::StudentNotFound(student_id.into())))?;
    student.gain_exp(gain);
    if counts_as_praise {
        student.total_praises = student.total_praises.saturating_add(1);
    }
    db.upsert_student(&student)?;
    let mut applied = applied
        .op(PendingOp::SaveStudent(student))
        .event(SyncEvent::StudentsChanged);

    if let Some(mut pet) = db.active_pet(student_id)? {
        if pet.gain_exp(gain, Utc::now()) {
            if !pet.is_active() {
                tracing::info!(student = student_id, pet = %pet.id, "Pet reached final level");
            }
            db.upsert_pet(&pet)?;
            applied = applied
                .op(PendingOp::SavePet(pet))
                .event(SyncEvent::PetsChanged);
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use crate::engine::testing::*;
    use crate::error::SyncError;
    use crate::events::SyncEvent;
    use classpet_store::PetStatus;

    #[tokio::test]
    async fn test_praise_is_visible_immediately() {
        // Offline: the remote half never completes during this test.
        let h = scoped(false);
        let kim = h.engine.add_student(1, "Kim").unwrap().into_value();
        let praise = h.engine.add_praise(&kim.id, "kindness").unwrap();

        let kim = h.engine.student(&kim.id).unwrap();
        assert_eq!((kim.exp, kim.level, kim.total_praises), (10, 1, 1));
        assert_eq!(praise.value.category, "친절");
        assert_eq!(praise.value.firebase_id.as_deref(), Some(praise.value.id.as_str()));
        assert_eq!(h.engine.praise_log().unwrap()[0].id, praise.value.id);

        let events = h.events.lock().unwrap();
        assert!(events.contains(&SyncEvent::PraiseLogChanged));
        assert!(events.contains(&SyncEvent::StudentsChanged));
    }

    #[tokio::test]
    async fn test_unknown_category_changes_nothing() {
        let h = scoped(true);
        let kim = h.engine.add_student(1, "Kim").unwrap().into_value();
        assert!(matches!(
            h.engine.add_praise(&kim.id, "singing"),
            Err(SyncError::UnknownCategory(_))
        ));
        assert!(matches!(
            h.engine.add_praise("nobody", "effort"),
            Err(SyncError::StudentNotFound(_))
        ));
        assert!(h.engine.praise_log().unwrap().is_empty());
        assert_eq!(h.engine.student(&kim.id).unwrap().exp, 0);
    }

    #[tokio::test]
    async fn test_pet_completes_at_final_level() {
        let h = scoped(false);
        let kim = h.engine.add_student(1, "Kim").unwrap().into_value();
        h.engine.select_pet(&kim.id, "cat", "Nabi").unwrap();

        for _ in 0..40 {
            h.engine.add_praise(&kim.id, "effort").unwrap();
        }
        let pet = &h.engine.pets_for_student(&kim.id).unwrap()[0];
        assert_eq!(pet.status, PetStatus::Completed);
        assert_eq!((pet.level, pet.exp), (5, 100));

        // A completed pet no longer moves.
        h.engine.add_praise(&kim.id, "effort").unwrap();
        let pet = &h.engine.pets_for_student(&kim.id).unwrap()[0];
        assert_eq!((pet.level, pet.exp), (5, 100));
        assert_eq!(h.engine.student(&kim.id).unwrap().level, 5);
    }
}
