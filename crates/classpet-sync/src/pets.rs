//! Pet selection and the completed-pet cycle.

use chrono::Utc;

use classpet_shared::types::new_doc_id;
use classpet_store::{CompletedPet, Database, PendingOp, Pet, Student};

use crate::engine::{Applied, PendingWrite, SyncEngine};
use crate::error::{or_missing, Result, SyncError};
use crate::events::SyncEvent;

fn load_student(db: &Database, student_id: &str) -> Result<Student> {
    db.get_student(student_id)
        .map_err(|e| or_missing(e, || SyncError::StudentNotFound(student_id.into())))
}

fn adopt(student: &mut Student, pet: &Pet) {
    student.pet_type = Some(pet.pet_type.clone());
    student.pet_name = Some(pet.pet_name.clone());
    student.active_pet_id = Some(pet.id.clone());
}

impl SyncEngine {
    /// Give a student their first pet.
    pub fn select_pet(
        &self,
        student_id: &str,
        pet_type: &str,
        pet_name: &str,
    ) -> Result<PendingWrite<Pet>> {
        self.apply(|db| {
            let mut student = load_student(db, student_id)?;
            if db.active_pet(student_id)?.is_some() {
                return Err(SyncError::PetAlreadyActive(student_id.into()));
            }
            let pet = Pet::new(
                new_doc_id(),
                student_id.into(),
                pet_type.into(),
                pet_name.into(),
            );
            adopt(&mut student, &pet);
            db.upsert_pet(&pet)?;
            db.upsert_student(&student)?;
            tracing::info!(student = student_id, pet = %pet.id, pet_type, "Pet selected");
            Ok(Applied::new(pet.clone())
                .op(PendingOp::SavePet(pet))
                .op(PendingOp::SaveStudent(student))
                .event(SyncEvent::PetsChanged)
                .event(SyncEvent::StudentsChanged))
        })
    }

    /// Retire the student's current pet and start a new one.
    ///
    /// The old pet is finalized (if it had not completed on its own) and
    /// recorded in `completedPets`; the student's exp and level restart with
    /// the new pet.
    pub fn complete_and_change_pet(
        &self,
        student_id: &str,
        pet_type: &str,
        pet_name: &str,
    ) -> Result<PendingWrite<Pet>> {
        self.apply(|db| {
            let mut student = load_student(db, student_id)?;
            let current = match &student.active_pet_id {
                Some(id) => db
                    .pets_for_student(student_id)?
                    .into_iter()
                    .find(|p| &p.id == id),
                None => db.active_pet(student_id)?,
            };
            let Some(mut old) = current else {
                return Err(SyncError::NoActivePet(student_id.into()));
            };

            let now = Utc::now();
            old.finalize(now);
            student.completed_pets.push(CompletedPet {
                pet_id: old.id.clone(),
                pet_type: old.pet_type.clone(),
                pet_name: old.pet_name.clone(),
                completed_at: old.completed_at.unwrap_or(now),
            });

            let pet = Pet::new(
                new_doc_id(),
                student_id.into(),
                pet_type.into(),
                pet_name.into(),
            );
            adopt(&mut student, &pet);
            student.exp = pet.exp;
            student.level = pet.level;

            db.upsert_pet(&old)?;
            db.upsert_pet(&pet)?;
            db.upsert_student(&student)?;
            tracing::info!(
                student = student_id,
                old = %old.id,
                new = %pet.id,
                "Pet completed and replaced"
            );
            Ok(Applied::new(pet.clone())
                .op(PendingOp::SavePet(old))
                .op(PendingOp::SavePet(pet))
                .op(PendingOp::SaveStudent(student))
                .event(SyncEvent::PetsChanged)
                .event(SyncEvent::StudentsChanged))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::testing::*;
    use crate::error::SyncError;
    use classpet_store::PetStatus;

    #[tokio::test]
    async fn test_select_pet_once() {
        let h = scoped(true);
        let kim = h.engine.add_student(1, "Kim").unwrap().into_value();
        let pet = h.engine.select_pet(&kim.id, "cat", "Nabi").unwrap().into_value();
        assert!(pet.is_active());
        assert_eq!((pet.level, pet.exp), (1, 0));

        let kim = h.engine.student(&kim.id).unwrap();
        assert_eq!(kim.active_pet_id.as_deref(), Some(pet.id.as_str()));
        assert_eq!(kim.pet_name.as_deref(), Some("Nabi"));

        assert!(matches!(
            h.engine.select_pet(&kim.id, "dog", "Bori"),
            Err(SyncError::PetAlreadyActive(_))
        ));
    }

    #[tokio::test]
    async fn test_change_requires_a_pet() {
        let h = scoped(true);
        let kim = h.engine.add_student(1, "Kim").unwrap().into_value();
        assert!(matches!(
            h.engine.complete_and_change_pet(&kim.id, "dog", "Bori"),
            Err(SyncError::NoActivePet(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_and_change() {
        let h = scoped(true);
        let kim = h.engine.add_student(1, "Kim").unwrap().into_value();
        let first = h.engine.select_pet(&kim.id, "cat", "Nabi").unwrap().into_value();
        for _ in 0..3 {
            h.engine.add_praise(&kim.id, "effort").unwrap();
        }

        let second = h
            .engine
            .complete_and_change_pet(&kim.id, "dog", "Bori")
            .unwrap()
            .into_value();

        let pets = h.engine.pets_for_student(&kim.id).unwrap();
        let old = pets.iter().find(|p| p.id == first.id).unwrap();
        assert_eq!(old.status, PetStatus::Completed);
        assert!(old.completed_at.is_some());
        assert!(second.is_active());

        let kim = h.engine.student(&kim.id).unwrap();
        assert_eq!(kim.completed_pets.len(), 1);
        assert_eq!(kim.completed_pets[0].pet_id, first.id);
        assert_eq!((kim.exp, kim.level), (0, 1));
        assert_eq!(kim.active_pet_id, Some(second.id));
    }
}
