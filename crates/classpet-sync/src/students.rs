//! Student roster operations.

use classpet_shared::leveling::level_for_exp;
use classpet_shared::types::{new_doc_id, validate_student_number};
use classpet_shared::{Collection, Pin, ValidationError};
use classpet_store::{PendingOp, Student};

use crate::engine::{Applied, PendingWrite, SyncEngine};
use crate::error::{or_missing, Result, SyncError};
use crate::events::SyncEvent;

fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName.into());
    }
    Ok(name.to_string())
}

impl SyncEngine {
    /// Add a student with the default PIN for their number.
    pub fn add_student(&self, number: u32, name: &str) -> Result<PendingWrite<Student>> {
        validate_student_number(number)?;
        let name = clean_name(name)?;
        let pin = Pin::default_for(number)?;

        self.apply(|db| {
            if db.find_student_by_number(number)?.is_some() {
                return Err(SyncError::DuplicateStudentNumber(number));
            }
            let student = Student::new(new_doc_id(), number, name, pin);
            db.upsert_student(&student)?;
            tracing::info!(student = %student.id, number, "Student added");
            Ok(Applied::new(student.clone())
                .op(PendingOp::SaveStudent(student))
                .event(SyncEvent::StudentsChanged))
        })
    }

    /// Replace a student's editable fields.  `level` is always recomputed
    /// from `exp`.
    pub fn update_student(&self, mut student: Student) -> Result<PendingWrite<Student>> {
        validate_student_number(student.number)?;
        student.name = clean_name(&student.name)?;
        student.level = level_for_exp(student.exp);

        self.apply(|db| {
            db.get_student(&student.id)
                .map_err(|e| or_missing(e, || SyncError::StudentNotFound(student.id.clone())))?;
            if let Some(other) = db.find_student_by_number(student.number)? {
                if other.id != student.id {
                    return Err(SyncError::DuplicateStudentNumber(student.number));
                }
            }
            db.upsert_student(&student)?;
            Ok(Applied::new(student.clone())
                .op(PendingOp::SaveStudent(student))
                .event(SyncEvent::StudentsChanged))
        })
    }

    /// Remove a student together with their pets, praises and emotions.
    pub fn delete_student(&self, student_id: &str) -> Result<PendingWrite<()>> {
        self.apply(|db| {
            if db.delete_student(student_id)?.is_none() {
                return Err(SyncError::StudentNotFound(student_id.into()));
            }
            db.remove_pets_for_student(student_id)?;
            let praises = db.remove_praises_for_student(student_id)?;
            let emotions = db.remove_emotions_for_student(student_id)?;
            db.bury(Collection::Students, [student_id])?;
            db.bury(Collection::Praises, praises.iter().map(|p| p.id.as_str()))?;
            db.bury(Collection::Emotions, emotions.iter().map(|e| e.id.as_str()))?;
            tracing::info!(
                student = student_id,
                praises = praises.len(),
                emotions = emotions.len(),
                "Student deleted"
            );
            Ok(Applied::new(())
                .op(PendingOp::DeleteStudent {
                    student_id: student_id.into(),
                })
                .event(SyncEvent::StudentsChanged)
                .event(SyncEvent::PetsChanged)
                .event(SyncEvent::PraiseLogChanged)
                .event(SyncEvent::EmotionLogChanged))
        })
    }

    pub fn change_pin(&self, student_id: &str, pin: &str) -> Result<PendingWrite<Student>> {
        let pin = Pin::parse(pin)?;
        self.modify_student(student_id, |student| {
            student.pin = pin;
            Ok(())
        })
    }

    /// Restore the PIN derived from the student's number.
    pub fn reset_pin(&self, student_id: &str) -> Result<PendingWrite<Student>> {
        self.modify_student(student_id, |student| {
            student.pin = Pin::default_for(student.number)?;
            Ok(())
        })
    }

    /// Look up the student with this number and PIN.
    pub fn authenticate_student(&self, number: u32, pin: &str) -> Result<Option<Student>> {
        let Ok(pin) = Pin::parse(pin) else {
            return Ok(None);
        };
        let found = self.db()?.find_student_by_number(number)?;
        Ok(found.filter(|s| s.pin == pin))
    }

    fn modify_student(
        &self,
        student_id: &str,
        f: impl FnOnce(&mut Student) -> Result<()>,
    ) -> Result<PendingWrite<Student>> {
        self.apply(|db| {
            let mut student = db
                .get_student(student_id)
                .map_err(|e| or_missing(e, || SyncError::StudentNotFound(student_id.into())))?;
            f(&mut student)?;
            db.upsert_student(&student)?;
            Ok(Applied::new(student.clone())
                .op(PendingOp::SaveStudent(student))
                .event(SyncEvent::StudentsChanged))
        })
    }
}
