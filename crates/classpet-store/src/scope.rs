//! The current class scope, stored as two keys.

use classpet_shared::constants::keys;
use classpet_shared::ClassScope;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// The persisted scope, if both halves are present.
    pub fn current_scope(&self) -> Result<Option<ClassScope>> {
        let teacher_uid: Option<String> = self.get_json(keys::CURRENT_TEACHER_UID)?;
        let class_id: Option<String> = self.get_json(keys::CURRENT_CLASS_ID)?;
        Ok(match (teacher_uid, class_id) {
            (Some(teacher_uid), Some(class_id)) => Some(ClassScope {
                teacher_uid,
                class_id,
            }),
            _ => None,
        })
    }

    pub fn set_current_scope(&self, scope: &ClassScope) -> Result<()> {
        self.atomically(|db| {
            db.set_json(keys::CURRENT_TEACHER_UID, &scope.teacher_uid)?;
            db.set_json(keys::CURRENT_CLASS_ID, &scope.class_id)
        })
    }

    pub fn clear_current_scope(&self) -> Result<()> {
        self.atomically(|db| {
            db.remove(keys::CURRENT_TEACHER_UID)?;
            db.remove(keys::CURRENT_CLASS_ID)?;
            Ok(())
        })
    }
}
