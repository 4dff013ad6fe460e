//! Typed access to the `praiseLog` key (newest first).

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::Result;
use crate::models::Praise;

impl Database {
    pub fn praise_log(&self) -> Result<Vec<Praise>> {
        Ok(self.get_json(keys::PRAISE_LOG)?.unwrap_or_default())
    }

    pub fn save_praise_log(&self, log: &[Praise]) -> Result<()> {
        self.set_json(keys::PRAISE_LOG, log)
    }

    /// Prepend one record.  Returns the updated log.
    pub fn prepend_praise(&self, praise: &Praise) -> Result<Vec<Praise>> {
        let mut log = self.praise_log()?;
        log.insert(0, praise.clone());
        self.save_praise_log(&log)?;
        Ok(log)
    }

    pub fn praises_for_student(&self, student_id: &str) -> Result<Vec<Praise>> {
        Ok(self
            .praise_log()?
            .into_iter()
            .filter(|p| p.student_id == student_id)
            .collect())
    }

    /// Drop the student's records.  Returns the removed ones.
    pub fn remove_praises_for_student(&self, student_id: &str) -> Result<Vec<Praise>> {
        let (removed, kept): (Vec<Praise>, Vec<Praise>) = self
            .praise_log()?
            .into_iter()
            .partition(|p| p.student_id == student_id);
        if !removed.is_empty() {
            self.save_praise_log(&kept)?;
        }
        Ok(removed)
    }
}
