//! Typed access to the `notices` key (newest first).

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Notice;

impl Database {
    pub fn notices(&self) -> Result<Vec<Notice>> {
        Ok(self.get_json(keys::NOTICES)?.unwrap_or_default())
    }

    pub fn save_notices(&self, notices: &[Notice]) -> Result<()> {
        self.set_json(keys::NOTICES, notices)
    }

    pub fn get_notice(&self, id: &str) -> Result<Notice> {
        self.notices()?
            .into_iter()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("notice {id}")))
    }

    /// Replace by id, or insert at the front.
    pub fn upsert_notice(&self, notice: &Notice) -> Result<Vec<Notice>> {
        let mut notices = self.notices()?;
        match notices.iter_mut().find(|n| n.id == notice.id) {
            Some(existing) => *existing = notice.clone(),
            None => notices.insert(0, notice.clone()),
        }
        self.save_notices(&notices)?;
        Ok(notices)
    }

    pub fn delete_notice(&self, id: &str) -> Result<Option<Vec<Notice>>> {
        let mut notices = self.notices()?;
        let before = notices.len();
        notices.retain(|n| n.id != id);
        if notices.len() == before {
            return Ok(None);
        }
        self.save_notices(&notices)?;
        Ok(Some(notices))
    }
}
