//! Typed access to the `notifications` key (newest first).

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Notification;

impl Database {
    pub fn notifications(&self) -> Result<Vec<Notification>> {
        Ok(self.get_json(keys::NOTIFICATIONS)?.unwrap_or_default())
    }

    pub fn save_notifications(&self, list: &[Notification]) -> Result<()> {
        self.set_json(keys::NOTIFICATIONS, list)
    }

    pub fn prepend_notification(&self, notification: &Notification) -> Result<Vec<Notification>> {
        let mut list = self.notifications()?;
        list.insert(0, notification.clone());
        self.save_notifications(&list)?;
        Ok(list)
    }

    /// Flag one notification as read.  Returns the updated record.
    pub fn mark_notification_read(&self, id: &str) -> Result<(Notification, Vec<Notification>)> {
        let mut list = self.notifications()?;
        let slot = list
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))?;
        slot.read = true;
        let updated = slot.clone();
        self.save_notifications(&list)?;
        Ok((updated, list))
    }

    pub fn unread_notification_count(&self) -> Result<usize> {
        Ok(self.notifications()?.iter().filter(|n| !n.read).count())
    }
}
