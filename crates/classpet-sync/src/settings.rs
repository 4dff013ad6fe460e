use classpet_store::Settings;

use crate::engine::SyncEngine;
use crate::error::Result;
use crate::events::SyncEvent;

impl SyncEngine {
    /// Settings are per device and never leave the local cache.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.db()?.save_settings(settings)?;
        self.events().emit(SyncEvent::SettingsChanged);
        Ok(())
    }
}
