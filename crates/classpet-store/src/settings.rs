use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::Result;
use crate::models::Settings;

impl Database {
    /// Stored settings, or the defaults if none were saved yet.
    pub fn settings(&self) -> Result<Settings> {
        Ok(self.get_json(keys::SETTINGS)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.set_json(keys::SETTINGS, settings)
    }
}
