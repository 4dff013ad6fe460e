//! Typed access to the `emotionLog` key (newest first).

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Emotion;

impl Database {
    pub fn emotion_log(&self) -> Result<Vec<Emotion>> {
        Ok(self.get_json(keys::EMOTION_LOG)?.unwrap_or_default())
    }

    pub fn save_emotion_log(&self, log: &[Emotion]) -> Result<()> {
        self.set_json(keys::EMOTION_LOG, log)
    }

    pub fn prepend_emotion(&self, emotion: &Emotion) -> Result<Vec<Emotion>> {
        let mut log = self.emotion_log()?;
        log.insert(0, emotion.clone());
        self.save_emotion_log(&log)?;
        Ok(log)
    }

    pub fn get_emotion(&self, id: &str) -> Result<Emotion> {
        self.emotion_log()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("emotion {id}")))
    }

    /// Replace an existing record in place.
    pub fn update_emotion(&self, emotion: &Emotion) -> Result<Vec<Emotion>> {
        let mut log = self.emotion_log()?;
        let slot = log
            .iter_mut()
            .find(|e| e.id == emotion.id)
            .ok_or_else(|| StoreError::NotFound(format!("emotion {}", emotion.id)))?;
        *slot = emotion.clone();
        self.save_emotion_log(&log)?;
        Ok(log)
    }

    /// Drop the student's records.  Returns the removed ones.
    pub fn remove_emotions_for_student(&self, student_id: &str) -> Result<Vec<Emotion>> {
        let (removed, kept): (Vec<Emotion>, Vec<Emotion>) = self
            .emotion_log()?
            .into_iter()
            .partition(|e| e.student_id == student_id);
        if !removed.is_empty() {
            self.save_emotion_log(&kept)?;
        }
        Ok(removed)
    }
}
