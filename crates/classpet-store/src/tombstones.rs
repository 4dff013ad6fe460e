//! Ids deleted on this device, kept under the `tombstones` key.
//!
//! A remote snapshot taken before a delete lands still contains the record;
//! merges and loads skip anything listed here so it is not brought back.

use std::collections::HashSet;

use chrono::Utc;

use classpet_shared::constants::keys;
use classpet_shared::Collection;

use crate::database::Database;
use crate::error::Result;
use crate::models::Tombstone;

impl Database {
    pub fn tombstones(&self) -> Result<Vec<Tombstone>> {
        Ok(self.get_json(keys::TOMBSTONES)?.unwrap_or_default())
    }

    pub fn save_tombstones(&self, tombstones: &[Tombstone]) -> Result<()> {
        if tombstones.is_empty() {
            self.remove(keys::TOMBSTONES)?;
            return Ok(());
        }
        self.set_json(keys::TOMBSTONES, tombstones)
    }

    /// Record deletions.  Ids already buried are skipped.
    pub fn bury<'a>(
        &self,
        collection: Collection,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize> {
        let mut tombstones = self.tombstones()?;
        let before = tombstones.len();
        let now = Utc::now();
        for id in ids {
            if !tombstones
                .iter()
                .any(|t| t.collection == collection && t.id == id)
            {
                tombstones.push(Tombstone {
                    collection,
                    id: id.to_string(),
                    deleted_at: now,
                });
            }
        }
        if tombstones.len() != before {
            self.save_tombstones(&tombstones)?;
        }
        Ok(tombstones.len() - before)
    }

    pub fn buried_ids(&self, collection: Collection) -> Result<HashSet<String>> {
        Ok(self
            .tombstones()?
            .into_iter()
            .filter(|t| t.collection == collection)
            .map(|t| t.id)
            .collect())
    }

    pub fn clear_tombstones(&self) -> Result<()> {
        self.remove(keys::TOMBSTONES)?;
        Ok(())
    }
}
