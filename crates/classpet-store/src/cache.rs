//! The key/value primitive every typed accessor is built on.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Raw JSON stored under `key`, if any.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Decode the value stored under `key`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store raw JSON under `key`, replacing any previous value.
    ///
    /// Fails with [`StoreError::QuotaExceeded`] when a quota is set and the
    /// write would exceed it; the previous value is left untouched.
    pub fn set_raw(&self, key: &str, json: &str) -> Result<()> {
        if let Some(quota) = self.quota() {
            let existing: i64 = self
                .conn()
                .query_row(
                    "SELECT COALESCE(LENGTH(CAST(value AS BLOB)), 0) FROM kv_store WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);
            let needed = self.used_bytes()? - existing as u64 + json.len() as u64;
            if needed > quota {
                tracing::warn!(key, needed, quota, "cache quota exceeded");
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }

        self.conn().execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Encode `value` as JSON and store it under `key`.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, &json)
    }

    /// Delete `key`.  Returns `true` if a value was removed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare("SELECT key FROM kv_store ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<String>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Total bytes of stored values.
    pub fn used_bytes(&self) -> Result<u64> {
        let used: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM kv_store",
            [],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }

    /// Run `f` inside a SQLite transaction so multi-key writes land together.
    /// Any error returned by `f` rolls the whole batch back.
    pub fn atomically<T, E>(
        &self,
        f: impl FnOnce(&Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self
            .conn()
            .unchecked_transaction()
            .map_err(StoreError::from)?;
        let out = f(self)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        count: u32,
    }

    #[test]
    fn get_missing_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_raw("nope").unwrap(), None);
        assert_eq!(db.get_json::<Item>("nope").unwrap(), None);
    }

    #[test]
    fn set_get_remove() {
        let db = Database::open_in_memory().unwrap();
        let item = Item {
            name: "a".into(),
            count: 2,
        };
        db.set_json("item", &item).unwrap();
        assert_eq!(db.get_json::<Item>("item").unwrap(), Some(item));

        db.set_json(
            "item",
            &Item {
                name: "b".into(),
                count: 3,
            },
        )
        .unwrap();
        assert_eq!(db.get_json::<Item>("item").unwrap().unwrap().name, "b");
        assert_eq!(db.keys().unwrap(), vec!["item".to_string()]);

        assert!(db.remove("item").unwrap());
        assert!(!db.remove("item").unwrap());
        assert!(db.keys().unwrap().is_empty());
    }

    #[test]
    fn corrupt_value_surfaces_json_error() {
        let db = Database::open_in_memory().unwrap();
        db.set_raw("item", "{not json").unwrap();
        assert!(matches!(db.get_json::<Item>("item"), Err(StoreError::Json(_))));
    }

    #[test]
    fn quota_rejects_oversized_write_and_keeps_old_value() {
        let db = Database::open_in_memory().unwrap().with_quota(32);
        db.set_raw("a", "\"short\"").unwrap();

        let big = format!("\"{}\"", "x".repeat(64));
        let err = db.set_raw("a", &big).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { quota: 32, .. }));
        assert_eq!(db.get_raw("a").unwrap().as_deref(), Some("\"short\""));
    }

    #[test]
    fn quota_counts_replacement_not_sum() {
        let db = Database::open_in_memory().unwrap().with_quota(20);
        db.set_raw("a", &"1".repeat(15)).unwrap();
        // Replacing the same key frees the old bytes first.
        db.set_raw("a", &"2".repeat(18)).unwrap();
        assert!(db.set_raw("b", "123").is_err());
        assert_eq!(db.used_bytes().unwrap(), 18);
    }

    #[test]
    fn atomically_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap().with_quota(16);
        let result: Result<()> = db.atomically(|db| {
            db.set_raw("a", "1")?;
            db.set_raw("b", &"9".repeat(64))
        });
        assert!(result.is_err());
        assert_eq!(db.get_raw("a").unwrap(), None);
    }
}
