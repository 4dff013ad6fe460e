//! Persisted FIFO behind the offline queue.
//!
//! The sync layer serializes access through its cache lock; each function
//! here is a single read-modify-write of the `offlineQueue` key.

use classpet_shared::constants::keys;

use crate::database::Database;
use crate::error::Result;
use crate::models::QueueEntry;

impl Database {
    pub fn offline_queue(&self) -> Result<Vec<QueueEntry>> {
        Ok(self.get_json(keys::OFFLINE_QUEUE)?.unwrap_or_default())
    }

    /// Append at the tail.  Returns the new queue length.
    pub fn push_queue_entry(&self, entry: &QueueEntry) -> Result<usize> {
        let mut queue = self.offline_queue()?;
        queue.push(entry.clone());
        self.set_json(keys::OFFLINE_QUEUE, &queue)?;
        Ok(queue.len())
    }

    /// Snapshot the whole queue and clear it.
    pub fn take_queue(&self) -> Result<Vec<QueueEntry>> {
        let queue = self.offline_queue()?;
        if !queue.is_empty() {
            self.set_json(keys::OFFLINE_QUEUE, &Vec::<QueueEntry>::new())?;
        }
        Ok(queue)
    }

    /// Put `entries` back ahead of anything enqueued since they were taken.
    /// Returns the new queue length.
    pub fn requeue_front(&self, entries: Vec<QueueEntry>) -> Result<usize> {
        let current = self.offline_queue()?;
        if entries.is_empty() {
            return Ok(current.len());
        }
        let mut queue = entries;
        queue.extend(current);
        self.set_json(keys::OFFLINE_QUEUE, &queue)?;
        Ok(queue.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PendingOp;
    use chrono::Utc;

    fn entry(id: &str) -> QueueEntry {
        QueueEntry {
            id: id.into(),
            op: PendingOp::DeleteNotice {
                notice_id: id.into(),
            },
            teacher_uid: Some("t".into()),
            class_id: Some("c".into()),
            timestamp: Utc::now(),
            attempts: 0,
        }
    }

    fn ids(q: &[QueueEntry]) -> Vec<&str> {
        q.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn push_and_take() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.push_queue_entry(&entry("a")).unwrap(), 1);
        assert_eq!(db.push_queue_entry(&entry("b")).unwrap(), 2);

        let taken = db.take_queue().unwrap();
        assert_eq!(ids(&taken), vec!["a", "b"]);
        assert!(db.offline_queue().unwrap().is_empty());
    }

    #[test]
    fn requeue_goes_ahead_of_new_entries() {
        let db = Database::open_in_memory().unwrap();
        db.push_queue_entry(&entry("a")).unwrap();
        let taken = db.take_queue().unwrap();
        db.push_queue_entry(&entry("late")).unwrap();

        assert_eq!(db.requeue_front(taken).unwrap(), 2);
        assert_eq!(ids(&db.offline_queue().unwrap()), vec!["a", "late"]);
    }
}
