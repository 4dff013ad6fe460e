//! Class notices.

use chrono::{NaiveDate, Utc};

use classpet_shared::types::new_doc_id;
use classpet_shared::Collection;
use classpet_store::{plain_text_of, Notice, PendingOp};

use crate::engine::{Applied, PendingWrite, SyncEngine};
use crate::error::{or_missing, Result, SyncError};
use crate::events::SyncEvent;

impl SyncEngine {
    /// Publish a notice.  `content` is HTML; its plain-text form is derived.
    pub fn add_notice(
        &self,
        title: &str,
        content: &str,
        date: NaiveDate,
    ) -> Result<PendingWrite<Notice>> {
        self.apply(|db| {
            let now = Utc::now();
            let id = new_doc_id();
            let notice = Notice {
                firebase_id: Some(id.clone()),
                id,
                title: title.trim().to_string(),
                content: content.to_string(),
                plain_text: plain_text_of(content),
                date,
                created_at: now,
                updated_at: now,
                shared_to: None,
            };
            db.upsert_notice(&notice)?;
            Ok(Applied::new(notice.clone())
                .op(PendingOp::SaveNotice(notice))
                .event(SyncEvent::NoticesChanged))
        })
    }

    pub fn update_notice(
        &self,
        notice_id: &str,
        title: &str,
        content: &str,
    ) -> Result<PendingWrite<Notice>> {
        self.modify_notice(notice_id, |notice| {
            notice.title = title.trim().to_string();
            notice.content = content.to_string();
            notice.plain_text = plain_text_of(content);
        })
    }

    /// Share a notice with the given students, replacing any earlier list.
    pub fn share_notice(
        &self,
        notice_id: &str,
        student_ids: Vec<String>,
    ) -> Result<PendingWrite<Notice>> {
        self.modify_notice(notice_id, |notice| notice.shared_to = Some(student_ids))
    }

    pub fn delete_notice(&self, notice_id: &str) -> Result<PendingWrite<()>> {
        self.apply(|db| {
            if db.delete_notice(notice_id)?.is_none() {
                return Err(SyncError::NoticeNotFound(notice_id.into()));
            }
            db.bury(Collection::Notices, [notice_id])?;
            Ok(Applied::new(())
                .op(PendingOp::DeleteNotice {
                    notice_id: notice_id.into(),
                })
                .event(SyncEvent::NoticesChanged))
        })
    }

    fn modify_notice(
        &self,
        notice_id: &str,
        f: impl FnOnce(&mut Notice),
    ) -> Result<PendingWrite<Notice>> {
        self.apply(|db| {
            let mut notice = db
                .get_notice(notice_id)
                .map_err(|e| or_missing(e, || SyncError::NoticeNotFound(notice_id.into())))?;
            f(&mut notice);
            notice.updated_at = Utc::now();
            db.upsert_notice(&notice)?;
            Ok(Applied::new(notice.clone())
                .op(PendingOp::SaveNotice(notice))
                .event(SyncEvent::NoticesChanged))
        })
    }
}
