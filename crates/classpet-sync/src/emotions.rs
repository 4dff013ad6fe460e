//! Emotion check-ins, their reply threads, and the teacher notifications
//! they raise.

use chrono::Utc;

use classpet_shared::types::new_doc_id;
use classpet_store::{
    ConversationEntry, Database, Emotion, EmotionSource, Notification, NotificationKind,
    PendingOp, Student,
};

use crate::engine::{Applied, PendingWrite, SyncEngine};
use crate::error::{or_missing, Result, SyncError};
use crate::events::SyncEvent;
use crate::praise::grant_exp;

fn load_emotion(db: &Database, emotion_id: &str) -> Result<Emotion> {
    db.get_emotion(emotion_id)
        .map_err(|e| or_missing(e, || SyncError::EmotionNotFound(emotion_id.into())))
}

fn notify<T>(
    db: &Database,
    kind: NotificationKind,
    student: &Student,
    emotion: &Emotion,
    message: &str,
    applied: Applied<T>,
) -> Result<Applied<T>> {
    let id = new_doc_id();
    let notification = Notification {
        firebase_id: Some(id.clone()),
        id,
        kind,
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        emotion: emotion.emotion.clone(),
        message: message.to_string(),
        created_at: Utc::now(),
        read: false,
    };
    db.prepend_notification(&notification)?;
    Ok(applied
        .op(PendingOp::SaveNotification(notification))
        .event(SyncEvent::NotificationsChanged))
}

impl SyncEngine {
    /// Record an emotion.  A check-in by the student also earns exp and
    /// notifies the teacher.
    pub fn add_emotion(
        &self,
        student_id: &str,
        emotion: &str,
        note: &str,
        source: EmotionSource,
    ) -> Result<PendingWrite<Emotion>> {
        let checkin_exp = self.config().emotion_checkin_exp;
        self.apply(|db| {
            let student = db
                .get_student(student_id)
                .map_err(|e| or_missing(e, || SyncError::StudentNotFound(student_id.into())))?;
            let now = Utc::now();
            let note = note.trim();
            let id = new_doc_id();
            let record = Emotion {
                firebase_id: Some(id.clone()),
                id,
                timestamp: now,
                student_id: student_id.into(),
                emotion: emotion.into(),
                note: note.into(),
                source,
                conversations: if note.is_empty() {
                    Vec::new()
                } else {
                    vec![ConversationEntry {
                        student_message: Some(note.into()),
                        student_at: Some(now),
                        ..ConversationEntry::default()
                    }]
                },
            };
            db.prepend_emotion(&record)?;
            let mut applied = Applied::new(record.clone())
                .op(PendingOp::SaveEmotion(record.clone()))
                .event(SyncEvent::EmotionLogChanged);

            if source == EmotionSource::Student {
                applied = grant_exp(db, student_id, checkin_exp, false, applied)?;
                applied = notify(
                    db,
                    NotificationKind::EmotionCheckIn,
                    &student,
                    &record,
                    note,
                    applied,
                )?;
            }
            tracing::debug!(student = student_id, emotion, ?source, "Emotion recorded");
            Ok(applied)
        })
    }

    /// Set the teacher reply on the latest thread entry.
    pub fn reply_to_emotion(&self, emotion_id: &str, message: &str) -> Result<PendingWrite<Emotion>> {
        self.apply(|db| {
            let mut emotion = load_emotion(db, emotion_id)?;
            emotion.set_reply(message.to_string(), Utc::now());
            db.update_emotion(&emotion)?;
            Ok(Applied::new(emotion.clone())
                .op(PendingOp::SaveEmotion(emotion))
                .event(SyncEvent::EmotionLogChanged))
        })
    }

    /// A student's follow-up message in an emotion thread.
    pub fn add_student_message(
        &self,
        emotion_id: &str,
        message: &str,
    ) -> Result<PendingWrite<Emotion>> {
        self.apply(|db| {
            let mut emotion = load_emotion(db, emotion_id)?;
            let student = db.get_student(&emotion.student_id).map_err(|e| {
                or_missing(e, || SyncError::StudentNotFound(emotion.student_id.clone()))
            })?;
            emotion.push_student_message(message.to_string(), Utc::now());
            db.update_emotion(&emotion)?;
            let applied = Applied::new(emotion.clone())
                .op(PendingOp::SaveEmotion(emotion.clone()))
                .event(SyncEvent::EmotionLogChanged);
            notify(
                db,
                NotificationKind::StudentMessage,
                &student,
                &emotion,
                message,
                applied,
            )
        })
    }

    /// Mark every teacher reply in the thread as read.  Nothing is written
    /// when there was nothing unread.
    pub fn mark_emotion_replies_read(&self, emotion_id: &str) -> Result<PendingWrite<Emotion>> {
        self.apply(|db| {
            let mut emotion = load_emotion(db, emotion_id)?;
            if !emotion.mark_replies_read() {
                return Ok(Applied::new(emotion));
            }
            db.update_emotion(&emotion)?;
            Ok(Applied::new(emotion.clone())
                .op(PendingOp::SaveEmotion(emotion))
                .event(SyncEvent::EmotionLogChanged))
        })
    }

    pub fn mark_notification_read(&self, id: &str) -> Result<PendingWrite<Notification>> {
        self.apply(|db| {
            let (notification, _) = db
                .mark_notification_read(id)
                .map_err(|e| or_missing(e, || SyncError::NotificationNotFound(id.into())))?;
            Ok(Applied::new(notification.clone())
                .op(PendingOp::SaveNotification(notification))
                .event(SyncEvent::NotificationsChanged))
        })
    }
}
