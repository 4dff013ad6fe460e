//! Domain model structs persisted in the local cache.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names, which is also the shape of the matching remote documents.
//! Timestamps are `DateTime<Utc>` and therefore always cached as RFC-3339.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use classpet_shared::leveling::{level_for_exp, PetProgress};
use classpet_shared::{Collection, Pin};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// A praise button and the exp it grants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PraiseCategory {
    pub id: String,
    pub name: String,
    pub exp: u32,
}

impl PraiseCategory {
    pub fn new(id: &str, name: &str, exp: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            exp,
        }
    }
}

/// Per-device class settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub class_name: String,
    pub teacher_name: String,
    pub praise_categories: Vec<PraiseCategory>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            class_name: String::new(),
            teacher_name: String::new(),
            praise_categories: vec![
                PraiseCategory::new("effort", "노력", 10),
                PraiseCategory::new("kindness", "친절", 10),
                PraiseCategory::new("responsibility", "책임감", 10),
                PraiseCategory::new("participation", "참여", 10),
                PraiseCategory::new("creativity", "창의성", 10),
            ],
        }
    }
}

impl Settings {
    pub fn category(&self, id: &str) -> Option<&PraiseCategory> {
        self.praise_categories.iter().find(|c| c.id == id)
    }
}

// ---------------------------------------------------------------------------
// Student
// ---------------------------------------------------------------------------

/// A pet the student raised to the end (or swapped out).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPet {
    pub pet_id: String,
    pub pet_type: String,
    pub pet_name: String,
    pub completed_at: DateTime<Utc>,
}

/// A student in the current class.
///
/// `exp` accumulates across praises and check-ins; `level` is always
/// `level_for_exp(exp)`.  The pet fields are a denormalized copy of the
/// student's active [`Pet`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub number: u32,
    pub name: String,
    pub pin: Pin,
    #[serde(default)]
    pub exp: u32,
    #[serde(default = "first_level")]
    pub level: u32,
    #[serde(default)]
    pub total_praises: u32,
    #[serde(default)]
    pub pet_type: Option<String>,
    #[serde(default)]
    pub pet_name: Option<String>,
    #[serde(default)]
    pub active_pet_id: Option<String>,
    #[serde(default)]
    pub completed_pets: Vec<CompletedPet>,
}

fn first_level() -> u32 {
    1
}

impl Student {
    pub fn new(id: String, number: u32, name: String, pin: Pin) -> Self {
        Self {
            id,
            number,
            name,
            pin,
            exp: 0,
            level: 1,
            total_praises: 0,
            pet_type: None,
            pet_name: None,
            active_pet_id: None,
            completed_pets: Vec::new(),
        }
    }

    /// Add exp and recompute the level.
    pub fn gain_exp(&mut self, gain: u32) {
        self.exp = self.exp.saturating_add(gain);
        self.level = level_for_exp(self.exp);
    }
}

// ---------------------------------------------------------------------------
// Pet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PetStatus {
    Active,
    Completed,
}

/// Remote source of truth for a student's pet.  At most one pet per student
/// is `Active`; `Completed` pets are never modified again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: String,
    pub student_id: String,
    pub pet_type: String,
    pub pet_name: String,
    pub status: PetStatus,
    pub exp: u32,
    pub level: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Pet {
    pub fn new(id: String, student_id: String, pet_type: String, pet_name: String) -> Self {
        Self {
            id,
            student_id,
            pet_type,
            pet_name,
            status: PetStatus::Active,
            exp: PetProgress::START.exp,
            level: PetProgress::START.level,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PetStatus::Active
    }

    pub fn progress(&self) -> PetProgress {
        PetProgress {
            level: self.level,
            exp: self.exp,
            completed: self.status == PetStatus::Completed,
        }
    }

    /// Apply an exp gain.  Reaching the final level completes the pet.
    /// Returns `false` (and changes nothing) if the pet is already completed.
    pub fn gain_exp(&mut self, gain: u32, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        let next = self.progress().gain(gain);
        self.level = next.level;
        self.exp = next.exp;
        if next.completed {
            self.finalize(now);
        }
        true
    }

    /// Flip an active pet to completed.  No-op on an already completed pet.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        if self.is_active() {
            self.status = PetStatus::Completed;
            self.completed_at = Some(now);
        }
    }
}

// ---------------------------------------------------------------------------
// Praise
// ---------------------------------------------------------------------------

/// Append-only praise record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Praise {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub student_id: String,
    pub category: String,
    pub exp_gain: u32,
}

// ---------------------------------------------------------------------------
// Emotion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EmotionSource {
    #[default]
    Student,
    Teacher,
}

/// One exchange in an emotion thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read: bool,
}

/// Single teacher reply carried by records written before threads existed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LegacyReply {
    Text(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        message: String,
        #[serde(default, alias = "timestamp")]
        replied_at: Option<DateTime<Utc>>,
        #[serde(default)]
        read: bool,
    },
}

/// The two stored shapes of an emotion's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmotionRecord {
    Legacy { reply: Option<LegacyReply> },
    Threaded { conversations: Vec<ConversationEntry> },
}

impl EmotionRecord {
    /// Canonical thread.  A legacy record becomes a single entry holding the
    /// check-in note and the reply, if either exists.
    pub fn into_conversations(self, note: &str, at: DateTime<Utc>) -> Vec<ConversationEntry> {
        match self {
            Self::Threaded { conversations } => conversations,
            Self::Legacy { reply } => {
                let student_message = (!note.is_empty()).then(|| note.to_string());
                let (teacher_reply, reply_at, read) = match reply {
                    Some(LegacyReply::Text(message)) => (Some(message), None, false),
                    Some(LegacyReply::Detailed {
                        message,
                        replied_at,
                        read,
                    }) => (Some(message), replied_at, read),
                    None => (None, None, false),
                };
                if student_message.is_none() && teacher_reply.is_none() {
                    return Vec::new();
                }
                vec![ConversationEntry {
                    student_at: student_message.as_ref().map(|_| at),
                    student_message,
                    teacher_reply,
                    reply_at,
                    read,
                }]
            }
        }
    }
}

/// Emotion check-in, always held in the threaded shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", from = "EmotionWire")]
pub struct Emotion {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub student_id: String,
    pub emotion: String,
    pub note: String,
    pub source: EmotionSource,
    pub conversations: Vec<ConversationEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmotionWire {
    id: String,
    #[serde(default)]
    firebase_id: Option<String>,
    timestamp: DateTime<Utc>,
    student_id: String,
    emotion: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    source: EmotionSource,
    #[serde(default)]
    conversations: Option<Vec<ConversationEntry>>,
    #[serde(default)]
    reply: Option<LegacyReply>,
}

impl From<EmotionWire> for Emotion {
    fn from(wire: EmotionWire) -> Self {
        let record = match wire.conversations {
            Some(conversations) => EmotionRecord::Threaded { conversations },
            None => EmotionRecord::Legacy { reply: wire.reply },
        };
        let conversations = record.into_conversations(&wire.note, wire.timestamp);
        Self {
            id: wire.id,
            firebase_id: wire.firebase_id,
            timestamp: wire.timestamp,
            student_id: wire.student_id,
            emotion: wire.emotion,
            note: wire.note,
            source: wire.source,
            conversations,
        }
    }
}

impl Emotion {
    /// Set or replace the teacher reply on the latest entry, opening an entry
    /// if the thread is empty.  A reply is never cleared.
    pub fn set_reply(&mut self, message: String, now: DateTime<Utc>) {
        if self.conversations.is_empty() {
            self.conversations.push(ConversationEntry::default());
        }
        if let Some(last) = self.conversations.last_mut() {
            last.teacher_reply = Some(message);
            last.reply_at = Some(now);
            last.read = false;
        }
    }

    /// Append a new student message as a fresh entry.
    pub fn push_student_message(&mut self, message: String, now: DateTime<Utc>) {
        self.conversations.push(ConversationEntry {
            student_message: Some(message),
            student_at: Some(now),
            ..ConversationEntry::default()
        });
    }

    /// Mark every replied entry as read.  Returns `true` if anything changed.
    pub fn mark_replies_read(&mut self) -> bool {
        let mut changed = false;
        for entry in &mut self.conversations {
            if entry.teacher_reply.is_some() && !entry.read {
                entry.read = true;
                changed = true;
            }
        }
        changed
    }

    pub fn latest_reply(&self) -> Option<&str> {
        self.conversations
            .iter()
            .rev()
            .find_map(|c| c.teacher_reply.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Notice
// ---------------------------------------------------------------------------

/// Teacher-authored notice, optionally shared with some students.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_id: Option<String>,
    pub title: String,
    /// HTML body.
    pub content: String,
    pub plain_text: String,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_to: Option<Vec<String>>,
}

/// Strip HTML tags and collapse whitespace.
pub fn plain_text_of(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let text = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    EmotionCheckIn,
    StudentMessage,
}

/// Teacher-facing notification raised by student activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_id: Option<String>,
    pub kind: NotificationKind,
    pub student_id: String,
    pub student_name: String,
    pub emotion: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

// ---------------------------------------------------------------------------
// Offline queue
// ---------------------------------------------------------------------------

/// A remote write waiting for replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PendingOp {
    SaveStudent(Student),
    #[serde(rename_all = "camelCase")]
    DeleteStudent { student_id: String },
    SavePet(Pet),
    SavePraise(Praise),
    SaveEmotion(Emotion),
    SaveNotice(Notice),
    #[serde(rename_all = "camelCase")]
    DeleteNotice { notice_id: String },
    SaveNotification(Notification),
}

impl PendingOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveStudent(_) => "saveStudent",
            Self::DeleteStudent { .. } => "deleteStudent",
            Self::SavePet(_) => "savePet",
            Self::SavePraise(_) => "savePraise",
            Self::SaveEmotion(_) => "saveEmotion",
            Self::SaveNotice(_) => "saveNotice",
            Self::DeleteNotice { .. } => "deleteNotice",
            Self::SaveNotification(_) => "saveNotification",
        }
    }
}

/// Offline queue entry.  The scope is captured at enqueue time; it is `None`
/// when the write happened before any class was selected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: String,
    pub op: PendingOp,
    pub teacher_uid: Option<String>,
    pub class_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Failed replays so far.
    #[serde(default)]
    pub attempts: u32,
}

/// A record deleted on this device.  Remote copies of it are ignored until
/// the remote delete is known to have landed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub collection: Collection,
    pub id: String,
    pub deleted_at: DateTime<Utc>,
}
