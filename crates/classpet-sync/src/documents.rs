//! Conversion between cached records and remote documents.
//!
//! Remote documents carry their id in the path, not the body; cached copies
//! carry it back as `firebaseId`.  Timestamps arrive in whatever shape the
//! backend produced (RFC-3339, epoch millis, or `{seconds, nanoseconds}`)
//! and are rewritten to RFC-3339 before deserializing.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use classpet_shared::Collection;
use classpet_store::{Emotion, Notice, Notification, Praise};

use crate::remote::{RemoteDoc, RemoteError};

/// A cached record mirrored by a class-level remote collection.
pub trait RemoteRecord: Serialize + DeserializeOwned + Clone {
    const COLLECTION: Collection;
    const TIMESTAMP_FIELDS: &'static [&'static str];

    fn id(&self) -> &str;
    fn firebase_id(&self) -> Option<&str>;

    /// The student the record belongs to, for per-student collections.
    fn student_id(&self) -> Option<&str> {
        None
    }

    /// Extra shape fixes applied to the raw body before deserializing.
    fn normalize(_body: &mut Map<String, Value>) {}
}

impl RemoteRecord for Praise {
    const COLLECTION: Collection = Collection::Praises;
    const TIMESTAMP_FIELDS: &'static [&'static str] = &["timestamp"];

    fn id(&self) -> &str {
        &self.id
    }
    fn firebase_id(&self) -> Option<&str> {
        self.firebase_id.as_deref()
    }
    fn student_id(&self) -> Option<&str> {
        Some(&self.student_id)
    }
}

impl RemoteRecord for Emotion {
    const COLLECTION: Collection = Collection::Emotions;
    const TIMESTAMP_FIELDS: &'static [&'static str] = &["timestamp"];

    fn id(&self) -> &str {
        &self.id
    }
    fn firebase_id(&self) -> Option<&str> {
        self.firebase_id.as_deref()
    }
    fn student_id(&self) -> Option<&str> {
        Some(&self.student_id)
    }

    fn normalize(body: &mut Map<String, Value>) {
        if let Some(Value::Array(entries)) = body.get_mut("conversations") {
            for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
                normalize_fields(entry, &["studentAt", "replyAt"]);
            }
        }
        if let Some(Value::Object(reply)) = body.get_mut("reply") {
            normalize_fields(reply, &["repliedAt", "timestamp"]);
        }
    }
}

impl RemoteRecord for Notice {
    const COLLECTION: Collection = Collection::Notices;
    const TIMESTAMP_FIELDS: &'static [&'static str] = &["createdAt", "updatedAt"];

    fn id(&self) -> &str {
        &self.id
    }
    fn firebase_id(&self) -> Option<&str> {
        self.firebase_id.as_deref()
    }
}

impl RemoteRecord for Notification {
    const COLLECTION: Collection = Collection::Notifications;
    const TIMESTAMP_FIELDS: &'static [&'static str] = &["createdAt"];

    fn id(&self) -> &str {
        &self.id
    }
    fn firebase_id(&self) -> Option<&str> {
        self.firebase_id.as_deref()
    }
}

/// Body to store remotely: the record minus its `firebaseId`.
pub fn to_document<T: Serialize>(record: &T) -> Result<Value, RemoteError> {
    let mut value = serde_json::to_value(record).map_err(|e| RemoteError::Malformed {
        path: String::new(),
        reason: e.to_string(),
    })?;
    if let Value::Object(body) = &mut value {
        body.remove("firebaseId");
    }
    Ok(value)
}

/// Cached record for a remote document.  `firebaseId` is always the doc id;
/// a body without an `id` gets the doc id there too.
pub fn from_document<T: RemoteRecord>(doc: &RemoteDoc) -> Result<T, RemoteError> {
    let malformed = |reason: String| RemoteError::Malformed {
        path: format!("{}/{}", T::COLLECTION, doc.id),
        reason,
    };
    let Value::Object(mut body) = doc.data.clone() else {
        return Err(malformed("document body is not an object".into()));
    };
    normalize_fields(&mut body, T::TIMESTAMP_FIELDS);
    T::normalize(&mut body);
    body.insert("firebaseId".into(), Value::String(doc.id.clone()));
    if !matches!(body.get("id"), Some(Value::String(s)) if !s.is_empty()) {
        body.insert("id".into(), Value::String(doc.id.clone()));
    }
    serde_json::from_value(Value::Object(body)).map_err(|e| malformed(e.to_string()))
}

/// Decode every document, skipping (and logging) the ones that do not parse.
pub fn from_documents<T: RemoteRecord>(docs: &[RemoteDoc]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match from_document::<T>(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(collection = %T::COLLECTION, doc = %doc.id, error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}

fn normalize_fields(body: &mut Map<String, Value>, fields: &[&str]) {
    for field in fields {
        if let Some(value) = body.get_mut(*field) {
            if let Some(ts) = normalize_timestamp(value) {
                *value = Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true));
            }
        }
    }
}

/// Interpret any of the timestamp shapes a backend may hand back.
pub fn normalize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(obj) => {
            let seconds = obj
                .get("seconds")
                .or_else(|| obj.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            normalize_timestamp(&json!("2024-03-01T18:30:00+09:00")),
            Some(expected)
        );
        assert_eq!(
            normalize_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(
            normalize_timestamp(&json!({ "seconds": expected.timestamp(), "nanoseconds": 0 })),
            Some(expected)
        );
        assert_eq!(
            normalize_timestamp(&json!({ "_seconds": expected.timestamp() })),
            Some(expected)
        );
        assert_eq!(normalize_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn test_praise_document_round_trip() {
        let doc = RemoteDoc {
            id: "doc-1".into(),
            data: json!({
                "id": "p1",
                "timestamp": { "seconds": 1709285400, "nanoseconds": 0 },
                "studentId": "s1",
                "category": "노력",
                "expGain": 10
            }),
        };
        let praise: Praise = from_document(&doc).unwrap();
        assert_eq!(praise.id, "p1");
        assert_eq!(praise.firebase_id.as_deref(), Some("doc-1"));

        let body = to_document(&praise).unwrap();
        assert!(body.get("firebaseId").is_none());
        assert_eq!(body["studentId"], "s1");
    }

    #[test]
    fn test_missing_id_uses_doc_id() {
        let doc = RemoteDoc {
            id: "n9".into(),
            data: json!({
                "kind": "emotionCheckIn",
                "studentId": "s1",
                "studentName": "Kim",
                "emotion": "happy",
                "message": "",
                "createdAt": 1709285400000i64
            }),
        };
        let n: Notification = from_document(&doc).unwrap();
        assert_eq!(n.id, "n9");
        assert!(!n.read);
    }

    #[test]
    fn test_legacy_emotion_reply_timestamp() {
        let doc = RemoteDoc {
            id: "e1".into(),
            data: json!({
                "timestamp": 1709285400000i64,
                "studentId": "s1",
                "emotion": "sad",
                "note": "tired",
                "reply": { "message": "rest well", "timestamp": { "seconds": 1709289000 } }
            }),
        };
        let emotion: Emotion = from_document(&doc).unwrap();
        assert_eq!(emotion.conversations.len(), 1);
        assert_eq!(emotion.latest_reply(), Some("rest well"));
        assert!(emotion.conversations[0].reply_at.is_some());
    }

    #[test]
    fn test_malformed_documents_are_skipped() {
        let docs = vec![
            RemoteDoc {
                id: "bad".into(),
                data: json!("nope"),
            },
            RemoteDoc {
                id: "ok".into(),
                data: json!({
                    "timestamp": "2024-03-01T00:00:00Z",
                    "studentId": "s1",
                    "category": "친절",
                    "expGain": 10
                }),
            },
        ];
        let praises: Vec<Praise> = from_documents(&docs);
        assert_eq!(praises.len(), 1);
        assert_eq!(praises[0].id, "ok");
    }
}
