//! Hierarchical remote document paths.
//!
//! Every class-owned document lives under
//! `teacher/{teacherUid}/class/{classId}/{collection}/{docId}`; pets are
//! nested one level deeper under `students/{studentId}/pets/{petId}`.

use serde::{Deserialize, Serialize};

use crate::constants::CLASS_CODE_REGISTRY;
use crate::error::ValidationError;
use crate::types::{ClassCode, ClassScope};

/// Class-level collections that the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Students,
    Praises,
    Emotions,
    Notices,
    Notifications,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Praises => "praises",
            Self::Emotions => "emotions",
            Self::Notices => "notices",
            Self::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slash-separated path to a remote collection or document.
///
/// An even number of segments addresses a document, an odd number a
/// collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(path: &str) -> Result<Self, ValidationError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidPathSegment(path.to_string()));
        }
        if let Some(bad) = trimmed.split('/').find(|s| s.is_empty()) {
            return Err(ValidationError::InvalidPathSegment(bad.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Append one segment.  Slashes inside `segment` are rejected.
    pub fn child(&self, segment: &str) -> Result<Self, ValidationError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(ValidationError::InvalidPathSegment(segment.to_string()));
        }
        Ok(Self(format!("{}/{}", self.0, segment)))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn is_document(&self) -> bool {
        self.segments().count() % 2 == 0
    }

    /// Last segment: the document id or the collection name.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The enclosing collection (for documents) or document (for collections).
    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('/').map(|(head, _)| Self(head.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocPath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.0
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ClassScope {
    /// `teacher/{teacherUid}/class/{classId}`
    pub fn class_doc(&self) -> Result<DocPath, ValidationError> {
        DocPath::parse("teacher")?
            .child(&self.teacher_uid)?
            .child("class")?
            .child(&self.class_id)
    }

    pub fn collection(&self, collection: Collection) -> Result<DocPath, ValidationError> {
        self.class_doc()?.child(collection.as_str())
    }

    pub fn doc(&self, collection: Collection, id: &str) -> Result<DocPath, ValidationError> {
        self.collection(collection)?.child(id)
    }

    /// `.../students/{studentId}/pets`
    pub fn pets(&self, student_id: &str) -> Result<DocPath, ValidationError> {
        self.doc(Collection::Students, student_id)?.child("pets")
    }

    pub fn pet(&self, student_id: &str, pet_id: &str) -> Result<DocPath, ValidationError> {
        self.pets(student_id)?.child(pet_id)
    }
}

/// `classCodes/{code}`: the lookup document mapping a code to its scope.
pub fn class_code_doc(code: &ClassCode) -> Result<DocPath, ValidationError> {
    DocPath::parse(CLASS_CODE_REGISTRY)?.child(code.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ClassScope {
        ClassScope::new("t1", "c1")
    }

    #[test]
    fn class_paths() {
        let s = scope();
        assert_eq!(s.class_doc().unwrap().as_str(), "teacher/t1/class/c1");
        assert_eq!(
            s.doc(Collection::Praises, "p9").unwrap().as_str(),
            "teacher/t1/class/c1/praises/p9"
        );
        assert_eq!(
            s.pet("s1", "pet1").unwrap().as_str(),
            "teacher/t1/class/c1/students/s1/pets/pet1"
        );
    }

    #[test]
    fn document_vs_collection() {
        let s = scope();
        assert!(s.class_doc().unwrap().is_document());
        assert!(!s.collection(Collection::Notices).unwrap().is_document());
        assert!(s.pet("s1", "p1").unwrap().is_document());
    }

    #[test]
    fn parent_and_id() {
        let p = scope().doc(Collection::Emotions, "e1").unwrap();
        assert_eq!(p.id(), "e1");
        assert_eq!(
            p.parent().unwrap().as_str(),
            "teacher/t1/class/c1/emotions"
        );
    }

    #[test]
    fn rejects_bad_segments() {
        assert!(DocPath::parse("a//b").is_err());
        assert!(DocPath::parse("").is_err());
        assert!(scope().doc(Collection::Students, "x/y").is_err());
        assert!(ClassScope::new("", "c").class_doc().is_err());
    }

    #[test]
    fn class_code_registry_path() {
        let code = ClassCode::parse("abc123").unwrap();
        assert_eq!(class_code_doc(&code).unwrap().as_str(), "classCodes/ABC123");
    }
}
