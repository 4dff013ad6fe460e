//! Replays a single [`PendingOp`] against the remote.

use classpet_shared::{ClassScope, Collection, DocPath};
use classpet_store::PendingOp;

use crate::documents::to_document;
use crate::remote::{QueryFilter, RemoteAdapter, RemoteError};

/// Apply `op` to the remote under `scope`.
pub(crate) async fn push_op(
    remote: &dyn RemoteAdapter,
    scope: &ClassScope,
    op: &PendingOp,
) -> Result<(), RemoteError> {
    match op {
        PendingOp::SaveStudent(student) => {
            let path = scope.doc(Collection::Students, &student.id)?;
            remote.save_doc(&path, to_document(student)?).await
        }
        PendingOp::DeleteStudent { student_id } => delete_student(remote, scope, student_id).await,
        PendingOp::SavePet(pet) => {
            let path = scope.pet(&pet.student_id, &pet.id)?;
            remote.save_doc(&path, to_document(pet)?).await
        }
        PendingOp::SavePraise(praise) => {
            let id = praise.firebase_id.as_deref().unwrap_or(&praise.id);
            let path = scope.doc(Collection::Praises, id)?;
            remote.save_doc(&path, to_document(praise)?).await
        }
        PendingOp::SaveEmotion(emotion) => {
            let id = emotion.firebase_id.as_deref().unwrap_or(&emotion.id);
            let path = scope.doc(Collection::Emotions, id)?;
            remote.save_doc(&path, to_document(emotion)?).await
        }
        PendingOp::SaveNotice(notice) => {
            let id = notice.firebase_id.as_deref().unwrap_or(&notice.id);
            let path = scope.doc(Collection::Notices, id)?;
            remote.save_doc(&path, to_document(notice)?).await
        }
        PendingOp::DeleteNotice { notice_id } => {
            remote
                .delete_doc(&scope.doc(Collection::Notices, notice_id)?)
                .await
        }
        PendingOp::SaveNotification(notification) => {
            let id = notification
                .firebase_id
                .as_deref()
                .unwrap_or(&notification.id);
            let path = scope.doc(Collection::Notifications, id)?;
            remote.save_doc(&path, to_document(notification)?).await
        }
    }
}

/// Delete the student document, then sweep its pets, praises and emotions.
/// Only the student delete decides success; sweep failures are logged.
async fn delete_student(
    remote: &dyn RemoteAdapter,
    scope: &ClassScope,
    student_id: &str,
) -> Result<(), RemoteError> {
    remote
        .delete_doc(&scope.doc(Collection::Students, student_id)?)
        .await?;

    let mut owned: Vec<DocPath> = Vec::new();
    let pets = scope.pets(student_id)?;
    match remote.query_docs(&pets, &QueryFilter::all()).await {
        Ok(docs) => {
            for doc in docs {
                owned.push(pets.child(&doc.id)?);
            }
        }
        Err(e) => tracing::warn!(student = student_id, error = %e, "Failed to list pets for cleanup"),
    }
    for collection in [Collection::Praises, Collection::Emotions] {
        let base = scope.collection(collection)?;
        let filter = QueryFilter::all().eq("studentId", student_id);
        match remote.query_docs(&base, &filter).await {
            Ok(docs) => {
                for doc in docs {
                    owned.push(base.child(&doc.id)?);
                }
            }
            Err(e) => tracing::warn!(
                student = student_id,
                %collection,
                error = %e,
                "Failed to list records for cleanup"
            ),
        }
    }

    for path in owned {
        if let Err(e) = remote.delete_doc(&path).await {
            tracing::warn!(%path, error = %e, "Failed to delete student record");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;
    use classpet_shared::Pin;
    use classpet_store::Student;
    use serde_json::json;

    fn scope() -> ClassScope {
        ClassScope::new("t1", "c1")
    }

    #[tokio::test]
    async fn test_save_student_lands_at_scoped_path() {
        let remote = MemoryRemote::new();
        let student = Student::new("s1".into(), 3, "Kim".into(), Pin::default_for(3).unwrap());
        push_op(&remote, &scope(), &PendingOp::SaveStudent(student))
            .await
            .unwrap();

        let path = scope().doc(Collection::Students, "s1").unwrap();
        assert_eq!(path.as_str(), "teacher/t1/class/c1/students/s1");
        assert_eq!(remote.doc(&path).unwrap()["name"], "Kim");
    }

    #[tokio::test]
    async fn test_delete_student_sweeps_owned_records() {
        let remote = MemoryRemote::new();
        let s = scope();
        remote.seed(&s.doc(Collection::Students, "s1").unwrap(), json!({}));
        remote.seed(&s.pet("s1", "p1").unwrap(), json!({}));
        remote.seed(
            &s.doc(Collection::Praises, "pr1").unwrap(),
            json!({ "studentId": "s1" }),
        );
        remote.seed(
            &s.doc(Collection::Praises, "pr2").unwrap(),
            json!({ "studentId": "s2" }),
        );
        remote.seed(
            &s.doc(Collection::Emotions, "e1").unwrap(),
            json!({ "studentId": "s1" }),
        );

        push_op(
            &remote,
            &s,
            &PendingOp::DeleteStudent {
                student_id: "s1".into(),
            },
        )
        .await
        .unwrap();

        assert!(remote.doc(&s.pet("s1", "p1").unwrap()).is_none());
        assert!(remote.doc(&s.doc(Collection::Praises, "pr1").unwrap()).is_none());
        assert!(remote.doc(&s.doc(Collection::Praises, "pr2").unwrap()).is_some());
        assert!(remote.doc(&s.doc(Collection::Emotions, "e1").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_failed_write_surfaces() {
        let remote = MemoryRemote::new();
        remote.fail_writes(true);
        let err = push_op(
            &remote,
            &scope(),
            &PendingOp::DeleteNotice {
                notice_id: "n1".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.is_transient());
    }
}
