use thiserror::Error;

use classpet_shared::ValidationError;
use classpet_store::StoreError;

use crate::remote::RemoteError;

/// Errors surfaced by engine operations.
///
/// Remote failures during a write never show up here; they turn into
/// offline queue entries.  Local storage failures always do.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("Student number {0} is already taken")]
    DuplicateStudentNumber(u32),

    #[error("Unknown praise category: {0}")]
    UnknownCategory(String),

    #[error("Student {0} has no pet yet")]
    NoActivePet(String),

    #[error("Student {0} already has an active pet")]
    PetAlreadyActive(String),

    #[error("Emotion record not found: {0}")]
    EmotionNotFound(String),

    #[error("Notice not found: {0}")]
    NoticeNotFound(String),

    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    #[error("Remote adapter is not available")]
    AdapterUnavailable,

    #[error("No class selected")]
    NoScope,

    #[error("Class scope changed during the operation")]
    ScopeChanged,

    #[error("Could not find a free class code after {0} attempts")]
    ClassCodeExhausted(u32),

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Background writer stopped before reporting")]
    WriterStopped,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Map the store's generic not-found onto a specific engine error.
pub(crate) fn or_missing(err: StoreError, missing: impl FnOnce() -> SyncError) -> SyncError {
    match err {
        StoreError::NotFound(_) => missing(),
        other => SyncError::Store(other),
    }
}

/// Lock the cache, mapping a poisoned mutex onto [`SyncError::LockPoisoned`].
pub(crate) fn lock_db(
    db: &std::sync::Mutex<classpet_store::Database>,
) -> Result<std::sync::MutexGuard<'_, classpet_store::Database>> {
    db.lock().map_err(|_| SyncError::LockPoisoned)
}
