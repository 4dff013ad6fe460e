use thiserror::Error;

/// Input that failed domain validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid class code {0:?}: expected 6 letters or digits")]
    InvalidClassCode(String),

    #[error("Invalid PIN: expected 4 digits")]
    InvalidPin,

    #[error("Invalid student number {0}: expected 1..=9999")]
    InvalidStudentNumber(u32),

    #[error("Name must not be empty")]
    EmptyName,

    #[error("Invalid path segment {0:?}")]
    InvalidPathSegment(String),
}
