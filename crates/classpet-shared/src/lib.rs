//! # classpet-shared
//!
//! Domain vocabulary shared by the ClassPet store and sync crates: class
//! scopes and codes, student PINs, remote document paths, and the pure pet
//! leveling rules.  Nothing in this crate performs I/O.

pub mod constants;
pub mod error;
pub mod leveling;
pub mod paths;
pub mod types;

pub use error::ValidationError;
pub use leveling::PetProgress;
pub use paths::{Collection, DocPath};
pub use types::{ClassCode, ClassScope, Pin};
