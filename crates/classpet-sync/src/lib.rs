//! # classpet-sync
//!
//! Client-side synchronization engine for ClassPet.
//!
//! Every mutation is applied to the local cache first and announced on the
//! [`EventBus`]; the matching remote write is then attempted by a background
//! writer and, if it cannot happen right now, parked in the persisted
//! [`OfflineQueue`] until connectivity returns.  Realtime snapshots from the
//! [`RemoteAdapter`] are merged into the cache by `firebaseId`, so the echo of
//! an optimistic write never shows up twice.

pub mod config;
pub mod documents;
pub mod engine;
pub mod events;
pub mod logging;
pub mod network;
pub mod queue;
pub mod realtime;
pub mod remote;

mod emotions;
mod error;
mod notices;
mod pets;
mod praise;
mod push;
mod resolver;
mod settings;
mod students;

pub use config::SyncConfig;
pub use engine::{DeferReason, PendingWrite, SyncEngine, WriteOutcome};
pub use error::{Result, SyncError};
pub use events::{EventBus, ListenerId, SyncEvent};
pub use network::NetworkMonitor;
pub use queue::{DrainOutcome, DrainReport, OfflineQueue, SkipReason};
pub use realtime::{RealtimeMerge, Subscription, WatchTarget};
pub use remote::memory::MemoryRemote;
pub use remote::{QueryFilter, RemoteAdapter, RemoteDoc, RemoteError};
pub use resolver::{ClassCreated, LoadReport, NewClass};
