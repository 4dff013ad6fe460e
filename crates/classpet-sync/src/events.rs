//! Change notifications for the UI layer.
//!
//! Listeners are plain callbacks.  They run synchronously on the thread that
//! emitted the event and never while the cache lock is held.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use classpet_shared::ClassScope;

/// Something in the local view changed.
///
/// The `*Changed` collection events carry no data.  They are emitted after
/// the cache write, so a listener reads the full merged collection back
/// through the matching engine accessor (`praise_log`, `notices`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SyncEvent {
    StudentsChanged,
    PetsChanged,
    PraiseLogChanged,
    EmotionLogChanged,
    NoticesChanged,
    NotificationsChanged,
    SettingsChanged,
    ClassChanged(Option<ClassScope>),
    QueueChanged { pending: usize },
    ConnectivityChanged { online: bool },
    /// A remote write was parked in the offline queue.  `message` is the
    /// user-facing toast text.
    #[serde(rename_all = "camelCase")]
    WriteDeferred { op_kind: String, message: String },
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Fan-out of [`SyncEvent`]s to registered listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the listener was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let before = registry.listeners.len();
        registry.listeners.retain(|(lid, _)| *lid != id);
        registry.listeners.len() != before
    }

    pub fn emit(&self, event: SyncEvent) {
        let listeners: Vec<Listener> = self
            .registry()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        tracing::trace!(?event, listeners = listeners.len(), "Emitting sync event");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = SyncEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry().listeners.len()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A panicking listener cannot leave the registry half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
