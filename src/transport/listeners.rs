//! Listener registry shared by all transport backends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::Inbound;

/// Callback invoked for an inbound envelope.
pub type Handler = Arc<dyn Fn(&Inbound) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_key: u64,
    handlers: Vec<(u64, Handler)>,
}

/// Ordered set of handlers. Dispatch runs handlers outside the lock, so a
/// handler may subscribe or unsubscribe re-entrantly.
#[derive(Default)]
pub struct Listeners {
    inner: Mutex<Registry>,
}

impl Listeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(self: &Arc<Self>, handler: Handler) -> Subscription {
        let mut registry = self.lock();
        let key = registry.next_key;
        registry.next_key += 1;
        registry.handlers.push((key, handler));
        Subscription {
            registry: Arc::downgrade(self),
            key,
        }
    }

    /// Remove one handler. Returns `false` if it was already gone.
    pub fn remove(&self, key: u64) -> bool {
        let mut registry = self.lock();
        let before = registry.handlers.len();
        registry.handlers.retain(|(k, _)| *k != key);
        registry.handlers.len() != before
    }

    /// Run every registered handler against `inbound`, in registration order.
    pub fn dispatch(&self, inbound: &Inbound) {
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(inbound);
        }
    }

    pub fn clear(&self) {
        self.lock().handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a registered handler.
///
/// Dropping the handle does NOT remove the handler; call [`unsubscribe`](Self::unsubscribe).
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Listeners>,
    key: u64,
}

impl Subscription {
    /// Remove the handler. Idempotent.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.key))
            .unwrap_or(false)
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.lock().handlers.iter().any(|(k, _)| *k == self.key))
            .unwrap_or(false)
    }
}
