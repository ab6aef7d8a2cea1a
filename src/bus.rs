//! Typed publish/subscribe router for decoded envelopes.
//!
//! Handlers for a kind run in registration order. Dispatch snapshots the
//! registration list and invokes handlers outside the registry lock, so a
//! handler may subscribe or cancel freely; a token cancelled mid-dispatch
//! suppresses its handler for the remainder of that dispatch as well.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use sonic_rs::Value;
use tracing::error;

use crate::core::{Envelope, EventKind};

type EventHandler = Box<dyn FnMut(&Value) + Send>;

struct Registration {
    active: Arc<AtomicBool>,
    handler: Arc<Mutex<EventHandler>>,
}

struct BusInner {
    registry: Mutex<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
}

/// Cheaply clonable handle to the shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`EventBus::subscribe`]; cancels the subscription.
///
/// Cancellation is explicit, not tied to the token's drop: registrations are
/// bound to the authentication lifecycle, not to any one consumer's scope.
#[derive(Clone)]
pub struct SubscriptionToken {
    kind: EventKind,
    id: u64,
    active: Arc<AtomicBool>,
}

impl SubscriptionToken {
    /// Immediately and idempotently removes the handler. A handler cancelled
    /// during an in-flight dispatch of the same kind is never invoked again,
    /// including later in that dispatch.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// A panicking handler must not poison shared state for everyone else.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for `kind`. Handlers run in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionToken
    where
        F: FnMut(&Value) + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let registration = Registration {
            active: Arc::clone(&active),
            handler: Arc::new(Mutex::new(Box::new(handler))),
        };
        relock(&self.inner.registry)
            .entry(kind)
            .or_default()
            .push(registration);
        SubscriptionToken { kind, id, active }
    }

    /// Equivalent to `token.cancel()`; kept for call sites that prefer the
    /// bus-centric spelling.
    pub fn unsubscribe(&self, token: &SubscriptionToken) {
        token.cancel();
    }

    /// Deliver `envelope.payload` to every live handler for `envelope.kind`.
    ///
    /// A panicking handler is isolated and logged; subsequent handlers still
    /// run, and the subscription stays registered for future events.
    pub fn publish(&self, envelope: &Envelope) {
        let snapshot: Vec<(Arc<AtomicBool>, Arc<Mutex<EventHandler>>)> = {
            let mut registry = relock(&self.inner.registry);
            let Some(registrations) = registry.get_mut(&envelope.kind) else {
                return;
            };
            registrations.retain(|r| r.active.load(Ordering::Acquire));
            registrations
                .iter()
                .map(|r| (Arc::clone(&r.active), Arc::clone(&r.handler)))
                .collect()
        };

        for (active, handler) in snapshot {
            // Re-check right before the call: an earlier handler in this very
            // dispatch may have cancelled this one.
            if !active.load(Ordering::Acquire) {
                continue;
            }
            let payload = &envelope.payload;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut handler = relock(&handler);
                (handler)(payload);
            }));
            if let Err(panic) = outcome {
                let detail = panic_message(&panic);
                error!(kind = %envelope.kind, detail, "event handler panicked");
            }
        }
    }

    /// Number of live subscriptions for `kind` (diagnostics and tests).
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        relock(&self.inner.registry)
            .get(&kind)
            .map(|regs| {
                regs.iter()
                    .filter(|r| r.active.load(Ordering::Acquire))
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
