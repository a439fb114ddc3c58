//! Handler registries for session events
//!
//! Each registry is an insertion-ordered collection of subscriber handles.
//! Registration hands back a [`Subscription`] deregistration token that
//! removes exactly that entry; entries are keyed by a generational
//! [`HandlerId`] rather than by closure identity, so a handler can be
//! removed safely even while a dispatch is in flight.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Generational key identifying one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Entries<A: ?Sized> {
    handlers: Vec<(HandlerId, Handler<A>)>,
    next_id: u64,
}

/// Insertion-ordered registry of event handlers.
///
/// Dispatch invokes every handler in registration order against a snapshot
/// of the registry, so handlers may register or deregister (themselves or
/// others) during a dispatch without disturbing it.
pub struct Registry<A> {
    inner: Arc<Mutex<Entries<A>>>,
}

impl<A: 'static> Registry<A> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Entries {
                handlers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Append a handler and return its deregistration token.
    pub fn register(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut entries = self.inner.lock().unwrap();
            let id = HandlerId(entries.next_id);
            entries.next_id += 1;
            entries.handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<Entries<A>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .unwrap()
                        .handlers
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Invoke every registered handler, in registration order.
    ///
    /// A panicking handler is logged and contained; subsequent handlers in
    /// the same dispatch still run.
    pub fn dispatch(&self, arg: &A) {
        let snapshot: Vec<Handler<A>> = {
            let entries = self.inner.lock().unwrap();
            entries.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(arg))).is_err() {
                warn!("Event handler panicked during dispatch");
            }
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: 'static> Default for Registry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for Registry<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Deregistration token for one registered handler.
///
/// Calling [`cancel`](Self::cancel) removes that entry; after cancellation
/// the handler receives zero further dispatches. Dropping the token without
/// cancelling leaves the handler registered for the registry's lifetime.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove the associated handler from its registry.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
