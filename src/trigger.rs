//! Trigger source and the manager binding a session to it
//!
//! `Trigger<P>` is a small in-process emitter: acquisition code calls
//! `emit(payload)` once per tick and every subscriber runs synchronously on
//! the emitting thread. `SaveManager` subscribes a `SaveSession` on `start()`
//! and drops the subscription on `stop()` or as soon as the session stops
//! itself, so the manager is subscribed exactly while the session is enabled.

use crate::error::Result;
use crate::session::{Payload, SaveSession};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handle returned by `Trigger::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<P> = Arc<dyn Fn(&P) -> Result<()> + Send + Sync>;

/// In-process trigger emitter
pub struct Trigger<P: ?Sized> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<P>)>>,
    next_id: AtomicU64,
}

impl<P: ?Sized> Trigger<P> {
    /// Create a trigger with no subscribers
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register `handler` to run on every emission
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&P) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscriber; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Run every subscriber with `payload`, in subscription order
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while running. Stops at the first handler error.
    pub fn emit(&self, payload: &P) -> Result<()> {
        let handlers: Vec<Handler<P>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in handlers {
            handler(payload)?;
        }
        Ok(())
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl<P: ?Sized> Default for Trigger<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a `SaveSession` to a `Trigger`
///
/// The session runs under a mutex on whichever thread emits the trigger. The
/// session's write callback must not call back into the same manager.
pub struct SaveManager<T, P: ?Sized> {
    session: Arc<Mutex<SaveSession<T>>>,
    trigger: Arc<Trigger<P>>,
    subscription: Arc<Mutex<Option<SubscriptionId>>>,
}

impl<T, P> SaveManager<T, P>
where
    T: Clone + Send + 'static,
    P: Payload<T> + ?Sized + 'static,
{
    /// Bind `session` to `trigger`; nothing is subscribed until `start()`
    pub fn new(session: SaveSession<T>, trigger: Arc<Trigger<P>>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            trigger,
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the session and subscribe it to the trigger
    ///
    /// Does nothing if already subscribed.
    pub fn start(&self) -> Result<()> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Ok(());
        }

        self.session.lock().start()?;

        let session = Arc::downgrade(&self.session);
        let trigger = Arc::downgrade(&self.trigger);
        let slot = Arc::downgrade(&self.subscription);
        let id = self.trigger.subscribe(move |payload: &P| {
            let Some(session) = session.upgrade() else {
                return Ok(());
            };

            let mut session = session.lock();
            let result = session.run(payload);
            let stopped = !session.enabled();
            drop(session);

            if stopped {
                if let (Some(trigger), Some(slot)) = (trigger.upgrade(), slot.upgrade()) {
                    detach(&*trigger, &*slot);
                }
            }
            result
        });

        *subscription = Some(id);
        debug!(?id, "Save session subscribed to trigger");
        Ok(())
    }

    /// Unsubscribe and stop the session
    ///
    /// Samples still buffered are not flushed; use `with_session` and
    /// `SaveSession::stop_and_flush` for that.
    pub fn stop(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.trigger.unsubscribe(id);
            debug!(?id, "Save session unsubscribed from trigger");
        }
        self.session.lock().stop();
    }

    /// Whether the session is currently subscribed
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Run `f` with exclusive access to the session
    ///
    /// If `f` leaves the session stopped, the trigger subscription is dropped
    /// before this returns.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut SaveSession<T>) -> R) -> R {
        let (result, stopped) = {
            let mut session = self.session.lock();
            let result = f(&mut session);
            (result, !session.enabled())
        };

        if stopped {
            detach(&*self.trigger, &*self.subscription);
        }
        result
    }

    /// The trigger the session is bound to
    pub fn trigger(&self) -> &Arc<Trigger<P>> {
        &self.trigger
    }
}

fn detach<P: ?Sized>(trigger: &Trigger<P>, slot: &Mutex<Option<SubscriptionId>>) {
    let Some(id) = slot.lock().take() else {
        return;
    };
    trigger.unsubscribe(id);
    debug!(?id, "Save session stopped, unsubscribed from trigger");
}

impl<T, P: ?Sized> Drop for SaveManager<T, P> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.lock().take() {
            self.trigger.unsubscribe(id);
        }
    }
}
