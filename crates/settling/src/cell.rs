#![forbid(unsafe_code)]

//! Reactive cells for values that may not have arrived yet.
//!
//! # Design
//!
//! [`Eventual<T, E>`] wraps a [`Settlement`] and a subscriber list in shared,
//! reference-counted storage. Cloning an `Eventual` creates a new handle to
//! the **same** cell. Subscribers are plain callbacks invoked synchronously,
//! in registration order, every time the settlement is published.
//!
//! A cell built with [`Eventual::from_future`] stays pending until the
//! future completes; completion applies only while the cell is still pending
//! (first-settlement-wins), so a value pushed earlier through the activation
//! path or a [`Setter`] is never overwritten by a straggling constructor
//! future. [`Eventual::set`] and [`Eventual::update`] are the explicit
//! override channel and always apply.
//!
//! # Scheduling model
//!
//! Everything here is single-threaded and cooperative: `get`, `subscribe`,
//! and `set` never suspend, and all ordering guarantees (broadcast in call
//! order, registration-order delivery) rely on serialized execution on one
//! logical thread. Constructor futures are driven by
//! `tokio::task::spawn_local`, so future-backed cells must be created inside
//! a `tokio::task::LocalSet` running on a current-thread runtime. A port to
//! a multi-threaded runtime would have to serialize cell mutation to keep
//! these guarantees.
//!
//! # Invariants
//!
//! 1. `get()` is a synchronous snapshot; it never blocks or suspends.
//! 2. A new subscriber is invoked exactly once with the current settlement,
//!    synchronously, before `subscribe` returns.
//! 3. The activation callback runs when the subscriber count rises from
//!    zero, and its teardown runs when the count falls back to zero.
//! 4. A dropped cell turns every outstanding [`Setter`] and
//!    [`Subscription`] into a no-op.
//!
//! # Failure Modes
//!
//! - **User errors**: never thrown. A rejecting constructor future becomes
//!   `Settlement::Failed`; subscribers observe it as data.
//! - **Re-entrant mutation**: a subscriber may call `set` on the cell it
//!   observes. Nested publishes are queued and delivered once the in-flight
//!   pass finishes, in set-call order, so a callback is never re-entered
//!   while it is still running.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::settlement::Settlement;

/// Teardown closure returned by an activation callback, run after the last
/// subscriber unsubscribes.
pub type Teardown = Box<dyn FnOnce()>;

/// Activation callback: runs when the subscriber count rises from zero,
/// receives a [`Setter`] for the cell, and may hand back a [`Teardown`].
///
/// This defers side-effecting connections (opening a feed, starting a poll
/// loop) until there is at least one consumer, and tears them down when the
/// consumers are gone. The callback is reused: if the subscriber count later
/// rises from zero again, it runs again.
pub type Activation<T, E> = Box<dyn FnMut(Setter<T, E>) -> Option<Teardown>>;

type Callback<T, E> = Rc<RefCell<dyn FnMut(&Settlement<T, E>)>>;

struct Inner<T, E> {
    state: Settlement<T, E>,
    /// Registration-ordered subscriber list. Ids are never reused.
    subscribers: Vec<(u64, Callback<T, E>)>,
    next_id: u64,
    activation: Option<Activation<T, E>>,
    teardown: Option<Teardown>,
    /// True while the activation callback is running; publishes during
    /// activation record state without broadcasting.
    activating: bool,
    /// Pending deliveries. Non-empty exactly while a delivery pass is in
    /// flight; nested publishes append here instead of recursing.
    queue: VecDeque<(u64, Callback<T, E>, Settlement<T, E>)>,
}

/// A reactive holder of a [`Settlement`] plus its subscriber list.
///
/// Cloning creates a new handle to the same cell; the cell is destroyed when
/// the last handle drops.
pub struct Eventual<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Eventual<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Eventual<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Eventual")
            .field("state", &inner.state.kind())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Default for Eventual<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Eventual<T, E> {
    /// Create a pending cell with no activation callback.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(Settlement::Pending, None)
    }

    /// Create a cell already settled with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::with_parts(Settlement::Ready(value), None)
    }

    /// Create a cell already settled with `error`.
    #[must_use]
    pub fn failed(error: E) -> Self {
        Self::with_parts(Settlement::Failed(error), None)
    }

    /// Create a cell starting in an arbitrary settlement.
    #[must_use]
    pub fn from_settlement(initial: Settlement<T, E>) -> Self {
        Self::with_parts(initial, None)
    }

    /// Create a pending cell with a lazy activation callback.
    ///
    /// `activate` runs when the first subscriber arrives — not before — and
    /// may return a teardown closure run after the last unsubscribe.
    #[must_use]
    pub fn with_activation(
        activate: impl FnMut(Setter<T, E>) -> Option<Teardown> + 'static,
    ) -> Self {
        Self::with_parts(Settlement::Pending, Some(Box::new(activate)))
    }

    /// Create a pending cell that settles when `future` completes.
    ///
    /// An `Err` outcome settles the cell to `Failed`; it is never a panic.
    /// Completion applies only while the cell is still pending, so a value
    /// set earlier through a [`Setter`] or the override channel wins.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio::task::LocalSet` context, which is
    /// required to drive the future on the current thread.
    #[must_use]
    pub fn from_future(future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        let cell = Self::new();
        cell.drive(future);
        cell
    }

    /// [`Eventual::from_future`] plus an activation callback.
    ///
    /// Whichever of {future completion, activation-driven set} happens first
    /// settles the cell for the initial period; the constructor future never
    /// overwrites a settled cell.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio::task::LocalSet` context.
    #[must_use]
    pub fn from_future_with(
        future: impl Future<Output = Result<T, E>> + 'static,
        activate: impl FnMut(Setter<T, E>) -> Option<Teardown> + 'static,
    ) -> Self {
        let cell = Self::with_activation(activate);
        cell.drive(future);
        cell
    }

    fn with_parts(initial: Settlement<T, E>, activation: Option<Activation<T, E>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: initial,
                subscribers: Vec::new(),
                next_id: 0,
                activation,
                teardown: None,
                activating: false,
                queue: VecDeque::new(),
            })),
        }
    }

    fn drive(&self, future: impl Future<Output = Result<T, E>> + 'static) {
        let setter = self.setter();
        tokio::task::spawn_local(async move {
            let outcome = future.await;
            // First-settlement-wins: never clobber an activation- or
            // override-provided settlement with the constructor future.
            setter.settle_if_pending(outcome.into());
        });
    }

    /// Snapshot of the current settlement. Never blocks.
    #[must_use]
    pub fn get(&self) -> Settlement<T, E> {
        self.inner.borrow().state.clone()
    }

    /// Register `callback` and synchronously deliver the current settlement
    /// to it once, so a late subscriber never misses the latest state.
    ///
    /// Returns a [`Subscription`] guard; dropping it unsubscribes.
    #[must_use]
    pub fn subscribe(&self, callback: impl FnMut(&Settlement<T, E>) + 'static) -> Subscription {
        let callback: Callback<T, E> = Rc::new(RefCell::new(callback));
        let (id, first) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            let first = inner.subscribers.is_empty();
            inner.subscribers.push((id, Rc::clone(&callback)));
            (id, first)
        };
        if first {
            self.activate();
        }
        // Initial delivery happens after activation and goes through the
        // queue, so a synchronous activation-driven set is visible here and
        // the new subscriber hears it exactly once.
        let flush = {
            let mut inner = self.inner.borrow_mut();
            let flush = inner.queue.is_empty();
            let state = inner.state.clone();
            inner.queue.push_back((id, Rc::clone(&callback), state));
            flush
        };
        if flush {
            flush_queue(&self.inner);
        }

        let weak = Rc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || unsubscribe(&weak, id))),
        }
    }

    /// Force a new settlement, synchronously broadcasting to all current
    /// subscribers in registration order.
    ///
    /// This is the explicit override channel: it also re-settles an
    /// already-settled cell.
    pub fn set(&self, settlement: Settlement<T, E>) {
        publish(&self.inner, settlement);
    }

    /// Replace the settlement through `f` and broadcast the result.
    ///
    /// `f` observes the current settlement, so conditional transitions (for
    /// example "settle only if still pending") compose from this.
    pub fn update(&self, f: impl FnOnce(Settlement<T, E>) -> Settlement<T, E>) {
        let current = self.inner.borrow().state.clone();
        publish(&self.inner, f(current));
    }

    /// A weak write handle for this cell. Once every `Eventual` handle is
    /// dropped the setter becomes a no-op.
    #[must_use]
    pub fn setter(&self) -> Setter<T, E> {
        Setter {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    fn activate(&self) {
        // Take the callback out so user code runs without a live borrow.
        let activation = self.inner.borrow_mut().activation.take();
        if let Some(mut activate) = activation {
            debug!("cell activated");
            self.inner.borrow_mut().activating = true;
            let teardown = activate(self.setter());
            let mut inner = self.inner.borrow_mut();
            inner.activating = false;
            inner.activation = Some(activate);
            inner.teardown = teardown;
        }
    }
}

fn publish<T: Clone, E: Clone>(inner: &Rc<RefCell<Inner<T, E>>>, settlement: Settlement<T, E>) {
    trace!(state = settlement.kind(), "settlement published");
    let flush = {
        let mut guard = inner.borrow_mut();
        guard.state = settlement.clone();
        // A set from inside the activation callback only records state; the
        // sole subscriber at that point hears it via its initial delivery.
        if guard.activating {
            return;
        }
        let flush = guard.queue.is_empty();
        let entries: Vec<(u64, Callback<T, E>)> = guard
            .subscribers
            .iter()
            .map(|(id, callback)| (*id, Rc::clone(callback)))
            .collect();
        for (id, callback) in entries {
            guard.queue.push_back((id, callback, settlement.clone()));
        }
        flush
    };
    if flush {
        flush_queue(inner);
    }
}

/// Drain the delivery queue in enqueue order. A nested publish from inside a
/// callback finds the queue non-empty and only appends, so the outermost
/// pass delivers everything and no callback is ever re-entered. The queue is
/// walked by index and cleared once the pass has drained it.
fn flush_queue<T: Clone, E: Clone>(inner: &Rc<RefCell<Inner<T, E>>>) {
    let mut index = 0;
    loop {
        let entry = inner.borrow().queue.get(index).cloned();
        let Some((id, callback, settlement)) = entry else {
            break;
        };
        // Skip subscribers removed after this entry was queued.
        let live = inner.borrow().subscribers.iter().any(|(sid, _)| *sid == id);
        if live {
            (&mut *callback.borrow_mut())(&settlement);
        }
        index += 1;
    }
    inner.borrow_mut().queue.clear();
}

fn unsubscribe<T, E>(weak: &Weak<RefCell<Inner<T, E>>>, id: u64) {
    let Some(inner) = weak.upgrade() else {
        // The cell is gone; a stale handle is a no-op.
        return;
    };
    let (removed, now_empty) = {
        let mut inner = inner.borrow_mut();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        (inner.subscribers.len() != before, inner.subscribers.is_empty())
    };
    if removed && now_empty {
        let teardown = inner.borrow_mut().teardown.take();
        if let Some(teardown) = teardown {
            debug!("cell deactivated");
            teardown();
        }
    }
}

/// A weak write handle to an [`Eventual`].
///
/// Used by activation callbacks and combinators to publish settlements
/// without keeping the cell alive; all methods are no-ops once the cell has
/// been dropped.
pub struct Setter<T, E> {
    inner: Weak<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Setter<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Setter<T, E> {
    /// Settle the cell with a success value.
    pub fn set(&self, value: T) {
        self.apply(Settlement::Ready(value));
    }

    /// Settle the cell with an error.
    pub fn fail(&self, error: E) {
        self.apply(Settlement::Failed(error));
    }

    /// Publish an arbitrary settlement.
    pub fn apply(&self, settlement: Settlement<T, E>) {
        if let Some(inner) = self.inner.upgrade() {
            publish(&inner, settlement);
        }
    }

    /// Publish only if the cell is still pending (first-settlement-wins).
    pub fn settle_if_pending(&self, settlement: Settlement<T, E>) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.borrow().state.is_pending() {
                publish(&inner, settlement);
            }
        }
    }
}

/// RAII subscription guard. Dropping it unsubscribes; unsubscribing after
/// the cell is gone is a no-op.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Unsubscribe explicitly (equivalent to dropping the guard).
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
