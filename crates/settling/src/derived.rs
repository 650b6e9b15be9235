#![forbid(unsafe_code)]

//! Derived cells: recombine one or more upstream cells through a user
//! function into a new [`Eventual`].
//!
//! # Design
//!
//! A derived cell is an ordinary [`Eventual`] whose activation callback
//! wires up the join. Upstream subscriptions exist only while the derived
//! cell has at least one subscriber of its own: the first downstream
//! subscriber subscribes all upstreams, the last unsubscribe drops them.
//! Combinator lifetime is therefore driven by demand, with no explicit
//! disposal call.
//!
//! # Join rule
//!
//! The output stays pending until every upstream has reported a non-pending
//! settlement, then re-derives on every upstream re-settlement (a live
//! derivation, not a one-shot join). Two asymmetries:
//!
//! - **First-error-wins**: as soon as any upstream is failed, the output
//!   fails with the error of the lowest-index failed upstream, without
//!   waiting for stragglers.
//! - **One-way latch**: an upstream reverting to pending never reverts a
//!   settled output; the output keeps its last settlement until a full
//!   snapshot is available again.
//!
//! Zero upstreams is the degenerate join: the recombiner runs with an empty
//! snapshot as soon as the output activates.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tracing::trace;

use crate::cell::{Eventual, Setter, Teardown};
use crate::settlement::Settlement;

enum Recombine<U, T, E> {
    Sync(Rc<dyn Fn(&[U]) -> T>),
    Async(Rc<dyn Fn(Vec<U>) -> LocalBoxFuture<'static, Result<T, E>>>),
}

impl<U, T, E> Clone for Recombine<U, T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Rc::clone(f)),
            Self::Async(f) => Self::Async(Rc::clone(f)),
        }
    }
}

struct JoinState<U, E> {
    /// Last-seen settlement per upstream index.
    slots: RefCell<Vec<Settlement<U, E>>>,
    /// Bumped on every recomputation and every direct publish; an async
    /// recombination from an older generation is discarded on completion.
    generation: Cell<u64>,
}

/// Derive a new cell from a single upstream through a synchronous function.
///
/// The output follows the join rule in the module docs; with one upstream it
/// reduces to "pending until the upstream settles, then map every ready
/// value, propagate every error".
pub fn derive<U, T, E>(upstream: &Eventual<U, E>, f: impl Fn(&U) -> T + 'static) -> Eventual<T, E>
where
    U: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    join_cells(
        vec![upstream.clone()],
        Recombine::Sync(Rc::new(move |values: &[U]| f(&values[0]))),
    )
}

/// Derive a new cell from an ordered list of same-typed upstreams.
///
/// An empty list settles by invoking `f(&[])` as soon as the output cell
/// gains its first subscriber.
pub fn derive_vec<U, T, E>(
    upstreams: &[Eventual<U, E>],
    f: impl Fn(&[U]) -> T + 'static,
) -> Eventual<T, E>
where
    U: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    join_cells(upstreams.to_vec(), Recombine::Sync(Rc::new(f)))
}

/// Derive through an asynchronous recombiner.
///
/// The recombiner's future settles the output; an `Err` outcome becomes the
/// output's `Failed` settlement. If a newer recomputation starts before an
/// older future completes, the older result is discarded.
///
/// Requires a `tokio::task::LocalSet` context when a recomputation fires.
pub fn derive_async<U, T, E, F, Fut>(upstream: &Eventual<U, E>, f: F) -> Eventual<T, E>
where
    U: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
    F: Fn(U) -> Fut + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
{
    join_cells(
        vec![upstream.clone()],
        Recombine::Async(Rc::new(move |mut values: Vec<U>| {
            f(values.swap_remove(0)).boxed_local()
        })),
    )
}

/// [`derive_vec`] with an asynchronous recombiner.
pub fn derive_vec_async<U, T, E, F, Fut>(upstreams: &[Eventual<U, E>], f: F) -> Eventual<T, E>
where
    U: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
    F: Fn(Vec<U>) -> Fut + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
{
    join_cells(
        upstreams.to_vec(),
        Recombine::Async(Rc::new(move |values| f(values).boxed_local())),
    )
}

/// Derive from two differently-typed upstreams.
pub fn derive2<A, B, T, E>(
    a: &Eventual<A, E>,
    b: &Eventual<B, E>,
    f: impl Fn(&A, &B) -> T + 'static,
) -> Eventual<T, E>
where
    A: Clone + 'static,
    B: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    struct Slots<A, B, E> {
        a: RefCell<Settlement<A, E>>,
        b: RefCell<Settlement<B, E>>,
    }

    let a = a.clone();
    let b = b.clone();
    let f = Rc::new(f);
    Eventual::with_activation(move |setter: Setter<T, E>| {
        let slots = Rc::new(Slots {
            a: RefCell::new(Settlement::<A, E>::Pending),
            b: RefCell::new(Settlement::<B, E>::Pending),
        });
        let evaluate = {
            let slots = Rc::clone(&slots);
            let setter = setter.clone();
            let f = Rc::clone(&f);
            Rc::new(move || {
                let next = {
                    let sa = slots.a.borrow();
                    let sb = slots.b.borrow();
                    match (&*sa, &*sb) {
                        // First-error-wins, index order.
                        (Settlement::Failed(e), _) => Some(Settlement::Failed(e.clone())),
                        (_, Settlement::Failed(e)) => Some(Settlement::Failed(e.clone())),
                        (Settlement::Ready(va), Settlement::Ready(vb)) => {
                            Some(Settlement::Ready(f(va, vb)))
                        }
                        // Still waiting; a settled output keeps its value.
                        _ => None,
                    }
                };
                if let Some(next) = next {
                    setter.apply(next);
                }
            })
        };
        let sub_a = {
            let slots = Rc::clone(&slots);
            let evaluate = Rc::clone(&evaluate);
            a.subscribe(move |s| {
                *slots.a.borrow_mut() = s.clone();
                evaluate();
            })
        };
        let sub_b = {
            let slots = Rc::clone(&slots);
            let evaluate = Rc::clone(&evaluate);
            b.subscribe(move |s| {
                *slots.b.borrow_mut() = s.clone();
                evaluate();
            })
        };
        Some(Box::new(move || {
            drop(sub_a);
            drop(sub_b);
        }) as Teardown)
    })
}

/// Derive from three differently-typed upstreams.
pub fn derive3<A, B, C, T, E>(
    a: &Eventual<A, E>,
    b: &Eventual<B, E>,
    c: &Eventual<C, E>,
    f: impl Fn(&A, &B, &C) -> T + 'static,
) -> Eventual<T, E>
where
    A: Clone + 'static,
    B: Clone + 'static,
    C: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    struct Slots<A, B, C, E> {
        a: RefCell<Settlement<A, E>>,
        b: RefCell<Settlement<B, E>>,
        c: RefCell<Settlement<C, E>>,
    }

    let a = a.clone();
    let b = b.clone();
    let c = c.clone();
    let f = Rc::new(f);
    Eventual::with_activation(move |setter: Setter<T, E>| {
        let slots = Rc::new(Slots {
            a: RefCell::new(Settlement::<A, E>::Pending),
            b: RefCell::new(Settlement::<B, E>::Pending),
            c: RefCell::new(Settlement::<C, E>::Pending),
        });
        let evaluate = {
            let slots = Rc::clone(&slots);
            let setter = setter.clone();
            let f = Rc::clone(&f);
            Rc::new(move || {
                let next = {
                    let sa = slots.a.borrow();
                    let sb = slots.b.borrow();
                    let sc = slots.c.borrow();
                    match (&*sa, &*sb, &*sc) {
                        (Settlement::Failed(e), _, _) => Some(Settlement::Failed(e.clone())),
                        (_, Settlement::Failed(e), _) => Some(Settlement::Failed(e.clone())),
                        (_, _, Settlement::Failed(e)) => Some(Settlement::Failed(e.clone())),
                        (
                            Settlement::Ready(va),
                            Settlement::Ready(vb),
                            Settlement::Ready(vc),
                        ) => Some(Settlement::Ready(f(va, vb, vc))),
                        _ => None,
                    }
                };
                if let Some(next) = next {
                    setter.apply(next);
                }
            })
        };
        let sub_a = {
            let slots = Rc::clone(&slots);
            let evaluate = Rc::clone(&evaluate);
            a.subscribe(move |s| {
                *slots.a.borrow_mut() = s.clone();
                evaluate();
            })
        };
        let sub_b = {
            let slots = Rc::clone(&slots);
            let evaluate = Rc::clone(&evaluate);
            b.subscribe(move |s| {
                *slots.b.borrow_mut() = s.clone();
                evaluate();
            })
        };
        let sub_c = {
            let slots = Rc::clone(&slots);
            let evaluate = Rc::clone(&evaluate);
            c.subscribe(move |s| {
                *slots.c.borrow_mut() = s.clone();
                evaluate();
            })
        };
        Some(Box::new(move || {
            drop(sub_a);
            drop(sub_b);
            drop(sub_c);
        }) as Teardown)
    })
}

fn join_cells<U, T, E>(
    upstreams: Vec<Eventual<U, E>>,
    recombine: Recombine<U, T, E>,
) -> Eventual<T, E>
where
    U: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    Eventual::with_activation(move |setter: Setter<T, E>| {
        let state = Rc::new(JoinState {
            slots: RefCell::new(vec![Settlement::Pending; upstreams.len()]),
            generation: Cell::new(0),
        });
        let mut subscriptions = Vec::with_capacity(upstreams.len());
        for (index, upstream) in upstreams.iter().enumerate() {
            let state = Rc::clone(&state);
            let setter = setter.clone();
            let recombine = recombine.clone();
            subscriptions.push(upstream.subscribe(move |settlement| {
                state.slots.borrow_mut()[index] = settlement.clone();
                evaluate(&state, &setter, &recombine);
            }));
        }
        if upstreams.is_empty() {
            // Degenerate join: nothing to wait for.
            evaluate(&state, &setter, &recombine);
        }
        let state = Rc::clone(&state);
        Some(Box::new(move || {
            // Invalidate any in-flight async recombination.
            state.generation.set(state.generation.get() + 1);
            drop(subscriptions);
        }) as Teardown)
    })
}

fn evaluate<U, T, E>(state: &Rc<JoinState<U, E>>, setter: &Setter<T, E>, recombine: &Recombine<U, T, E>)
where
    U: Clone + 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    let next = {
        let slots = state.slots.borrow();
        // First-error-wins by upstream index; do not wait on stragglers
        // once an error is known.
        if let Some(error) = slots.iter().find_map(|slot| match slot {
            Settlement::Failed(error) => Some(error.clone()),
            _ => None,
        }) {
            trace!("derived cell short-circuits on upstream error");
            // A direct publish supersedes any in-flight async recomputation;
            // without the bump a straggling future would overwrite the error.
            state.generation.set(state.generation.get() + 1);
            Some(Settlement::Failed(error))
        } else {
            let mut values = Vec::with_capacity(slots.len());
            let mut complete = true;
            for slot in slots.iter() {
                match slot {
                    Settlement::Ready(value) => values.push(value.clone()),
                    // At least one upstream still pending: a settled
                    // output keeps its last settlement (one-way latch).
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                match recombine {
                    Recombine::Sync(f) => {
                        state.generation.set(state.generation.get() + 1);
                        Some(Settlement::Ready(f(&values)))
                    }
                    Recombine::Async(f) => {
                        let generation = state.generation.get() + 1;
                        state.generation.set(generation);
                        let state = Rc::clone(state);
                        let setter = setter.clone();
                        let future = f(values);
                        tokio::task::spawn_local(async move {
                            let outcome = future.await;
                            if state.generation.get() != generation {
                                trace!("stale recomputation discarded");
                                return;
                            }
                            setter.apply(outcome.into());
                        });
                        None
                    }
                }
            } else {
                None
            }
        }
    };
    if let Some(next) = next {
        setter.apply(next);
    }
}

// ---------------------------------------------------------------------------
// Tests (synchronous paths; future-backed paths live in tests/)
// ---------------------------------------------------------------------------
