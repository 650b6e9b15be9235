#![forbid(unsafe_code)]

//! Reactive cells for asynchronously settled values.
//!
//! This crate provides a small propagation fabric for values that may not
//! have arrived yet:
//!
//! - [`Settlement`]: the tagged disposition of an eventual value — pending,
//!   ready, or failed.
//! - [`Eventual`]: a cell holding a settlement plus subscriber callbacks,
//!   with lazy activation for demand-driven connections.
//! - [`derive`] and friends: combinators that join one or more cells
//!   through a recombination function into a new cell, re-settling as the
//!   inputs change.
//! - [`await_settled`]: a bridge collapsing a cell's first terminal
//!   settlement into a one-shot future.
//!
//! # Architecture
//!
//! `Eventual<T, E>` uses `Rc<RefCell<..>>` for single-threaded shared
//! ownership; `get`/`subscribe`/`set` are synchronous and never suspend.
//! Future-backed cells and asynchronous recombiners are driven with
//! `tokio::task::spawn_local`, so those paths require a current-thread
//! runtime with an active `tokio::task::LocalSet`.
//!
//! # Invariants
//!
//! 1. A subscriber always receives the current settlement synchronously on
//!    subscribe, then every published settlement, in registration order.
//! 2. A constructor future never overwrites a cell already settled through
//!    the activation path (first-settlement-wins); `set`/`update` are the
//!    explicit override channel.
//! 3. A derived cell settles once every upstream has settled, fails fast
//!    with the lowest-index upstream error, and never reverts to pending
//!    once settled.
//! 4. Failures travel as `Settlement::Failed` data everywhere except
//!    [`await_settled`], which re-introduces `Result` for one-shot callers.

pub mod bridge;
pub mod cell;
pub mod derived;
pub mod settlement;

pub use bridge::await_settled;
pub use cell::{Activation, Eventual, Setter, Subscription, Teardown};
pub use derived::{derive, derive2, derive3, derive_async, derive_vec, derive_vec_async};
pub use settlement::Settlement;
