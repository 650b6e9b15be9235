#![forbid(unsafe_code)]

//! One-shot await adapter: collapse a cell's first terminal settlement into
//! a single future, for callers that want to await once rather than
//! subscribe indefinitely.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;

use crate::cell::Eventual;
use crate::settlement::Settlement;

/// Wait for the cell's first terminal settlement.
///
/// Resolves with the value of the first `Ready` settlement observed, or
/// with the error of the first `Failed` one; later re-settlements are
/// ignored. The subscription is held only until that first terminal
/// settlement, then released.
///
/// An already-settled cell resolves on the next scheduling turn (the
/// oneshot hand-off forces one poll), so callers see a uniform asynchronous
/// contract either way. A cell that never settles leaves the future pending
/// indefinitely; timeouts are the caller's concern.
pub async fn await_settled<T, E>(cell: &Eventual<T, E>) -> Result<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let (tx, rx) = oneshot::channel::<Result<T, E>>();
    let tx = Rc::new(RefCell::new(Some(tx)));
    let guard = cell.subscribe(move |settlement| {
        let outcome = match settlement {
            Settlement::Pending => return,
            Settlement::Ready(value) => Ok(value.clone()),
            Settlement::Failed(error) => Err(error.clone()),
        };
        // Only the first terminal settlement is delivered.
        if let Some(tx) = tx.borrow_mut().take() {
            let _ = tx.send(outcome);
        }
    });
    let outcome = rx.await;
    drop(guard);
    // The sender lives inside the subscription we hold, and `cell` is
    // borrowed across the await, so the channel cannot be cancelled.
    outcome.expect("oneshot sender outlives the held subscription")
}
