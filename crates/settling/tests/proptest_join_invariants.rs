//! Property-based invariant tests for cells and derived joins.
//!
//! These verify structural invariants that must hold for any inputs and any
//! delivery order:
//!
//! 1. A join over all-ready upstreams settles to the recombined value, no
//!    matter the order the upstreams settle in.
//! 2. When any upstream fails, the join's final settlement is the error of
//!    the lowest-index failed upstream, no matter the order of delivery.
//! 3. A derived output never reverts to pending once it has settled, for
//!    arbitrary interleavings of upstream settlements.
//! 4. Chained derivation is observationally equivalent to composing the
//!    recombination functions.
//! 5. A subscriber always observes the cell's current settlement at
//!    subscribe time.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use settling::{Eventual, Settlement, derive, derive_vec};

type Cell32 = Eventual<i32, u8>;

fn outcome_strategy() -> impl Strategy<Value = Result<i32, u8>> {
    prop_oneof![any::<i32>().prop_map(Ok), any::<u8>().prop_map(Err)]
}

/// A batch of terminal outcomes plus a shuffled delivery order.
fn outcomes_with_order()
-> impl Strategy<Value = (Vec<Result<i32, u8>>, Vec<usize>)> {
    prop::collection::vec(outcome_strategy(), 1..6).prop_flat_map(|outcomes| {
        let indices: Vec<usize> = (0..outcomes.len()).collect();
        (Just(outcomes), Just(indices).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn all_ready_join_settles_to_sum(
        (values, order) in prop::collection::vec(any::<i16>(), 1..6).prop_flat_map(|values| {
            let indices: Vec<usize> = (0..values.len()).collect();
            (Just(values), Just(indices).prop_shuffle())
        })
    ) {
        let cells: Vec<Cell32> = values.iter().map(|_| Eventual::new()).collect();
        let sum = derive_vec(&cells, |vs| vs.iter().sum::<i32>());
        let _w = sum.subscribe(|_| {});

        for index in order {
            cells[index].set(Settlement::Ready(i32::from(values[index])));
        }

        let expected: i32 = values.iter().map(|v| i32::from(*v)).sum();
        prop_assert_eq!(sum.get(), Settlement::Ready(expected));
    }

    #[test]
    fn final_error_is_lowest_failed_index((outcomes, order) in outcomes_with_order()) {
        prop_assume!(outcomes.iter().any(|o| o.is_err()));

        let cells: Vec<Cell32> = outcomes.iter().map(|_| Eventual::new()).collect();
        let joined = derive_vec(&cells, |vs| vs.iter().sum::<i32>());
        let _w = joined.subscribe(|_| {});

        for index in order {
            cells[index].set(outcomes[index].clone().into());
        }

        // Once every upstream has delivered, the error tie-break is by
        // upstream index, independent of delivery order.
        let expected = outcomes
            .iter()
            .find_map(|o| o.clone().err())
            .map(Settlement::<i32, u8>::Failed);
        prop_assert_eq!(Some(joined.get()), expected);
    }

    #[test]
    fn settled_output_never_reverts_to_pending(
        events in prop::collection::vec(
            (0usize..3, prop_oneof![
                Just(Settlement::<i32, u8>::Pending),
                any::<i16>().prop_map(|v| Settlement::Ready(i32::from(v))),
                any::<u8>().prop_map(Settlement::Failed),
            ]),
            0..24,
        )
    ) {
        let cells: Vec<Cell32> = (0..3).map(|_| Eventual::new()).collect();
        let joined = derive_vec(&cells, |vs| vs.iter().sum::<i32>());

        let observed = Rc::new(RefCell::new(Vec::new()));
        let observed_clone = Rc::clone(&observed);
        let _w = joined.subscribe(move |s| observed_clone.borrow_mut().push(s.clone()));

        for (index, settlement) in events {
            cells[index].set(settlement);
        }

        let log = observed.borrow();
        let first_settled = log.iter().position(Settlement::is_settled);
        if let Some(first) = first_settled {
            prop_assert!(
                log[first..].iter().all(Settlement::is_settled),
                "output reverted to pending after settling: {:?}",
                &log[first..]
            );
        }
    }

    #[test]
    fn chained_derivation_equals_composition(value in any::<i16>()) {
        let source = Cell32::new();
        let chained = derive(&derive(&source, |v| v + 1), |v| v * 3);
        let fused = derive(&source, |v| (v + 1) * 3);
        let _w1 = chained.subscribe(|_| {});
        let _w2 = fused.subscribe(|_| {});

        prop_assert!(chained.get().is_pending());
        prop_assert!(fused.get().is_pending());

        source.set(Settlement::Ready(i32::from(value)));
        prop_assert_eq!(chained.get(), fused.get());
    }

    #[test]
    fn late_subscriber_sees_current_settlement(outcome in outcome_strategy()) {
        let cell = Cell32::from_settlement(outcome.clone().into());
        let seen = Rc::new(RefCell::new(None));
        let seen_clone = Rc::clone(&seen);
        let _w = cell.subscribe(move |s| *seen_clone.borrow_mut() = Some(s.clone()));
        prop_assert_eq!(seen.borrow().clone(), Some(outcome.into()));
    }
}
