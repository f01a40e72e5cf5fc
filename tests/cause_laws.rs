//! Property tests for the failure-cause algebra.

mod common;

use common::{init_test_logging, test_proptest_config};
use effectum::{Cause, Defect, FiberId};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_leaf() -> impl Strategy<Value = Cause<u8>> {
    prop_oneof![
        Just(Cause::Empty),
        any::<u8>().prop_map(Cause::fail),
        "[a-z]{1,6}".prop_map(|m| Cause::die(Defect::new(m))),
        (1_u64..5).prop_map(|n| Cause::interrupt(FiberId::new_for_test(n))),
    ]
}

/// Causes built only through `then`/`both`, so always in canonical form.
fn arb_cause() -> impl Strategy<Value = Cause<u8>> {
    arb_leaf().prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| l.then(r)),
            (inner.clone(), inner).prop_map(|(l, r)| l.both(r)),
        ]
    })
}

// ============================================================================
// Identity & Associativity
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    #[test]
    fn empty_is_identity_for_then_and_both(c in arb_cause()) {
        init_test_logging();
        prop_assert_eq!(Cause::empty().then(c.clone()), c.clone());
        prop_assert_eq!(c.clone().then(Cause::empty()), c.clone());
        prop_assert_eq!(Cause::empty().both(c.clone()), c.clone());
        prop_assert_eq!(c.clone().both(Cause::empty()), c);
    }

    #[test]
    fn then_is_associative(a in arb_cause(), b in arb_cause(), c in arb_cause()) {
        let left = a.clone().then(b.clone()).then(c.clone());
        let right = a.then(b.then(c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn both_is_associative(a in arb_cause(), b in arb_cause(), c in arb_cause()) {
        let left = a.clone().both(b.clone()).both(c.clone());
        let right = a.both(b.both(c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn is_empty_means_no_leaves(c in arb_cause()) {
        let leafless =
            c.failures().is_empty() && c.defects().is_empty() && c.interruptors().is_empty();
        prop_assert_eq!(c.is_empty(), leafless);
        prop_assert_eq!(c.is_empty(), c == Cause::Empty);
    }
}

// ============================================================================
// Queries & Transformations
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    #[test]
    fn failures_keep_left_to_right_order(a in arb_cause(), b in arb_cause()) {
        let mut expected: Vec<u8> = a.failures().into_iter().copied().collect();
        expected.extend(b.failures().into_iter().copied());
        let combined = a.then(b);
        let actual: Vec<u8> = combined.failures().into_iter().copied().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn map_identity_keeps_shape(c in arb_cause()) {
        prop_assert_eq!(c.clone().map(|e| e), c);
    }

    #[test]
    fn map_transforms_every_failure(c in arb_cause()) {
        let expected: Vec<u16> = c.failures().into_iter().map(|e| u16::from(*e) + 1).collect();
        let mapped = c.clone().map(|e| u16::from(e) + 1);
        let actual: Vec<u16> = mapped.failures().into_iter().copied().collect();
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(mapped.defects().len(), c.defects().len());
        prop_assert_eq!(mapped.interruptors(), c.interruptors());
    }

    #[test]
    fn strip_failures_keeps_everything_else(c in arb_cause()) {
        let stripped: Cause<u8> = c.clone().strip_failures();
        prop_assert!(!stripped.is_failure());
        prop_assert_eq!(stripped.defects(), c.defects());
        prop_assert_eq!(stripped.interruptors(), c.interruptors());
    }

    #[test]
    fn failure_or_cause_returns_first_failure(c in arb_cause()) {
        let first = c.failure_option().copied();
        match c.clone().failure_or_cause() {
            Ok(e) => prop_assert_eq!(Some(e), first),
            Err(rest) => {
                prop_assert!(first.is_none());
                prop_assert_eq!(rest, c);
            }
        }
    }

    #[test]
    fn fail_to_die_leaves_no_failures(c in arb_cause()) {
        let failures = c.failures().len();
        let defects = c.defects().len();
        let died: Cause<u8> = c.fail_to_die(|e| Defect::new(format!("failed with {e}")));
        prop_assert!(!died.is_failure());
        prop_assert_eq!(died.defects().len(), failures + defects);
    }

    #[test]
    fn interruptors_are_deduplicated(c in arb_cause()) {
        let ids = c.interruptors();
        for (i, id) in ids.iter().enumerate() {
            prop_assert!(!ids[i + 1..].contains(id));
        }
        prop_assert_eq!(c.is_interrupted(), !ids.is_empty());
    }
}

// ============================================================================
// Fixed Shapes
// ============================================================================

#[test]
fn combinators_right_nest() {
    init_test_logging();
    let a = Cause::<u8>::fail(1);
    let b = Cause::<u8>::die(Defect::new("b"));
    let c = Cause::<u8>::interrupt(FiberId::new_for_test(3));

    let nested = a.clone().then(b.clone()).then(c.clone());
    let expected = Cause::Then(
        Box::new(a),
        Box::new(Cause::Then(Box::new(b), Box::new(c))),
    );
    assert_eq!(nested, expected);
}

#[test]
fn interrupted_only_ignores_empty() {
    init_test_logging();
    let id = FiberId::new_for_test(9);
    let cause = Cause::<u8>::interrupt(id.clone()).both(Cause::interrupt(id.clone()));
    assert!(cause.is_interrupted_only());
    assert_eq!(cause.interruptors(), vec![id]);

    let mixed = cause.then(Cause::fail(2));
    assert!(!mixed.is_interrupted_only());
    assert_eq!(mixed.failure_option(), Some(&2));
}
