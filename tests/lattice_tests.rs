//! Property-based tests for the value lattice.
//!
//! Join must behave as a least upper bound so that heap records and the
//! evaluation cache only ever move up.

use initsafe::common::NodeId;
use initsafe::init::{Address, ClassId, Closure, Value};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn arb_hot_or_cold() -> impl Strategy<Value = Value> {
    prop_oneof![Just(Value::Hot), Just(Value::Cold)]
}

/// Objects of a handful of classes with widened arguments
fn arb_addr() -> impl Strategy<Value = Value> {
    (0u32..4, prop::collection::vec(arb_hot_or_cold(), 0..3), arb_hot_or_cold()).prop_map(
        |(class, args, outer)| Value::Addr(Address::new(ClassId(class), &args, outer)),
    )
}

fn arb_fun() -> impl Strategy<Value = Value> {
    (0u32..4, arb_hot_or_cold(), 0u32..2).prop_map(|(expr, this, class)| {
        Value::Fun(Closure {
            expr: NodeId(expr),
            this: Box::new(this),
            class: ClassId(class),
        })
    })
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Hot),
        1 => Just(Value::Cold),
        4 => arb_addr(),
        2 => arb_fun(),
    ]
}

/// Any value reachable by joining leaves, choices included
fn arb_value() -> impl Strategy<Value = Value> {
    prop::collection::vec(arb_leaf(), 1..4).prop_map(|leaves| Value::join_all(&leaves))
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn join_is_commutative(a in arb_value(), b in arb_value()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn join_is_associative(a in arb_value(), b in arb_value(), c in arb_value()) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn join_is_idempotent(a in arb_value()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn join_is_an_upper_bound(a in arb_value(), b in arb_value()) {
        let upper = a.join(&b);
        prop_assert_eq!(a.join(&upper), upper.clone());
        prop_assert_eq!(b.join(&upper), upper);
    }

    #[test]
    fn hot_is_identity(a in arb_value()) {
        prop_assert_eq!(Value::Hot.join(&a), a.clone());
        prop_assert_eq!(a.join(&Value::Hot), a);
    }

    #[test]
    fn cold_absorbs(a in arb_value()) {
        prop_assert_eq!(Value::Cold.join(&a), Value::Cold);
        prop_assert_eq!(a.join(&Value::Cold), Value::Cold);
    }

    #[test]
    fn choices_are_normalized(a in arb_value(), b in arb_value()) {
        if let Value::Choice(set) = a.join(&b) {
            prop_assert!(set.len() >= 2);
            prop_assert!(set.iter().all(|v| matches!(v, Value::Addr(_) | Value::Fun(_))));
        }
    }

    #[test]
    fn widen_keeps_only_hot(a in arb_value()) {
        let widened = a.widen();
        prop_assert!(widened.is_hot() || widened.is_cold());
        prop_assert_eq!(widened.is_hot(), a.is_hot());
    }

    #[test]
    fn address_arguments_are_widened(values in prop::collection::vec(arb_value(), 0..4)) {
        let addr = Address::new(ClassId(0), &values, Value::Hot);
        prop_assert!(addr.args.iter().all(|v| v.is_hot() || v.is_cold()));
        prop_assert_eq!(addr.args.len(), values.len());
    }
}
