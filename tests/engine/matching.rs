//! Matching completeness and incrementality
//!
//! Every combination activates exactly once, in both store modes.

use std::collections::HashSet;

use tessera_engine::{RuleBuilder, StoreMode};
use tessera_foundation::Value;

use crate::fixtures::{Customer, Live, Order, Token, session, tokens};

const MODES: [StoreMode; 2] = [StoreMode::Keyed, StoreMode::Joined];

// =============================================================================
// Cross Products
// =============================================================================

#[test]
fn cross_product_of_two_groups() {
    for mode in MODES {
        let mut session = session();
        let live = Live::default();
        session
            .add_rule(&live.attach(RuleBuilder::new("pairs", mode).fact("$a", "A").fact("$b", "B")))
            .unwrap();

        tokens(&session, "A", 5);
        tokens(&session, "B", 6);
        let report = session.fire().unwrap();

        assert_eq!(report.activations, 30, "{mode:?}");
        assert_eq!(live.fired(), 30, "{mode:?}");
        let distinct: HashSet<_> = live.history().into_iter().collect();
        assert_eq!(distinct.len(), 30, "{mode:?}");
    }
}

#[test]
fn cross_product_of_four_groups() {
    for mode in MODES {
        let mut session = session();
        let live = Live::default();
        let mut builder = RuleBuilder::new("all", mode);
        for (var, name) in [("$a", "A"), ("$b", "B"), ("$c", "C"), ("$d", "D")] {
            builder = builder.fact(var, name);
        }
        session.add_rule(&live.attach(builder)).unwrap();

        tokens(&session, "A", 2);
        tokens(&session, "B", 3);
        tokens(&session, "C", 4);
        tokens(&session, "D", 5);
        session.fire().unwrap();
        assert_eq!(live.fired(), 120, "{mode:?}");
    }
}

#[test]
fn empty_group_produces_nothing() {
    let mut session = session();
    let live = Live::default();
    session
        .add_rule(&live.attach(
            RuleBuilder::new("pairs", StoreMode::Keyed)
                .fact("$a", "A")
                .fact("$b", "B"),
        ))
        .unwrap();
    tokens(&session, "A", 4);
    let report = session.fire().unwrap();
    assert_eq!(report.activations, 0);
}

// =============================================================================
// Incrementality
// =============================================================================

#[test]
fn one_new_fact_adds_only_its_combinations() {
    for mode in MODES {
        let mut session = session();
        let live = Live::default();
        session
            .add_rule(&live.attach(
                RuleBuilder::new("all", mode)
                    .fact("$a", "A")
                    .fact("$b", "B")
                    .fact("$c", "C")
                    .fact("$d", "D"),
            ))
            .unwrap();

        tokens(&session, "A", 2);
        tokens(&session, "B", 3);
        tokens(&session, "C", 4);
        tokens(&session, "D", 5);
        session.fire().unwrap();
        assert_eq!(live.fired(), 120);

        let extra = session.insert_as("A", Token { value: 99 }).unwrap();
        let report = session.fire().unwrap();
        assert_eq!(report.activations, 3 * 4 * 5, "{mode:?}");
        assert!(live.history()[120..].iter().all(|facts| facts[0] == extra));

        let report = session.fire().unwrap();
        assert_eq!(report.activations, 0, "{mode:?}");
    }
}

#[test]
fn facts_on_both_sides_in_one_cycle() {
    for mode in MODES {
        let mut session = session();
        let live = Live::default();
        session
            .add_rule(&live.attach(
                RuleBuilder::new("pairs", mode)
                    .fact("$a", "A")
                    .fact("$b", "B"),
            ))
            .unwrap();
        tokens(&session, "A", 3);
        tokens(&session, "B", 3);
        session.fire().unwrap();

        // New facts on both sides: 2 new A x 5 B plus 3 old A x 2 new B.
        tokens(&session, "A", 2);
        tokens(&session, "B", 2);
        let report = session.fire().unwrap();
        assert_eq!(report.activations, 10 + 6, "{mode:?}");

        let distinct: HashSet<_> = live.history().into_iter().collect();
        assert_eq!(distinct.len(), 25, "{mode:?}");
    }
}

// =============================================================================
// Joins
// =============================================================================

#[test]
fn joins_match_on_shared_values() {
    for mode in MODES {
        let mut session = session();
        let live = Live::default();
        session
            .add_rule(&live.attach(
                RuleBuilder::new("customer-orders", mode)
                    .fact("$c", "Customer")
                    .fact("$o", "Order")
                    .where_fields(&["$c.id", "$o.customer"], |v: &[Value]| v[0] == v[1]),
            ))
            .unwrap();

        for id in 0..10 {
            session.insert(Customer { id }).unwrap();
            for total in 0..3 {
                session.insert(Order { customer: id, total }).unwrap();
            }
        }
        session.insert(Order { customer: 42, total: 1 }).unwrap();

        let report = session.fire().unwrap();
        assert_eq!(report.activations, 30, "{mode:?}");
    }
}

#[test]
fn alpha_conditions_filter_single_facts() {
    let mut session = session();
    let live = Live::default();
    session
        .add_rule(&live.attach(
            RuleBuilder::new("big", StoreMode::Keyed)
                .fact("$o", "Order")
                .where_fields(&["$o.total"], |v: &[Value]| {
                    v[0].as_int().is_some_and(|t| t >= 100)
                }),
        ))
        .unwrap();
    for total in [10, 100, 150, 99] {
        session.insert(Order { customer: 1, total }).unwrap();
    }
    assert_eq!(session.fire().unwrap().activations, 2);
}

// =============================================================================
// Delta Scope
// =============================================================================

#[test]
fn delta_is_empty_after_every_fire() {
    let mut session = session();
    let chained = Live::default();
    session
        .add_rule(
            &RuleBuilder::new("spawn-b", StoreMode::Keyed)
                .fact("$a", "A")
                .where_fields(&["$a.value"], |v: &[Value]| {
                    v[0].as_int().is_some_and(|x| x < 3)
                })
                .execute(|ctx| {
                    let value = ctx.get::<Token>("$a").map_or(0, |t| t.value);
                    ctx.insert_as("B", Token { value });
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    session
        .add_rule(&chained.attach(
            RuleBuilder::new("pairs", StoreMode::Joined)
                .fact("$a", "A")
                .fact("$b", "B"),
        ))
        .unwrap();

    let handles = tokens(&session, "A", 5);
    session.fire().unwrap();
    assert!(session.memory_stats().delta_is_empty());
    // Three spawned B facts pair with all five A facts.
    assert_eq!(chained.fired(), 15);

    session.delete(handles[0]).unwrap();
    session.fire().unwrap();
    assert!(session.memory_stats().delta_is_empty());
    assert_eq!(chained.live().len(), 12);
}
