//! Retraction symmetry
//!
//! Deleting a fact retracts exactly the combinations it took part in.

use std::collections::HashSet;

use proptest::prelude::*;
use tessera_engine::{RuleBuilder, StoreMode};
use tessera_foundation::{FactHandle, Value};

use crate::fixtures::{Customer, Live, Order, session, tokens};

fn customer_orders(mode: StoreMode) -> RuleBuilder {
    RuleBuilder::new("customer-orders", mode)
        .fact("$c", "Customer")
        .fact("$o", "Order")
        .where_fields(&["$c.id", "$o.customer"], |v: &[Value]| v[0] == v[1])
}

#[test]
fn delete_retracts_each_contributing_combination() {
    for mode in [StoreMode::Keyed, StoreMode::Joined] {
        let mut session = session();
        let live = Live::default();
        session.add_rule(&live.attach(customer_orders(mode))).unwrap();

        let alice = session.insert(Customer { id: 1 }).unwrap();
        session.insert(Customer { id: 2 }).unwrap();
        for total in 0..3 {
            session.insert(Order { customer: 1, total }).unwrap();
        }
        session.insert(Order { customer: 2, total: 5 }).unwrap();
        session.fire().unwrap();
        assert_eq!(live.live().len(), 4);

        session.delete(alice).unwrap();
        let report = session.fire().unwrap();
        assert_eq!(report.retractions, 3, "{mode:?}");
        assert_eq!(live.retracted(), 3, "{mode:?}");
        assert_eq!(live.live().len(), 1, "{mode:?}");

        // An equivalent customer restores the same combinations.
        session.insert(Customer { id: 1 }).unwrap();
        let report = session.fire().unwrap();
        assert_eq!(report.activations, 3, "{mode:?}");
        assert_eq!(live.live().len(), 4, "{mode:?}");
    }
}

#[test]
fn cross_product_retraction_counts() {
    let mut session = session();
    let live = Live::default();
    session
        .add_rule(&live.attach(
            RuleBuilder::new("pairs", StoreMode::Joined)
                .fact("$a", "A")
                .fact("$b", "B"),
        ))
        .unwrap();
    let a = tokens(&session, "A", 4);
    let b = tokens(&session, "B", 5);
    session.fire().unwrap();

    session.delete(a[1]).unwrap();
    session.delete(b[0]).unwrap();
    let report = session.fire().unwrap();
    // 5 pairs of a[1], plus 3 remaining pairs of b[0].
    assert_eq!(report.retractions, 8);
    assert_eq!(live.live().len(), 12);
}

#[test]
fn delete_before_fire_never_activates() {
    let mut session = session();
    let live = Live::default();
    session
        .add_rule(&live.attach(RuleBuilder::new("any-a", StoreMode::Keyed).fact("$a", "A")))
        .unwrap();
    let handles = tokens(&session, "A", 2);
    assert!(session.delete(handles[0]).unwrap());

    let report = session.fire().unwrap();
    assert_eq!(report.activations, 1);
    assert_eq!(report.retractions, 0);
    assert!(!session.contains(handles[0]));
}

#[test]
fn double_delete_is_a_no_op() {
    let mut session = session();
    let handle = session.insert(Customer { id: 1 }).unwrap();
    session.fire().unwrap();

    assert!(session.delete(handle).unwrap());
    session.fire().unwrap();
    assert!(!session.delete(handle).unwrap());
    let report = session.fire().unwrap();
    assert_eq!(report.deleted, 0);
}

#[test]
fn second_delete_before_fire_is_not_queued() {
    let mut session = session();
    let handle = session.insert(Customer { id: 1 }).unwrap();
    session.fire().unwrap();

    assert!(session.delete(handle).unwrap());
    assert!(!session.delete(handle).unwrap());
    assert_eq!(session.sink().pending(), 1);
    let report = session.fire().unwrap();
    assert_eq!(report.deleted, 1);
    assert!(!session.contains(handle));
}

#[test]
fn update_moves_a_fact_between_matches() {
    let mut session = session();
    let live = Live::default();
    session
        .add_rule(&live.attach(customer_orders(StoreMode::Keyed)))
        .unwrap();
    session.insert(Customer { id: 1 }).unwrap();
    session.insert(Customer { id: 2 }).unwrap();
    let order = session.insert(Order { customer: 1, total: 10 }).unwrap();
    session.fire().unwrap();
    assert_eq!(live.live().len(), 1);

    session.update(order, Order { customer: 2, total: 10 }).unwrap();
    let report = session.fire().unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.retractions, 1);
    assert_eq!(report.activations, 1);
    assert_eq!(live.live().len(), 1);
    assert_eq!(session.get_as::<Order>(order).unwrap().map(|o| o.customer), Some(2));

    // The handle survives the update.
    assert!(live.live()[0].contains(&order));
}

// =============================================================================
// Random Workloads
// =============================================================================

#[derive(Debug, Clone)]
enum Step {
    Customer(i64),
    Order(i64),
    Delete(usize),
    Fire,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => (0i64..3).prop_map(Step::Customer),
        3 => (0i64..3).prop_map(Step::Order),
        2 => any::<usize>().prop_map(Step::Delete),
        1 => Just(Step::Fire),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn live_matches_follow_working_memory(steps in prop::collection::vec(step(), 0..40), keyed in any::<bool>()) {
        let mode = if keyed { StoreMode::Keyed } else { StoreMode::Joined };
        let mut session = session();
        let live = Live::default();
        session.add_rule(&live.attach(customer_orders(mode))).unwrap();

        let mut customers: Vec<(FactHandle, i64)> = Vec::new();
        let mut orders: Vec<(FactHandle, i64)> = Vec::new();
        for step in steps.into_iter().chain([Step::Fire]) {
            match step {
                Step::Customer(id) => {
                    customers.push((session.insert(Customer { id }).unwrap(), id));
                }
                Step::Order(customer) => {
                    let handle = session.insert(Order { customer, total: 0 }).unwrap();
                    orders.push((handle, customer));
                }
                Step::Delete(pick) => {
                    let total = customers.len() + orders.len();
                    if total == 0 {
                        continue;
                    }
                    let pick = pick % total;
                    let (handle, _) = if pick < customers.len() {
                        customers.remove(pick)
                    } else {
                        orders.remove(pick - customers.len())
                    };
                    prop_assert!(session.delete(handle).unwrap());
                }
                Step::Fire => {
                    session.fire().unwrap();
                    prop_assert!(session.memory_stats().delta_is_empty());
                    let expected: HashSet<Vec<FactHandle>> = customers
                        .iter()
                        .flat_map(|&(c, id)| {
                            orders
                                .iter()
                                .filter(move |&&(_, owner)| owner == id)
                                .map(move |&(o, _)| vec![c, o])
                        })
                        .collect();
                    let actual: HashSet<Vec<FactHandle>> = live.live().into_iter().collect();
                    prop_assert_eq!(live.live().len(), actual.len());
                    prop_assert_eq!(actual, expected);
                }
            }
        }
    }
}
