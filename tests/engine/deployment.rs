//! Hot deployment
//!
//! Rules added to a populated session back-fill existing facts exactly
//! once without disturbing rules already deployed.

use std::sync::{Arc, Mutex};

use tessera_engine::{Configuration, FieldIndexing, RuleBuilder, Session, SessionState, StoreMode};
use tessera_foundation::{Error, ErrorKind, Predicate, Type, Value};

use crate::fixtures::{Customer, Live, Order, Token, session, tokens};

fn large() -> Arc<dyn Predicate> {
    Arc::new(|v: &[Value]| v[0].as_int().is_some_and(|t| t > 50))
}

#[test]
fn shared_alpha_address_is_reused() {
    let mut session = session();
    let predicate = large();
    let first = Live::default();
    session
        .add_rule(&first.attach(
            RuleBuilder::new("first", StoreMode::Keyed)
                .fact("$o", "Order")
                .where_predicate(&["$o.total"], Arc::clone(&predicate)),
        ))
        .unwrap();

    for total in [10, 60, 70, 80] {
        session.insert(Order { customer: 1, total }).unwrap();
    }
    session.fire().unwrap();
    assert_eq!(first.fired(), 3);

    let before = session.memory_stats();
    let second = Live::default();
    session
        .add_rule(&second.attach(
            RuleBuilder::new("second", StoreMode::Keyed)
                .fact("$o", "Order")
                .where_predicate(&["$o.total"], Arc::clone(&predicate)),
        ))
        .unwrap();
    let after = session.memory_stats();

    let addresses = |stats: &tessera_engine::MemoryStats| -> Vec<_> {
        stats.alpha.iter().map(|b| b.address).collect()
    };
    assert_eq!(addresses(&before), addresses(&after));
    assert_eq!(
        before.rule("first").map(|r| r.network.clone()),
        after.rule("first").map(|r| r.network.clone())
    );

    let report = session.fire().unwrap();
    assert_eq!(report.activations, 3);
    assert_eq!(second.fired(), 3);
    assert_eq!(first.fired(), 3);

    // Later facts reach both rules once each.
    session.insert(Order { customer: 2, total: 90 }).unwrap();
    session.fire().unwrap();
    assert_eq!(first.fired(), 4);
    assert_eq!(second.fired(), 4);
}

#[test]
fn late_join_rule_back_fills_every_combination() {
    for mode in [StoreMode::Keyed, StoreMode::Joined] {
        let mut session = session();
        for id in 0..4 {
            session.insert(Customer { id }).unwrap();
            for total in 0..id {
                session.insert(Order { customer: id, total }).unwrap();
            }
        }
        session.fire().unwrap();

        let live = Live::default();
        session
            .add_rule(&live.attach(
                RuleBuilder::new("late", mode)
                    .fact("$c", "Customer")
                    .fact("$o", "Order")
                    .where_fields(&["$c.id", "$o.customer"], |v: &[Value]| v[0] == v[1]),
            ))
            .unwrap();
        assert_eq!(session.state(), SessionState::Accumulating);

        let report = session.fire().unwrap();
        assert_eq!(report.activations, 1 + 2 + 3, "{mode:?}");
        assert_eq!(session.fire().unwrap().activations, 0, "{mode:?}");
    }
}

#[test]
fn late_rule_with_pending_facts_sees_each_once() {
    let mut session = session();
    tokens(&session, "A", 3);
    session.fire().unwrap();
    tokens(&session, "A", 2);

    let live = Live::default();
    session
        .add_rule(&live.attach(RuleBuilder::new("any-a", StoreMode::Keyed).fact("$a", "A")))
        .unwrap();
    session.fire().unwrap();
    assert_eq!(live.fired(), 5);
}

#[test]
fn fields_registered_after_facts_are_extracted() {
    let mut session = session();
    #[derive(Debug)]
    struct Sensor {
        level: i64,
    }
    session.declare_type::<Sensor>("Sensor").unwrap();
    for level in [1, 5, 9] {
        session.insert(Sensor { level }).unwrap();
    }
    session.fire().unwrap();

    session
        .register_field("Sensor", "level", tessera_foundation::Type::Int, |s: &Sensor| {
            Value::Int(s.level)
        })
        .unwrap();
    let live = Live::default();
    session
        .add_rule(&live.attach(
            RuleBuilder::new("loud", StoreMode::Keyed)
                .fact("$s", "Sensor")
                .where_fields(&["$s.level"], |v: &[Value]| {
                    v[0].as_int().is_some_and(|l| l > 3)
                }),
        ))
        .unwrap();
    session.fire().unwrap();
    assert_eq!(live.fired(), 2);
}

#[test]
fn lazily_registered_fields_reach_back_fill_and_later_fires() {
    #[derive(Debug)]
    struct Sensor {
        level: i64,
    }
    let mut session =
        Session::new(Configuration::default().with_field_indexing(FieldIndexing::Lazy));
    session.declare_type::<Sensor>("Sensor").unwrap();
    session.declare_type::<Token>("A").unwrap();
    session
        .register_field("A", "value", Type::Int, |t: &Token| Value::Int(t.value))
        .unwrap();
    let quiet = session.insert(Sensor { level: 1 }).unwrap();
    for level in [5, 9] {
        session.insert(Sensor { level }).unwrap();
    }
    for value in [1, 5, 7] {
        session.insert_as("A", Token { value }).unwrap();
    }
    session.fire().unwrap();

    session
        .register_field("Sensor", "level", Type::Int, |s: &Sensor| Value::Int(s.level))
        .unwrap();
    let loud = Live::default();
    session
        .add_rule(&loud.attach(
            RuleBuilder::new("loud", StoreMode::Keyed)
                .fact("$s", "Sensor")
                .where_fields(&["$s.level"], |v: &[Value]| v[0] > Value::Int(3)),
        ))
        .unwrap();
    let paired = Live::default();
    session
        .add_rule(&paired.attach(
            RuleBuilder::new("paired", StoreMode::Joined)
                .fact("$s", "Sensor")
                .fact("$a", "A")
                .where_fields(&["$s.level", "$a.value"], |v: &[Value]| v[0] == v[1]),
        ))
        .unwrap();
    session.fire().unwrap();
    assert_eq!(loud.fired(), 2);
    assert_eq!(paired.fired(), 2);

    session.insert(Sensor { level: 7 }).unwrap();
    session.update(quiet, Sensor { level: 8 }).unwrap();
    session.fire().unwrap();
    assert_eq!(loud.live().len(), 4);
    assert_eq!(paired.live().len(), 2);
}

#[test]
fn rejected_rules_leave_memory_untouched() {
    let mut session = session();
    tokens(&session, "A", 2);
    session.fire().unwrap();
    let live = Live::default();
    session
        .add_rule(&live.attach(RuleBuilder::new("dup", StoreMode::Keyed).fact("$a", "A")))
        .unwrap();
    let before = session.memory_stats();

    let err = session
        .add_rule(&RuleBuilder::new("dup", StoreMode::Keyed).fact("$b", "B").build())
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateRule(_)));

    let err = session
        .add_rule(
            &RuleBuilder::new("broken", StoreMode::Keyed)
                .fact("$a", "A")
                .where_fields(&["$a.missing"], |_: &[Value]| true)
                .build(),
        )
        .unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::UnknownField { .. } | ErrorKind::InvalidRule { .. }
    ));

    let after = session.memory_stats();
    assert_eq!(before.alpha.len(), after.alpha.len());
    assert_eq!(before.rules.len(), after.rules.len());
    assert_eq!(session.rule_names().count(), 1);
}

#[test]
fn panicking_condition_skips_only_its_rule() {
    let mut session = session();
    tokens(&session, "A", 3);
    session.fire().unwrap();

    let bad = RuleBuilder::new("bad", StoreMode::Keyed)
        .fact("$a", "A")
        .where_fields(&["$a.value"], |_: &[Value]| -> bool { panic!("condition failure") })
        .build();
    let good = Live::default();
    let good_rule = good.attach(RuleBuilder::new("good", StoreMode::Keyed).fact("$a", "A"));

    let skipped = Mutex::new(Vec::new());
    let added = session.add_rules([&bad, &good_rule], &|rule: &str, error: &Error| {
        assert!(matches!(error.kind, ErrorKind::InvalidRule { .. }));
        assert!(error.to_string().contains("condition failure"));
        skipped.lock().unwrap().push(rule.to_owned());
    });

    assert_eq!(added, 1);
    assert_eq!(*skipped.lock().unwrap(), vec!["bad"]);
    assert_eq!(session.state(), SessionState::Accumulating);
    assert_eq!(session.rule_names().collect::<Vec<_>>(), vec!["good"]);
    assert_eq!(session.memory_stats().alpha.len(), 1);

    session.fire().unwrap();
    assert_eq!(good.live().len(), 3);

    // The failed condition is gone, so new facts never reach it.
    tokens(&session, "A", 1);
    session.fire().unwrap();
    assert_eq!(good.live().len(), 4);
}

#[test]
fn panicking_join_is_rejected_and_session_recovers() {
    let mut session = session();
    tokens(&session, "A", 2);
    tokens(&session, "B", 2);
    session.fire().unwrap();
    let before = session.memory_stats();

    let err = session
        .add_rule(
            &RuleBuilder::new("bad-join", StoreMode::Joined)
                .fact("$a", "A")
                .fact("$b", "B")
                .where_fields(&["$a.value", "$b.value"], |_: &[Value]| -> bool {
                    panic!("join failure")
                })
                .build(),
        )
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidRule { .. }));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.memory_stats().alpha, before.alpha);
    assert_eq!(session.rule_names().count(), 0);

    let live = Live::default();
    session
        .add_rule(&live.attach(RuleBuilder::new("bad-join", StoreMode::Joined).fact("$a", "A")))
        .unwrap();
    session.fire().unwrap();
    assert_eq!(live.fired(), 2);
}
