//! Knowledge base and forked sessions
//!
//! Sessions forked from one knowledge base share declarations but never
//! each other's facts, and rules added later stay out of running sessions.

use std::sync::{Arc, Mutex};
use std::thread;

use tessera::engine::{Knowledge, RuleBuilder, StoreMode};
use tessera::foundation::{Error, ErrorKind, Type, Value};

#[derive(Debug, Clone)]
struct Payment {
    account: i64,
    amount: i64,
}

#[derive(Debug, Clone)]
struct Flag {
    account: i64,
}

fn knowledge() -> Knowledge {
    let knowledge = Knowledge::default();
    knowledge.declare_type::<Payment>("Payment").unwrap();
    knowledge
        .register_field("Payment", "account", Type::Int, |p: &Payment| {
            Value::Int(p.account)
        })
        .unwrap();
    knowledge
        .register_field("Payment", "amount", Type::Int, |p: &Payment| {
            Value::Int(p.amount)
        })
        .unwrap();
    knowledge.declare_type::<Flag>("Flag").unwrap();
    knowledge
        .register_field("Flag", "account", Type::Int, |f: &Flag| Value::Int(f.account))
        .unwrap();
    knowledge
}

fn flag_large_payments() -> tessera::engine::RuleDefinition {
    RuleBuilder::new("flag-large", StoreMode::Keyed)
        .fact("$p", "Payment")
        .where_fields(&["$p.amount"], |v: &[Value]| {
            v[0].as_int().is_some_and(|a| a >= 1000)
        })
        .execute(|ctx| {
            let payment = ctx.get::<Payment>("$p").cloned();
            if let Some(payment) = payment {
                ctx.insert(Flag {
                    account: payment.account,
                });
            }
            Ok(())
        })
        .build()
}

// =============================================================================
// Forking
// =============================================================================

#[test]
fn sessions_forked_on_threads_stay_isolated() {
    let knowledge = knowledge();
    knowledge.add_rule(flag_large_payments()).unwrap();

    let workers: Vec<_> = (0..4i64)
        .map(|worker| {
            let knowledge = knowledge.clone();
            thread::spawn(move || {
                let mut session = knowledge.new_session().unwrap();
                for n in 0..=worker {
                    session
                        .insert(Payment {
                            account: worker,
                            amount: 1000 + n,
                        })
                        .unwrap();
                }
                session.insert(Payment { account: worker, amount: 5 }).unwrap();
                let report = session.fire().unwrap();
                (report.activations, session.fact_count())
            })
        })
        .collect();

    for (worker, handle) in workers.into_iter().enumerate() {
        let (activations, facts) = handle.join().unwrap();
        let large = worker + 1;
        assert_eq!(activations, large);
        // Every payment plus one flag per large payment.
        assert_eq!(facts, large + 1 + large);
    }
}

#[test]
fn later_rules_reach_only_new_sessions() {
    let knowledge = knowledge();
    let early = knowledge.new_session().unwrap();
    knowledge.add_rule(flag_large_payments()).unwrap();
    let mut late = knowledge.new_session().unwrap();

    assert_eq!(early.rule_names().count(), 0);
    assert_eq!(late.rule_names().collect::<Vec<_>>(), vec!["flag-large"]);

    late.insert(Payment { account: 1, amount: 2000 }).unwrap();
    let report = late.fire().unwrap();
    assert_eq!(report.activations, 1);
    assert_eq!(report.inserted, 2);
}

// =============================================================================
// Exception handler
// =============================================================================

#[test]
fn add_rules_skips_broken_rules() {
    let knowledge = knowledge();
    let skipped = Mutex::new(Vec::new());
    let unknown_type = RuleBuilder::new("ghost", StoreMode::Keyed)
        .fact("$g", "Ghost")
        .build();
    let unknown_field = RuleBuilder::new("typo", StoreMode::Joined)
        .fact("$p", "Payment")
        .where_fields(&["$p.ammount"], |_: &[Value]| true)
        .build();

    let added = knowledge.add_rules(
        vec![unknown_type, flag_large_payments(), unknown_field],
        &|rule: &str, error: &Error| {
            assert!(matches!(
                error.kind,
                ErrorKind::InvalidRule { .. } | ErrorKind::UnknownType(_) | ErrorKind::UnknownField { .. }
            ));
            skipped.lock().unwrap().push(rule.to_owned());
        },
    );

    assert_eq!(added, 1);
    assert_eq!(*skipped.lock().unwrap(), vec!["ghost", "typo"]);
    assert_eq!(knowledge.rule_names(), vec!["flag-large".to_owned()]);

    let mut session = knowledge.new_session().unwrap();
    session.insert(Payment { account: 3, amount: 4000 }).unwrap();
    assert_eq!(session.fire().unwrap().activations, 1);
}

#[test]
fn knowledge_is_shared_between_clones() {
    let knowledge = knowledge();
    let writer = knowledge.clone();
    let handle = thread::spawn(move || writer.add_rule(flag_large_payments()));
    handle.join().unwrap().unwrap();
    assert_eq!(knowledge.rule_count(), 1);

    let shared = Arc::new(knowledge);
    let reader = Arc::clone(&shared);
    let names = thread::spawn(move || reader.rule_names()).join().unwrap();
    assert_eq!(names, vec!["flag-large".to_owned()]);
}
