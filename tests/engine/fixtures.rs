//! Shared fact types and helpers for engine tests.

use std::sync::{Arc, Mutex};

use tessera_engine::{Activation, RuleBuilder, RuleDefinition, Session};
use tessera_foundation::{FactHandle, Type, Value};

/// A plain fact declared under several type names.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub customer: i64,
    pub total: i64,
}

pub const TOKEN_TYPES: [&str; 4] = ["A", "B", "C", "D"];

/// A session with `Token` declared as A, B, C, and D, plus customers and
/// orders.
pub fn session() -> Session {
    let mut session = Session::default();
    for name in TOKEN_TYPES {
        session.declare_type::<Token>(name).unwrap();
        session
            .register_field(name, "value", Type::Int, |t: &Token| Value::Int(t.value))
            .unwrap();
    }
    session.declare_type::<Customer>("Customer").unwrap();
    session
        .register_field("Customer", "id", Type::Int, |c: &Customer| Value::Int(c.id))
        .unwrap();
    session.declare_type::<Order>("Order").unwrap();
    session
        .register_field("Order", "customer", Type::Int, |o: &Order| {
            Value::Int(o.customer)
        })
        .unwrap();
    session
        .register_field("Order", "total", Type::Int, |o: &Order| Value::Int(o.total))
        .unwrap();
    session
}

pub fn tokens(session: &Session, type_name: &str, count: i64) -> Vec<FactHandle> {
    (0..count)
        .map(|value| session.insert_as(type_name, Token { value }).unwrap())
        .collect()
}

/// Combinations currently matched by a rule, maintained from its reaction
/// and retraction callbacks.
#[derive(Clone, Default)]
pub struct Live {
    fired: Arc<Mutex<Vec<Vec<FactHandle>>>>,
    live: Arc<Mutex<Vec<Vec<FactHandle>>>>,
    retracted: Arc<Mutex<usize>>,
}

impl Live {
    pub fn attach(&self, builder: RuleBuilder) -> RuleDefinition {
        let fired = Arc::clone(&self.fired);
        let live = Arc::clone(&self.live);
        let gone = Arc::clone(&self.live);
        let retracted = Arc::clone(&self.retracted);
        builder
            .execute(move |ctx| {
                let facts = ctx.activation().facts.clone();
                fired.lock().unwrap().push(facts.clone());
                live.lock().unwrap().push(facts);
                Ok(())
            })
            .on_retract(move |activation: &Activation| {
                let mut live = gone.lock().unwrap();
                if let Some(at) = live.iter().position(|f| *f == activation.facts) {
                    live.remove(at);
                }
                *retracted.lock().unwrap() += 1;
            })
            .build()
    }

    /// Number of reactions run so far.
    pub fn fired(&self) -> usize {
        self.fired.lock().unwrap().len()
    }

    /// Combinations not retracted yet.
    pub fn live(&self) -> Vec<Vec<FactHandle>> {
        self.live.lock().unwrap().clone()
    }

    pub fn retracted(&self) -> usize {
        *self.retracted.lock().unwrap()
    }

    /// Every combination fired so far, in order.
    pub fn history(&self) -> Vec<Vec<FactHandle>> {
        self.fired.lock().unwrap().clone()
    }
}
