//! Rule compiler: checks a [`RuleDefinition`] against a type registry and
//! plans the alpha conditions, key rows, and joins a session builds for it.
//!
//! Planning is pure. Every error is found here, before any memory is
//! touched, so deployment itself cannot fail half way.

use std::sync::Arc;

use tessera_foundation::{Error, Predicate, Result};
use tessera_storage::{TypeKey, TypeRegistry};

use super::{ConditionDecl, FactDecl, Reaction, RetractionHandler, RuleDefinition};
use crate::aggregate::AggregateKind;
use crate::beta::{ConditionSpec, StoreMode};

// =============================================================================
// Plans
// =============================================================================

/// A single-fact condition of one position.
#[derive(Clone)]
pub(crate) struct AlphaPlan {
    pub fields: Vec<usize>,
    pub predicate: Arc<dyn Predicate>,
    pub name: Arc<str>,
}

/// One fact position.
#[derive(Clone)]
pub(crate) struct PositionPlan {
    pub type_key: TypeKey,
    pub alpha: Vec<AlphaPlan>,
    /// Field slots read by joins and keys, sorted.
    pub key_fields: Vec<usize>,
}

/// Positions and joins of the rule body or of one nested group.
#[derive(Clone, Default)]
pub(crate) struct NetworkPlan {
    pub positions: Vec<PositionPlan>,
    pub conditions: Vec<ConditionSpec>,
    /// Position sets that must share a component.
    pub groups: Vec<Vec<usize>>,
}

impl NetworkPlan {
    fn key_field(&mut self, position: usize, field: usize) {
        let fields = &mut self.positions[position].key_fields;
        if let Err(at) = fields.binary_search(&field) {
            fields.insert(at, field);
        }
    }
}

/// One exists / not-exists clause.
#[derive(Clone)]
pub(crate) struct AggregatePlan {
    pub kind: AggregateKind,
    pub network: NetworkPlan,
    /// `(rule position, field slot)` per key component.
    pub parent_key: Vec<(usize, usize)>,
    /// `(nested position, field slot)` per key component.
    pub nested_key: Vec<(usize, usize)>,
    /// No key and no nested joins: only bucket presence matters.
    pub loose: bool,
}

/// Everything a session needs to deploy a rule.
#[derive(Clone)]
pub(crate) struct RulePlan {
    pub name: Arc<str>,
    pub mode: StoreMode,
    pub salience: i32,
    pub enabled: bool,
    pub variables: Arc<[Arc<str>]>,
    pub network: NetworkPlan,
    pub aggregates: Vec<AggregatePlan>,
    pub reaction: Option<Reaction>,
    pub on_retract: Option<RetractionHandler>,
}

// =============================================================================
// Compiler
// =============================================================================

/// Variables in scope while resolving field references.
struct Scope<'a> {
    registry: &'a TypeRegistry,
    vars: Vec<(Arc<str>, TypeKey)>,
}

impl<'a> Scope<'a> {
    fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            vars: Vec::new(),
        }
    }

    fn position(&self, var: &str) -> Option<usize> {
        self.vars.iter().position(|(v, _)| &**v == var)
    }

    fn declare(&mut self, fact: &FactDecl) -> std::result::Result<TypeKey, String> {
        if !fact.var.starts_with('$') || fact.var.len() < 2 {
            return Err(format!("variable {} must look like $name", fact.var));
        }
        if self.position(&fact.var).is_some() {
            return Err(format!("variable {} is declared twice", fact.var));
        }
        let schema = self
            .registry
            .require(&fact.type_name)
            .map_err(|e| e.to_string())?;
        self.vars.push((Arc::clone(&fact.var), schema.key()));
        Ok(schema.key())
    }

    /// Resolves `"$var.field"` to `(position, field slot)`.
    fn resolve(&self, reference: &str) -> std::result::Result<(usize, usize), String> {
        let (var, field) = reference
            .split_once('.')
            .ok_or_else(|| format!("field reference {reference} must look like $var.field"))?;
        let position = self
            .position(var)
            .ok_or_else(|| format!("{reference} uses undeclared variable {var}"))?;
        let type_key = self.vars[position].1;
        let schema = self
            .registry
            .get(type_key)
            .ok_or_else(|| format!("type of {var} is not declared"))?;
        let key = schema
            .field_key(field)
            .ok_or_else(|| format!("{} has no field {field}", schema.name()))?;
        Ok((position, key.slot()))
    }
}

/// Compiles rule definitions into deployable plans.
pub struct RuleCompiler;

impl RuleCompiler {
    /// Checks a rule against a type registry without deploying it.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidRule` error describing the first problem found:
    /// no fact positions, unknown types or fields, malformed references,
    /// or nested conditions reading the enclosing rule's facts.
    pub fn validate(definition: &RuleDefinition, registry: &TypeRegistry) -> Result<()> {
        Self::plan(definition, registry).map(|_| ())
    }

    pub(crate) fn plan(definition: &RuleDefinition, registry: &TypeRegistry) -> Result<RulePlan> {
        let invalid = |reason: String| Error::invalid_rule(&*definition.name, reason);

        if definition.facts.is_empty() {
            return Err(invalid("declares no facts".into()));
        }

        let mut scope = Scope::new(registry);
        let mut network = NetworkPlan::default();
        for fact in &definition.facts {
            let type_key = scope.declare(fact).map_err(invalid)?;
            network.positions.push(PositionPlan {
                type_key,
                alpha: Vec::new(),
                key_fields: Vec::new(),
            });
        }
        for (index, condition) in definition.conditions.iter().enumerate() {
            let name = condition_name(&definition.name, None, index, condition);
            add_condition(&scope, &mut network, condition, name).map_err(invalid)?;
        }

        let mut aggregates = Vec::with_capacity(definition.aggregates.len());
        for (number, decl) in definition.aggregates.iter().enumerate() {
            let label = format!("{}#{number}", decl.kind);
            if decl.facts.is_empty() {
                return Err(invalid(format!("{label} declares no facts")));
            }

            let mut nested_scope = Scope::new(registry);
            let mut nested = NetworkPlan::default();
            for fact in &decl.facts {
                if scope.position(&fact.var).is_some() {
                    return Err(invalid(format!(
                        "{label} redeclares enclosing variable {}",
                        fact.var
                    )));
                }
                let type_key = nested_scope.declare(fact).map_err(invalid)?;
                nested.positions.push(PositionPlan {
                    type_key,
                    alpha: Vec::new(),
                    key_fields: Vec::new(),
                });
            }
            for (index, condition) in decl.conditions.iter().enumerate() {
                if let Some(outer) = condition
                    .fields
                    .iter()
                    .find(|f| f.split_once('.').is_some_and(|(v, _)| scope.position(v).is_some()))
                {
                    return Err(invalid(format!(
                        "{label} condition reads enclosing field {outer}; correlate through key()"
                    )));
                }
                let name = condition_name(&definition.name, Some(&label), index, condition);
                add_condition(&nested_scope, &mut nested, condition, name).map_err(invalid)?;
            }

            let mut parent_key = Vec::with_capacity(decl.keys.len());
            let mut nested_key = Vec::with_capacity(decl.keys.len());
            for (parent, inner) in &decl.keys {
                let (p, pf) = scope.resolve(parent).map_err(invalid)?;
                let (q, qf) = nested_scope.resolve(inner).map_err(invalid)?;
                network.key_field(p, pf);
                nested.key_field(q, qf);
                parent_key.push((p, pf));
                nested_key.push((q, qf));
            }

            let mut linked: Vec<usize> = parent_key.iter().map(|&(p, _)| p).collect();
            linked.sort_unstable();
            linked.dedup();
            if linked.len() > 1 {
                network.groups.push(linked);
            }

            let loose = parent_key.is_empty() && nested.conditions.is_empty();
            aggregates.push(AggregatePlan {
                kind: decl.kind,
                network: nested,
                parent_key,
                nested_key,
                loose,
            });
        }

        Ok(RulePlan {
            name: Arc::clone(&definition.name),
            mode: definition.mode,
            salience: definition.salience,
            enabled: definition.enabled,
            variables: definition.facts.iter().map(|f| Arc::clone(&f.var)).collect(),
            network,
            aggregates,
            reaction: definition.reaction.clone(),
            on_retract: definition.on_retract.clone(),
        })
    }
}

fn condition_name(
    rule: &str,
    clause: Option<&str>,
    index: usize,
    condition: &ConditionDecl,
) -> Arc<str> {
    if let Some(name) = &condition.name {
        return Arc::clone(name);
    }
    match clause {
        Some(clause) => Arc::from(format!("{rule}/{clause}/{index}")),
        None => Arc::from(format!("{rule}/{index}")),
    }
}

fn add_condition(
    scope: &Scope<'_>,
    network: &mut NetworkPlan,
    condition: &ConditionDecl,
    name: Arc<str>,
) -> std::result::Result<(), String> {
    if condition.fields.is_empty() {
        return Err(format!("condition {name} reads no fields"));
    }
    let args = condition
        .fields
        .iter()
        .map(|f| scope.resolve(f))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let first = args[0].0;
    if args.iter().all(|&(p, _)| p == first) {
        network.positions[first].alpha.push(AlphaPlan {
            fields: args.iter().map(|&(_, f)| f).collect(),
            predicate: Arc::clone(&condition.predicate),
            name,
        });
    } else {
        for &(p, f) in &args {
            network.key_field(p, f);
        }
        network.conditions.push(ConditionSpec {
            name,
            args,
            predicate: Arc::clone(&condition.predicate),
        });
    }
    Ok(())
}
