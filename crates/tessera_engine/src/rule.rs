//! Rule definitions and builders.
//!
//! A rule declares fact positions bound to variables (`"$a"`), conditions
//! over their fields (`"$a.total"`), optional exists / not-exists clauses,
//! and a reaction. Definitions are plain data; [`RuleCompiler`] checks them
//! against a type registry and plans the network a session builds.

pub mod compiler;
pub(crate) mod runtime;

pub use compiler::RuleCompiler;

use std::sync::Arc;

use tessera_foundation::{Predicate, Result};

use crate::activation::{Activation, ReactionContext};
use crate::aggregate::AggregateKind;
use crate::beta::StoreMode;

/// Code run for every new activation of a rule.
pub type Reaction = Arc<dyn Fn(&mut ReactionContext<'_>) -> Result<()> + Send + Sync>;

/// Code run when a previously matching combination stops matching.
pub type RetractionHandler = Arc<dyn Fn(&Activation) + Send + Sync>;

/// Identifies a rule within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u32);

impl RuleId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

// =============================================================================
// Declarations
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) struct FactDecl {
    pub var: Arc<str>,
    pub type_name: Arc<str>,
}

#[derive(Clone)]
pub(crate) struct ConditionDecl {
    pub name: Option<Arc<str>>,
    pub fields: Vec<Arc<str>>,
    pub predicate: Arc<dyn Predicate>,
}

impl std::fmt::Debug for ConditionDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionDecl")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct AggregateDecl {
    pub kind: AggregateKind,
    pub facts: Vec<FactDecl>,
    pub conditions: Vec<ConditionDecl>,
    /// `(parent field ref, nested field ref)` equality pairs.
    pub keys: Vec<(Arc<str>, Arc<str>)>,
}

fn condition(
    name: Option<&str>,
    fields: &[&str],
    predicate: Arc<dyn Predicate>,
) -> ConditionDecl {
    ConditionDecl {
        name: name.map(Arc::from),
        fields: fields.iter().map(|f| Arc::from(*f)).collect(),
        predicate,
    }
}

// =============================================================================
// Aggregate Builder
// =============================================================================

/// Builds the nested group of an exists / not-exists clause.
///
/// Nested conditions may only read the clause's own facts. Correlation with
/// the enclosing rule goes through [`AggregateBuilder::key`].
#[derive(Clone, Debug, Default)]
pub struct AggregateBuilder {
    facts: Vec<FactDecl>,
    conditions: Vec<ConditionDecl>,
    keys: Vec<(Arc<str>, Arc<str>)>,
}

impl AggregateBuilder {
    /// Creates an empty clause.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a nested fact position.
    #[must_use]
    pub fn fact(mut self, var: &str, type_name: &str) -> Self {
        self.facts.push(FactDecl {
            var: Arc::from(var),
            type_name: Arc::from(type_name),
        });
        self
    }

    /// Adds a condition over nested fields.
    #[must_use]
    pub fn where_fields<P: Predicate + 'static>(mut self, fields: &[&str], predicate: P) -> Self {
        self.conditions
            .push(condition(None, fields, Arc::new(predicate)));
        self
    }

    /// Adds a condition with a shared predicate object.
    #[must_use]
    pub fn where_predicate(mut self, fields: &[&str], predicate: Arc<dyn Predicate>) -> Self {
        self.conditions.push(condition(None, fields, predicate));
        self
    }

    /// Requires `parent` (an enclosing field such as `"$c.id"`) to equal
    /// `nested` (a nested field such as `"$o.customer"`).
    #[must_use]
    pub fn key(mut self, parent: &str, nested: &str) -> Self {
        self.keys.push((Arc::from(parent), Arc::from(nested)));
        self
    }

    fn into_decl(self, kind: AggregateKind) -> AggregateDecl {
        AggregateDecl {
            kind,
            facts: self.facts,
            conditions: self.conditions,
            keys: self.keys,
        }
    }
}

// =============================================================================
// Rule Definition
// =============================================================================

/// A complete rule, ready to be compiled into a session.
#[derive(Clone)]
pub struct RuleDefinition {
    pub(crate) name: Arc<str>,
    pub(crate) mode: StoreMode,
    pub(crate) salience: i32,
    pub(crate) enabled: bool,
    pub(crate) facts: Vec<FactDecl>,
    pub(crate) conditions: Vec<ConditionDecl>,
    pub(crate) aggregates: Vec<AggregateDecl>,
    pub(crate) reaction: Option<Reaction>,
    pub(crate) on_retract: Option<RetractionHandler>,
}

impl RuleDefinition {
    /// Rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key row storage mode.
    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Salience (higher fires first).
    #[must_use]
    pub fn salience(&self) -> i32 {
        self.salience
    }

    /// Whether the rule starts enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Variables of the declared fact positions, in order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.facts.iter().map(|f| &*f.var)
    }
}

impl std::fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleDefinition")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("salience", &self.salience)
            .field("facts", &self.facts)
            .field("conditions", &self.conditions)
            .field("aggregates", &self.aggregates)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Rule Builder
// =============================================================================

/// Fluent construction of a [`RuleDefinition`].
///
/// ```
/// use tessera_engine::{RuleBuilder, StoreMode};
/// use tessera_foundation::Value;
///
/// let rule = RuleBuilder::new("large-order", StoreMode::Keyed)
///     .fact("$o", "Order")
///     .where_fields(&["$o.total"], |v: &[Value]| v[0].as_int().is_some_and(|t| t > 100))
///     .salience(5)
///     .execute(|ctx| {
///         let _ = ctx.handle("$o");
///         Ok(())
///     })
///     .build();
/// assert_eq!(rule.name(), "large-order");
/// ```
#[derive(Clone, Debug)]
pub struct RuleBuilder {
    definition: RuleDefinition,
}

impl RuleBuilder {
    /// Starts a rule with the given name and storage mode.
    #[must_use]
    pub fn new(name: &str, mode: StoreMode) -> Self {
        Self {
            definition: RuleDefinition {
                name: Arc::from(name),
                mode,
                salience: 0,
                enabled: true,
                facts: Vec::new(),
                conditions: Vec::new(),
                aggregates: Vec::new(),
                reaction: None,
                on_retract: None,
            },
        }
    }

    /// Declares a fact position.
    #[must_use]
    pub fn fact(mut self, var: &str, type_name: &str) -> Self {
        self.definition.facts.push(FactDecl {
            var: Arc::from(var),
            type_name: Arc::from(type_name),
        });
        self
    }

    /// Adds a condition. `fields` are references such as `"$a.x"`; the
    /// predicate receives their values in the same order.
    ///
    /// A condition reading one position filters in alpha memory; one
    /// reading several positions joins them.
    #[must_use]
    pub fn where_fields<P: Predicate + 'static>(mut self, fields: &[&str], predicate: P) -> Self {
        self.definition
            .conditions
            .push(condition(None, fields, Arc::new(predicate)));
        self
    }

    /// Adds a named condition. The name appears in evaluation events.
    #[must_use]
    pub fn where_named<P: Predicate + 'static>(
        mut self,
        name: &str,
        fields: &[&str],
        predicate: P,
    ) -> Self {
        self.definition
            .conditions
            .push(condition(Some(name), fields, Arc::new(predicate)));
        self
    }

    /// Adds a condition with a shared predicate object. Rules passing the
    /// same object over the same fields share alpha buckets.
    #[must_use]
    pub fn where_predicate(mut self, fields: &[&str], predicate: Arc<dyn Predicate>) -> Self {
        self.definition
            .conditions
            .push(condition(None, fields, predicate));
        self
    }

    /// Adds an exists clause.
    #[must_use]
    pub fn exists(mut self, clause: AggregateBuilder) -> Self {
        self.definition
            .aggregates
            .push(clause.into_decl(AggregateKind::Exists));
        self
    }

    /// Adds a not-exists clause.
    #[must_use]
    pub fn not_exists(mut self, clause: AggregateBuilder) -> Self {
        self.definition
            .aggregates
            .push(clause.into_decl(AggregateKind::NotExists));
        self
    }

    /// Sets the salience.
    #[must_use]
    pub fn salience(mut self, salience: i32) -> Self {
        self.definition.salience = salience;
        self
    }

    /// Sets whether the rule starts enabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.definition.enabled = enabled;
        self
    }

    /// Sets the reaction.
    #[must_use]
    pub fn execute<F>(mut self, reaction: F) -> Self
    where
        F: Fn(&mut ReactionContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.definition.reaction = Some(Arc::new(reaction));
        self
    }

    /// Sets the retraction callback.
    #[must_use]
    pub fn on_retract<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Activation) + Send + Sync + 'static,
    {
        self.definition.on_retract = Some(Arc::new(handler));
        self
    }

    /// Finishes the definition. Validation happens when the rule is added
    /// to a knowledge base or session.
    #[must_use]
    pub fn build(self) -> RuleDefinition {
        self.definition
    }
}
