//! Sessions: working memory, the fire loop, and hot deployment.
//!
//! A session moves through these states:
//!
//! ```text
//! Idle --insert/update/delete--> Accumulating --fire()--> Firing --> Idle
//!   \                                 |
//!    +-------add_rule()-------> Deploying (back-fill, then back)
//! ```
//!
//! Changes are buffered as actions and applied in FIFO order when the
//! session fires. Each fire cycle applies the buffered actions to alpha
//! memory and the rule networks, joins the new rows, collects activations
//! and retractions, merges every `Delta` scope into `Main`, then runs the
//! reactions. Reactions buffer further changes, and `fire()` keeps cycling
//! until the buffer stays empty.

use std::any::{Any, TypeId};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use tessera_foundation::{
    Error, FactHandle, IndexedMap, Result, SemanticLimit, Type, Value,
};
use tessera_storage::{
    AlphaAddress, AlphaCondition, AlphaMemory, BucketStats, Fact, FactRecord, FactStore, FieldKey,
    HandleAllocator, TypeKey, TypeRegistry, TypeSchema,
};

use crate::action::{Action, ActionSink, TypeTarget};
use crate::activation::{Activation, Agenda, ReactionContext};
use crate::beta::NetworkStats;
use crate::config::{Configuration, FieldIndexing, UnknownTypePolicy};
use crate::events::{ConditionEvaluation, EngineEvent, EventBus, EventListener};
use crate::knowledge::ExceptionHandler;
use crate::rule::runtime::{CompiledRule, DeployTarget};
use crate::rule::{RuleCompiler, RuleDefinition, RuleId};

static NEXT_SESSION: AtomicU32 = AtomicU32::new(0);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing pending.
    Idle,
    /// Changes or activations are waiting for `fire()`.
    Accumulating,
    /// Inside `fire()`.
    Firing,
    /// Back-filling a newly added rule.
    Deploying,
}

/// What one call to [`Session::fire`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Fire cycles run.
    pub cycles: u32,
    /// Activations scheduled.
    pub activations: usize,
    /// Retractions delivered.
    pub retractions: usize,
    /// Facts inserted.
    pub inserted: usize,
    /// Facts updated.
    pub updated: usize,
    /// Facts deleted.
    pub deleted: usize,
}

/// Memory occupancy of one rule.
#[derive(Debug, Clone)]
pub struct RuleStats {
    /// Rule name.
    pub name: Arc<str>,
    /// Whether the rule is enabled.
    pub enabled: bool,
    /// The rule's own network.
    pub network: NetworkStats,
    /// Nested networks of joined exists / not-exists clauses.
    pub aggregates: Vec<NetworkStats>,
}

/// Memory occupancy of a session.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    /// Live facts.
    pub facts: usize,
    /// Every alpha bucket.
    pub alpha: Vec<BucketStats>,
    /// Every rule.
    pub rules: Vec<RuleStats>,
}

impl MemoryStats {
    /// Returns true if no alpha bucket or beta node holds `Delta` entries.
    #[must_use]
    pub fn delta_is_empty(&self) -> bool {
        self.alpha.iter().all(|b| b.delta == 0)
            && self.rules.iter().all(|r| {
                r.network.delta_is_empty() && r.aggregates.iter().all(NetworkStats::delta_is_empty)
            })
    }

    /// Looks up a rule's stats by name.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RuleStats> {
        self.rules.iter().find(|r| &*r.name == name)
    }
}

/// Returns the schema a fact is stored under, checking the fact's Rust
/// type against it.
fn checked_schema<'r>(
    registry: &'r TypeRegistry,
    type_key: TypeKey,
    handle: FactHandle,
    fact: &Fact,
) -> Result<&'r TypeSchema> {
    let schema = registry
        .get(type_key)
        .ok_or_else(|| Error::internal(format!("type #{} vanished", type_key.index())))?;
    if (**fact).type_id() != schema.rust_type() {
        return Err(Error::type_conflict(
            schema.name(),
            format!("{handle} is not a {}", schema.rust_name()),
        ));
    }
    Ok(schema)
}

/// Forwards condition evaluations to the event bus when enabled.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn evaluation_observer(events: &EventBus, enabled: bool) -> impl FnMut(&str, &[Value], bool) + '_ {
    let enabled = enabled && !events.is_empty();
    move |condition: &str, values: &[Value], outcome: bool| {
        if enabled {
            events.publish(&EngineEvent::ConditionEvaluated(ConditionEvaluation {
                condition: Arc::from(condition),
                values: values.to_vec(),
                outcome,
                timestamp: SystemTime::now(),
            }));
        }
    }
}

/// A working memory with deployed rules.
pub struct Session {
    id: u32,
    config: Configuration,
    registry: TypeRegistry,
    allocator: Arc<HandleAllocator>,
    sink: ActionSink,
    facts: FactStore,
    alpha: AlphaMemory,
    rules: Vec<CompiledRule>,
    /// Rules reading each alpha bucket.
    subscriptions: IndexedMap<AlphaAddress, Vec<usize>>,
    agenda: Agenda,
    events: EventBus,
    state: SessionState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self::with_registry(config, TypeRegistry::new())
    }

    /// Creates a session over an existing set of type declarations.
    #[must_use]
    pub fn with_registry(config: Configuration, registry: TypeRegistry) -> Self {
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let allocator = Arc::new(HandleAllocator::new(id));
        let min_capacity = config.min_index_capacity;
        Self {
            id,
            registry,
            sink: ActionSink::new(Arc::clone(&allocator)),
            allocator,
            facts: FactStore::with_min_capacity(min_capacity),
            alpha: AlphaMemory::new(min_capacity),
            rules: Vec::new(),
            subscriptions: IndexedMap::with_min_capacity(min_capacity),
            agenda: Agenda::default(),
            events: EventBus::new(),
            state: SessionState::Idle,
            config,
        }
    }

    /// Session id. Every handle minted here carries it.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Type declarations visible to this session.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Idle if self.has_pending_work() => SessionState::Accumulating,
            state => state,
        }
    }

    fn has_pending_work(&self) -> bool {
        self.sink.pending() > 0
            || !self.agenda.is_empty()
            || self.rules.iter().any(CompiledRule::needs_cycle)
    }

    // -------------------------------------------------------------------------
    // Types
    // -------------------------------------------------------------------------

    /// Declares a fact type backed by `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is declared for a different Rust type.
    pub fn declare_type<T: Any + Send + Sync>(&mut self, name: &str) -> Result<TypeKey> {
        self.registry.declare::<T>(name)
    }

    /// Registers a field on a declared type. Facts already in memory gain
    /// the field eagerly or on first use, per [`FieldIndexing`].
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or not backed by `T`.
    pub fn register_field<T, F>(
        &mut self,
        type_name: &str,
        field: &str,
        ty: Type,
        extract: F,
    ) -> Result<FieldKey>
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let type_key = self.registry.require(type_name)?.key();
        let key = self.registry.register_field::<T, F>(type_key, field, ty, extract)?;
        if self.config.field_indexing == FieldIndexing::Eager {
            if let Some(schema) = self.registry.get(type_key) {
                self.facts.refresh_type(schema);
            }
        }
        Ok(key)
    }

    fn check_target(&self, target: &TypeTarget, type_id: TypeId) -> Result<()> {
        let (found, name) = match target {
            TypeTarget::Named { name, .. } => (self.registry.resolve(name), &**name),
            TypeTarget::Rust { id, name } => (self.registry.resolve_rust(*id), *name),
        };
        match found.and_then(|key| self.registry.get(key)) {
            Some(schema) if schema.rust_type() != type_id => Err(Error::type_conflict(
                schema.name(),
                format!("declared for {}", schema.rust_name()),
            )),
            Some(_) => Ok(()),
            None if self.config.unknown_types == UnknownTypePolicy::Fail => {
                Err(Error::unknown_type(name))
            }
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Facts
    // -------------------------------------------------------------------------

    /// Buffers an insert typed by `T`'s default declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` was never declared and the session rejects
    /// unknown types.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Result<FactHandle> {
        let target = TypeTarget::Rust {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        };
        self.check_target(&target, TypeId::of::<T>())?;
        Ok(self.sink.submit_insert(target, Arc::new(value)))
    }

    /// Buffers an insert under a declared type name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is declared for another Rust type, or
    /// is unknown and the session rejects unknown types.
    pub fn insert_as<T: Any + Send + Sync>(&self, type_name: &str, value: T) -> Result<FactHandle> {
        let target = TypeTarget::Named {
            name: Arc::from(type_name),
            id: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
        };
        self.check_target(&target, TypeId::of::<T>())?;
        Ok(self.sink.submit_insert(target, Arc::new(value)))
    }

    /// Buffers a replacement value for a fact. The fact keeps its handle;
    /// its old combinations are retracted and its new ones activated.
    ///
    /// # Errors
    ///
    /// Returns an error for handles from another session or never issued
    /// here, and for values of a different Rust type than the fact's.
    pub fn update<T: Any + Send + Sync>(&self, handle: FactHandle, value: T) -> Result<()> {
        self.allocator.validate(handle)?;
        if let Some(record) = self.facts.get(handle) {
            if let Some(schema) = self.registry.get(record.type_key()) {
                if schema.rust_type() != TypeId::of::<T>() {
                    return Err(Error::type_conflict(
                        schema.name(),
                        format!("cannot update {handle} with {}", std::any::type_name::<T>()),
                    ));
                }
            }
        }
        self.sink.update(handle, value)
    }

    /// Buffers a delete. Returns false if the fact is already gone or a
    /// delete of it is already buffered, in which case nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns an error for handles from another session or never issued
    /// here.
    pub fn delete(&self, handle: FactHandle) -> Result<bool> {
        self.allocator.validate(handle)?;
        let live = self
            .sink
            .live_after_pending(handle, self.facts.contains(handle));
        if live {
            self.sink.delete(handle)?;
        }
        Ok(live)
    }

    /// Returns a live fact.
    ///
    /// # Errors
    ///
    /// Returns an error for handles from another session or never issued
    /// here.
    pub fn get(&self, handle: FactHandle) -> Result<Option<&Fact>> {
        self.allocator.validate(handle)?;
        Ok(self.facts.get(handle).map(FactRecord::fact))
    }

    /// Returns a live fact as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error for handles from another session or never issued
    /// here.
    pub fn get_as<T: Any>(&self, handle: FactHandle) -> Result<Option<&T>> {
        self.allocator.validate(handle)?;
        Ok(self.facts.get(handle).and_then(FactRecord::downcast::<T>))
    }

    /// Returns true if the fact is live.
    #[must_use]
    pub fn contains(&self, handle: FactHandle) -> bool {
        self.facts.contains(handle)
    }

    /// Number of live facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Returns a sink for buffering changes from other threads.
    #[must_use]
    pub fn sink(&self) -> ActionSink {
        self.sink.clone()
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    /// Compiles a rule and attaches it to working memory. Facts already in
    /// memory are back-filled; every combination they form activates once
    /// on the next fire.
    ///
    /// # Errors
    ///
    /// Returns an error if a rule with the same name is deployed, the
    /// definition does not compile, or one of its conditions panics while
    /// back-filling. Memory is left as it was in every case.
    pub fn add_rule(&mut self, definition: &RuleDefinition) -> Result<RuleId> {
        if self.rules.iter().any(|r| **r.name() == *definition.name()) {
            return Err(Error::duplicate_rule(definition.name()));
        }
        let plan = RuleCompiler::plan(definition, &self.registry)?;
        let index = self.rules.len();
        let id = RuleId::new(
            u32::try_from(index).map_err(|_| Error::internal("too many rules"))?,
        );

        let previous = std::mem::replace(&mut self.state, SessionState::Deploying);
        let checkpoint = self.alpha.checkpoint();
        let mut observe = evaluation_observer(&self.events, self.config.evaluation_events);
        let mut target = DeployTarget {
            registry: &self.registry,
            alpha: &mut self.alpha,
            facts: &mut self.facts,
            min_capacity: self.config.min_index_capacity,
        };
        let deployed = catch_unwind(AssertUnwindSafe(|| {
            CompiledRule::deploy(plan, id, &mut target, &mut observe)
        }))
        .unwrap_or_else(|payload| {
            Err(Error::invalid_rule(
                definition.name(),
                format!("panicked during back-fill: {}", panic_message(payload.as_ref())),
            ))
        });
        self.state = previous;
        let (rule, backfilled) = match deployed {
            Ok(deployed) => deployed,
            Err(error) => {
                self.alpha.rollback(&checkpoint, &mut self.facts);
                return Err(error);
            }
        };

        for &address in rule.addresses() {
            self.subscriptions
                .get_or_insert_with(address, Vec::new)
                .push(index);
        }
        tracing::debug!(rule = %rule.name(), backfilled, "deployed rule");
        let name = Arc::clone(rule.name());
        self.rules.push(rule);
        self.events
            .publish_with(|| EngineEvent::RuleDeployed { rule: name, backfilled });
        Ok(id)
    }

    /// Deploys rules one by one. A rule that fails is published as
    /// [`EngineEvent::RuleSkipped`], reported to `handler`, and left out;
    /// the others are still deployed. Returns how many were deployed.
    pub fn add_rules<'a, I>(&mut self, definitions: I, handler: &dyn ExceptionHandler) -> usize
    where
        I: IntoIterator<Item = &'a RuleDefinition>,
    {
        let mut added = 0;
        for definition in definitions {
            match self.add_rule(definition) {
                Ok(_) => added += 1,
                Err(error) => {
                    tracing::warn!(rule = definition.name(), %error, "skipping rule");
                    self.events.publish_with(|| EngineEvent::RuleSkipped {
                        rule: Arc::from(definition.name()),
                        reason: error.to_string(),
                    });
                    handler.on_rule_error(definition.name(), &error);
                }
            }
        }
        added
    }

    fn rule_index(&self, name: &str) -> Result<usize> {
        self.rules
            .iter()
            .position(|r| &**r.name() == name)
            .ok_or_else(|| Error::invalid_rule(name, "not deployed in this session"))
    }

    /// Enables or disables a rule. A disabled rule keeps its memory but
    /// emits no activations or retractions; combinations formed while it
    /// was disabled are not replayed when it is enabled again.
    ///
    /// # Errors
    ///
    /// Returns an error if no rule has that name.
    pub fn set_rule_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let index = self.rule_index(name)?;
        self.rules[index].set_enabled(enabled);
        tracing::debug!(rule = name, enabled, "rule toggled");
        Ok(())
    }

    /// Returns the id of a deployed rule.
    #[must_use]
    pub fn rule_id(&self, name: &str) -> Option<RuleId> {
        self.rule_index(name).ok().map(|index| self.rules[index].id())
    }

    /// Names of the deployed rules, in deployment order.
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| &**r.name())
    }

    /// Subscribes to engine events.
    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.events.subscribe(listener);
    }

    // -------------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------------

    /// Activations scheduled but not yet reacted to, left behind by a
    /// reaction that failed.
    #[must_use]
    pub fn pending_activations(&self) -> usize {
        self.agenda.len()
    }

    /// Drops activations left behind by a failed reaction. Returns how
    /// many were dropped.
    pub fn clear_agenda(&mut self) -> usize {
        self.agenda.clear()
    }

    /// Applies buffered changes and runs reactions until nothing is left.
    ///
    /// # Errors
    ///
    /// A reaction error is returned unmodified; the activations after it
    /// stay scheduled for the next call. Changes that cannot be applied
    /// (unknown types under the strict policy, type conflicts) are dropped
    /// and reported. Exceeding `max_fire_cycles` returns a limit error
    /// with the remaining changes still buffered. In every case all
    /// memory scopes have been merged when this returns.
    pub fn fire(&mut self) -> Result<FireReport> {
        let mut report = FireReport::default();
        self.events.publish_with(|| EngineEvent::FireStarted {
            session: self.id,
            pending: self.sink.pending(),
        });
        self.state = SessionState::Firing;
        let result = self.run(&mut report);
        self.state = SessionState::Idle;

        tracing::debug!(
            session = self.id,
            cycles = report.cycles,
            activations = report.activations,
            retractions = report.retractions,
            ok = result.is_ok(),
            "fire finished"
        );
        self.events.publish_with(|| EngineEvent::FireCompleted {
            session: self.id,
            cycles: report.cycles,
            activations: report.activations,
            retractions: report.retractions,
        });
        result.map(|()| report)
    }

    fn run(&mut self, report: &mut FireReport) -> Result<()> {
        let mut fired = self.react()?;
        loop {
            let actions = self.sink.take();
            if actions.is_empty() && !self.rules.iter().any(CompiledRule::needs_cycle) {
                return Ok(());
            }
            if report.cycles >= self.config.max_fire_cycles {
                self.sink.restore(actions);
                fired.sort_unstable();
                fired.dedup();
                let context = (!fired.is_empty()).then(|| {
                    format!(
                        "still firing: {}",
                        fired.iter().map(|n| &**n).collect::<Vec<_>>().join(", ")
                    )
                });
                return Err(Error::limit_exceeded(SemanticLimit::MaxFireCycles {
                    limit: self.config.max_fire_cycles,
                    context,
                }));
            }
            report.cycles += 1;
            self.cycle(actions, report)?;
            fired = self.react()?;
        }
    }

    /// One fire cycle up to scheduling the agenda.
    fn cycle(&mut self, actions: Vec<Action>, report: &mut FireReport) -> Result<()> {
        let mut retractions = Vec::new();
        let mut failure = None;
        let mut queue = actions.into_iter();
        while let Some(action) = queue.next() {
            if let Err(error) = self.apply(action, &mut retractions, report) {
                tracing::warn!(%error, "dropping change that could not be applied");
                self.sink.restore(queue.collect());
                failure = Some(error);
                break;
            }
        }

        let mut observe = evaluation_observer(&self.events, self.config.evaluation_events);
        for rule in &mut self.rules {
            rule.propagate(&self.alpha, &mut observe);
        }
        let mut batch: Vec<(usize, Activation)> = Vec::new();
        for (order, rule) in self.rules.iter_mut().enumerate() {
            let mut found = Vec::new();
            rule.activate(&mut found, &mut retractions);
            batch.extend(found.into_iter().map(|a| (order, a)));
        }

        self.alpha.commit();
        for rule in &mut self.rules {
            rule.commit();
        }
        debug_assert!(!self.alpha.has_delta(), "alpha delta left after commit");
        debug_assert!(
            !self.rules.iter().any(CompiledRule::has_delta),
            "beta delta left after commit"
        );

        for retraction in &retractions {
            if let Some(handler) = self.rules[retraction.rule.index() as usize].on_retract() {
                handler(retraction);
            }
            self.events
                .publish_with(|| EngineEvent::Retraction(retraction.clone()));
        }
        for (_, activation) in &batch {
            self.events
                .publish_with(|| EngineEvent::Activation(activation.clone()));
        }
        report.retractions += retractions.len();
        report.activations += batch.len();
        self.agenda.schedule(batch);

        failure.map_or(Ok(()), Err)
    }

    /// Runs scheduled reactions in agenda order. Returns the names of the
    /// rules that reacted.
    fn react(&mut self) -> Result<Vec<Arc<str>>> {
        let mut fired = Vec::new();
        while let Some(activation) = self.agenda.pop() {
            let rule = &self.rules[activation.rule.index() as usize];
            if !rule.enabled() {
                continue;
            }
            let Some(reaction) = rule.reaction() else {
                continue;
            };
            let variables = Arc::clone(rule.variables());
            let mut context =
                ReactionContext::new(&activation, &variables, &self.facts, &self.sink);
            if let Err(error) = reaction(&mut context) {
                tracing::debug!(rule = %activation.rule_name, %error, "reaction failed");
                return Err(error);
            }
            fired.push(Arc::clone(&activation.rule_name));
        }
        Ok(fired)
    }

    // -------------------------------------------------------------------------
    // Applying actions
    // -------------------------------------------------------------------------

    fn apply(
        &mut self,
        action: Action,
        retractions: &mut Vec<Activation>,
        report: &mut FireReport,
    ) -> Result<()> {
        match action {
            Action::Insert {
                handle,
                target,
                fact,
            } => {
                let type_key = self.resolve(&target)?;
                let type_name = self.index(handle, type_key, fact)?;
                report.inserted += 1;
                self.events
                    .publish_with(|| EngineEvent::FactInserted { handle, type_name });
            }
            Action::Update { handle, fact } => {
                let Some(type_key) = self.facts.get(handle).map(FactRecord::type_key) else {
                    tracing::debug!(%handle, "update of a deleted fact ignored");
                    return Ok(());
                };
                checked_schema(&self.registry, type_key, handle, &fact)?;
                self.unindex(handle, type_key, retractions);
                let type_name = self.index(handle, type_key, fact)?;
                report.updated += 1;
                self.events
                    .publish_with(|| EngineEvent::FactUpdated { handle, type_name });
            }
            Action::Delete { handle } => {
                let Some(type_key) = self.facts.get(handle).map(FactRecord::type_key) else {
                    tracing::trace!(%handle, "delete of a deleted fact ignored");
                    return Ok(());
                };
                self.unindex(handle, type_key, retractions);
                report.deleted += 1;
                let type_name = self.type_name(type_key);
                self.events
                    .publish_with(|| EngineEvent::FactDeleted { handle, type_name });
            }
        }
        Ok(())
    }

    fn type_name(&self, type_key: TypeKey) -> Arc<str> {
        self.registry
            .get(type_key)
            .map_or_else(|| Arc::from("?"), |schema| schema.shared_name())
    }

    fn resolve(&mut self, target: &TypeTarget) -> Result<TypeKey> {
        let (found, name, id, rust_name) = match target {
            TypeTarget::Named {
                name,
                id,
                rust_name,
            } => (self.registry.resolve(name), &**name, *id, *rust_name),
            TypeTarget::Rust { id, name } => (self.registry.resolve_rust(*id), *name, *id, *name),
        };
        if let Some(key) = found {
            return Ok(key);
        }
        match self.config.unknown_types {
            UnknownTypePolicy::Fail => Err(Error::unknown_type(name)),
            UnknownTypePolicy::Warn => {
                tracing::warn!(type_name = name, "fact of undeclared type; declaring it without fields");
                self.registry.declare_raw(name, id, rust_name)
            }
        }
    }

    /// Stores a fact and feeds it to alpha memory and the rules reading
    /// the buckets it lands in.
    fn index(&mut self, handle: FactHandle, type_key: TypeKey, fact: Fact) -> Result<Arc<str>> {
        let schema = checked_schema(&self.registry, type_key, handle, &fact)?;
        let mut record = FactRecord::new(handle, schema, fact);
        let mut observe = evaluation_observer(&self.events, self.config.evaluation_events);
        let addresses = self.alpha.insert(
            &mut record,
            &mut |c: &AlphaCondition, values: &[Value], outcome: bool| {
                observe(c.name(), values, outcome);
            },
        );
        for address in addresses {
            if let Some(subscribers) = self.subscriptions.get(&address) {
                for &r in subscribers {
                    self.rules[r].insert_fact(address, handle, record.values());
                }
            }
        }
        self.facts.insert(record);
        Ok(schema.shared_name())
    }

    /// Removes a fact from every bucket and rule, retracting its live
    /// combinations.
    fn unindex(&mut self, handle: FactHandle, type_key: TypeKey, retractions: &mut Vec<Activation>) {
        for (address, _) in self.alpha.remove(type_key, handle) {
            if let Some(subscribers) = self.subscriptions.get(&address) {
                for &r in subscribers {
                    self.rules[r].remove_fact(address, handle, retractions);
                }
            }
        }
        self.facts.remove(handle);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Occupancy of every alpha bucket and beta node.
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            facts: self.facts.len(),
            alpha: self.alpha.stats(),
            rules: self
                .rules
                .iter()
                .map(|rule| {
                    let (network, aggregates) = rule.stats();
                    RuleStats {
                        name: Arc::clone(rule.name()),
                        enabled: rule.enabled(),
                        network,
                        aggregates,
                    }
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("facts", &self.facts.len())
            .field("rules", &self.rules.len())
            .field("agenda", &self.agenda.len())
            .finish_non_exhaustive()
    }
}
