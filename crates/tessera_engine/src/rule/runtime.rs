//! A deployed rule: its network, its aggregates, and the per-cycle steps
//! a session drives.

use std::sync::Arc;

use tessera_foundation::{Error, FactHandle, IndexedSet, KeyTuple, MemoryScope, Result, Value};
use tessera_storage::{AlphaAddress, AlphaCondition, AlphaMemory, FactStore, TypeRegistry};

use super::compiler::{NetworkPlan, RulePlan};
use super::{Reaction, RetractionHandler, RuleId};
use crate::activation::Activation;
use crate::aggregate::{AggregateNode, When, for_each_main_containing_where};
use crate::beta::{EntryId, Expansion, Network, NetworkStats, Observer, PositionSpec, Row, StoreMode, Tuple};

/// Working memory a rule is deployed into.
pub(crate) struct DeployTarget<'a> {
    pub registry: &'a TypeRegistry,
    pub alpha: &'a mut AlphaMemory,
    pub facts: &'a mut FactStore,
    pub min_capacity: usize,
}

impl DeployTarget<'_> {
    /// Registers the alpha conditions of every position and returns the
    /// bucket each position reads from.
    fn addresses(
        &mut self,
        plan: &NetworkPlan,
        observer: &mut Observer<'_>,
    ) -> Result<Vec<AlphaAddress>> {
        let mut addresses = Vec::with_capacity(plan.positions.len());
        for position in &plan.positions {
            let schema = self.registry.get(position.type_key).ok_or_else(|| {
                Error::internal(format!("type #{} vanished", position.type_key.index()))
            })?;
            let ids: Vec<_> = position
                .alpha
                .iter()
                .map(|a| {
                    self.alpha.register_condition(
                        position.type_key,
                        a.fields.clone(),
                        Arc::clone(&a.predicate),
                        Arc::clone(&a.name),
                    )
                })
                .collect();
            let (address, _) = self.alpha.address_for(
                schema,
                &ids,
                self.facts,
                &mut |c: &AlphaCondition, values: &[Value], outcome: bool| {
                    observer(c.name(), values, outcome);
                },
            );
            addresses.push(address);
        }
        Ok(addresses)
    }

    /// Builds a network over existing buckets and back-fills every
    /// position from its bucket's `Main` members.
    fn network(
        &mut self,
        plan: &NetworkPlan,
        mode: StoreMode,
        observer: &mut Observer<'_>,
    ) -> Result<(Network, usize)> {
        let addresses = self.addresses(plan, observer)?;
        let specs = plan
            .positions
            .iter()
            .zip(&addresses)
            .map(|(p, &address)| PositionSpec {
                address,
                key_fields: p.key_fields.clone(),
            })
            .collect();
        let mut network = Network::build(
            mode,
            specs,
            &plan.conditions,
            &plan.groups,
            self.min_capacity,
        );

        let mut backfilled = 0;
        for (p, &address) in addresses.iter().enumerate() {
            let Some(bucket) = self.alpha.bucket(address) else {
                continue;
            };
            let Some(schema) = self.registry.get(address.type_key) else {
                continue;
            };
            let members: Vec<FactHandle> = bucket.scope(MemoryScope::Main).iter().copied().collect();
            for handle in members {
                if let Some(record) = self.facts.get_mut(handle) {
                    record.refresh(schema);
                    network.insert_fact(p, handle, record.values(), MemoryScope::Main);
                    backfilled += 1;
                }
            }
        }
        Ok((network, backfilled))
    }
}

/// A rule attached to a session.
pub(crate) struct CompiledRule {
    id: RuleId,
    name: Arc<str>,
    salience: i32,
    enabled: bool,
    variables: Arc<[Arc<str>]>,
    network: Network,
    aggregates: Vec<AggregateNode>,
    /// Aggregate indices attached to each component.
    by_component: Vec<Vec<usize>>,
    addresses: Vec<AlphaAddress>,
    reaction: Option<Reaction>,
    on_retract: Option<RetractionHandler>,
    /// Deployed over existing facts and not fired yet: every live
    /// combination is still owed an activation.
    unfired: bool,
}

impl CompiledRule {
    /// Attaches a planned rule to working memory. Returns the rule and the
    /// number of existing facts it picked up.
    pub(crate) fn deploy(
        plan: RulePlan,
        id: RuleId,
        target: &mut DeployTarget<'_>,
        observer: &mut Observer<'_>,
    ) -> Result<(Self, usize)> {
        let (mut network, mut backfilled) = target.network(&plan.network, plan.mode, observer)?;
        let mut addresses: Vec<AlphaAddress> = (0..network.position_count())
            .map(|p| network.entry(p).address())
            .collect();

        let mut aggregates = Vec::with_capacity(plan.aggregates.len());
        let mut by_component = vec![Vec::new(); network.component_count()];
        for aggregate in &plan.aggregates {
            let component = aggregate
                .parent_key
                .first()
                .map_or(0, |&(p, _)| network.component_of(p));
            let node = if aggregate.loose {
                let nested = target.addresses(&aggregate.network, observer)?;
                addresses.extend(nested.iter().copied());
                AggregateNode::loose(aggregate.kind, nested, target.alpha)
            } else {
                let (nested, count) = target.network(&aggregate.network, plan.mode, observer)?;
                backfilled += count;
                addresses.extend((0..nested.position_count()).map(|p| nested.entry(p).address()));
                let root = network.root(component);
                let parent_key = aggregate
                    .parent_key
                    .iter()
                    .map(|&(p, field)| (root.index_of(p).unwrap_or(usize::MAX), key_slot(&network, p, field)))
                    .collect();
                let nested_key = aggregate
                    .nested_key
                    .iter()
                    .map(|&(q, field)| (q, key_slot(&nested, q, field)))
                    .collect();
                let mut node = AggregateNode::joined(
                    aggregate.kind,
                    parent_key,
                    nested,
                    nested_key,
                    target.min_capacity,
                );
                node.bootstrap(observer);
                node
            };
            by_component[component].push(aggregates.len());
            aggregates.push(node);
        }

        for (component, id, tuple) in network.bootstrap(observer) {
            for &a in &by_component[component] {
                let node: &mut AggregateNode = &mut aggregates[a];
                node.track_parent(id, &tuple);
            }
        }
        addresses.sort_unstable();
        addresses.dedup();

        let rule = Self {
            id,
            name: plan.name,
            salience: plan.salience,
            enabled: plan.enabled,
            variables: plan.variables,
            network,
            aggregates,
            by_component,
            addresses,
            reaction: plan.reaction,
            on_retract: plan.on_retract,
            unfired: true,
        };
        Ok((rule, backfilled))
    }

    pub(crate) fn id(&self) -> RuleId {
        self.id
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn variables(&self) -> &Arc<[Arc<str>]> {
        &self.variables
    }

    pub(crate) fn reaction(&self) -> Option<&Reaction> {
        self.reaction.as_ref()
    }

    pub(crate) fn on_retract(&self) -> Option<&RetractionHandler> {
        self.on_retract.as_ref()
    }

    /// Alpha buckets this rule reads, including nested groups.
    pub(crate) fn addresses(&self) -> &[AlphaAddress] {
        &self.addresses
    }

    /// The rule owes activations even without new facts.
    pub(crate) fn needs_cycle(&self) -> bool {
        self.unfired
    }

    fn emits_retractions(&self) -> bool {
        self.enabled && !self.unfired
    }

    fn admits(&self, component: usize, tuple: &[Row], when: When) -> bool {
        self.by_component
            .get(component)
            .is_none_or(|list| list.iter().all(|&a| self.aggregates[a].admits(tuple, when)))
    }

    fn activation(&self, rows: &[Row], facts: &[FactHandle]) -> Activation {
        Activation {
            rule: self.id,
            rule_name: Arc::clone(&self.name),
            salience: self.salience,
            key: KeyTuple::concat(rows.iter().map(|row| &**row)),
            facts: facts.to_vec(),
        }
    }

    // -------------------------------------------------------------------------
    // Cycle steps
    // -------------------------------------------------------------------------

    pub(crate) fn insert_fact(&mut self, address: AlphaAddress, handle: FactHandle, values: &[Value]) {
        let positions: Vec<usize> = self.network.positions_at(address).collect();
        for p in positions {
            self.network.insert_fact(p, handle, values, MemoryScope::Delta);
        }
        for aggregate in &mut self.aggregates {
            aggregate.insert_fact(address, handle, values, MemoryScope::Delta);
        }
    }

    /// Removes a fact, retracting every live combination it was part of.
    pub(crate) fn remove_fact(
        &mut self,
        address: AlphaAddress,
        handle: FactHandle,
        retractions: &mut Vec<Activation>,
    ) {
        let positions: Vec<usize> = self.network.positions_at(address).collect();
        if self.emits_retractions() {
            let mut excluded: Vec<(usize, FactHandle)> = Vec::with_capacity(positions.len());
            for &p in &positions {
                for_each_main_containing_where(
                    &self.network,
                    p,
                    handle,
                    &excluded,
                    &|c, tuple| self.admits(c, tuple, When::Before),
                    &mut |rows, facts| retractions.push(self.activation(rows, facts)),
                );
                excluded.push((p, handle));
            }
        }
        for p in positions {
            let (_, dropped) = self.network.remove_fact(p, handle);
            for (component, id, tuple) in dropped {
                for &a in &self.by_component[component] {
                    self.aggregates[a].forget_parent(id, &tuple);
                }
            }
        }
        for aggregate in &mut self.aggregates {
            aggregate.remove_fact(address, handle);
        }
    }

    /// Joins this cycle's new rows and updates aggregate counts.
    pub(crate) fn propagate(&mut self, alpha: &AlphaMemory, observer: &mut Observer<'_>) {
        for (component, id, tuple) in self.network.compute(observer) {
            for &a in &self.by_component[component] {
                self.aggregates[a].track_parent(id, &tuple);
            }
        }
        for aggregate in &mut self.aggregates {
            aggregate.propagate(alpha, observer);
        }
    }

    /// Emits this cycle's retractions caused by aggregate flips, then its
    /// new activations.
    pub(crate) fn activate(
        &mut self,
        activations: &mut Vec<Activation>,
        retractions: &mut Vec<Activation>,
    ) {
        let unfired = std::mem::take(&mut self.unfired);
        if !self.enabled {
            return;
        }
        if !unfired && !self.has_delta() {
            return;
        }

        let components = self.network.component_count();
        let mut enabled: Vec<IndexedSet<EntryId>> =
            (0..components).map(|_| IndexedSet::new()).collect();
        if !unfired {
            let mut disabled: Vec<Vec<(EntryId, Tuple)>> = vec![Vec::new(); components];
            for c in 0..components {
                for (id, tuple) in self.flip_candidates(c) {
                    let before = self.admits(c, &tuple, When::Before);
                    let after = self.admits(c, &tuple, When::After);
                    if before && !after {
                        disabled[c].push((id, tuple));
                    } else if !before && after {
                        enabled[c].insert(id);
                    }
                }
            }
            self.retract_disabled(&disabled, retractions);
        }

        let admit = |c: usize, tuple: &Tuple| self.admits(c, tuple, When::After);
        if let Some(groups) = self.network.new_groups(&enabled, unfired, &admit) {
            self.network.for_each_new(&groups, &mut |rows, facts| {
                activations.push(self.activation(rows, facts));
            });
        }
    }

    /// `Main` root entries of a component whose aggregates may have
    /// changed their verdict this cycle.
    fn flip_candidates(&self, component: usize) -> Vec<(EntryId, Tuple)> {
        let Some(attached) = self.by_component.get(component) else {
            return Vec::new();
        };
        let mut ids: IndexedSet<EntryId> = IndexedSet::new();
        let mut everything = false;
        for &a in attached {
            match self.aggregates[a].flip_candidates() {
                Some(found) => ids.extend(found),
                None => everything = true,
            }
        }
        let main = self.network.root(component).entries(MemoryScope::Main);
        if everything {
            return main.iter().map(|(&id, t)| (id, Arc::clone(t))).collect();
        }
        ids.iter()
            .filter_map(|id| main.get(id).map(|t| (*id, Arc::clone(t))))
            .collect()
    }

    fn retract_disabled(&self, disabled: &[Vec<(EntryId, Tuple)>], retractions: &mut Vec<Activation>) {
        let components = disabled.len();
        let mut done: Vec<IndexedSet<EntryId>> = (0..components).map(|_| IndexedSet::new()).collect();
        for (c, entries) in disabled.iter().enumerate() {
            for (id, tuple) in entries {
                let lists: Vec<Vec<Tuple>> = (0..components)
                    .map(|d| {
                        if d == c {
                            vec![Arc::clone(tuple)]
                        } else {
                            let skip = &done[d];
                            self.network.admitted(d, &|eid, t| {
                                !skip.contains(eid) && self.admits(d, t, When::Before)
                            })
                        }
                    })
                    .collect();
                self.network
                    .for_each_existing(&lists, Expansion::default(), &mut |rows, facts| {
                        retractions.push(self.activation(rows, facts));
                    });
                done[c].insert(*id);
            }
        }
    }

    pub(crate) fn has_delta(&self) -> bool {
        self.network.has_delta() || self.aggregates.iter().any(AggregateNode::has_delta)
    }

    pub(crate) fn commit(&mut self) {
        self.network.commit();
        for aggregate in &mut self.aggregates {
            aggregate.commit();
        }
    }

    pub(crate) fn stats(&self) -> (NetworkStats, Vec<NetworkStats>) {
        (
            self.network.stats(),
            self.aggregates.iter().filter_map(AggregateNode::stats).collect(),
        )
    }
}

fn key_slot(network: &Network, position: usize, field: usize) -> usize {
    network
        .entry(position)
        .key_fields()
        .binary_search(&field)
        .unwrap_or(usize::MAX)
}

impl std::fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("enabled", &self.enabled)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}
