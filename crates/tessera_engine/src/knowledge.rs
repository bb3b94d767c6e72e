//! Shared declarations from which sessions are forked.
//!
//! A [`Knowledge`] base holds type declarations and rule definitions behind
//! a lock. [`Knowledge::new_session`] takes an O(1) snapshot of both, so
//! declarations made afterwards never reach sessions already running.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_foundation::{Error, Result, Type, Value};
use tessera_storage::{FieldKey, TypeKey, TypeRegistry};

use crate::config::Configuration;
use crate::rule::{RuleCompiler, RuleDefinition};
use crate::session::Session;

/// Receives rules rejected by [`Knowledge::add_rules`].
pub trait ExceptionHandler {
    /// Called once per rejected rule.
    fn on_rule_error(&self, rule: &str, error: &Error);
}

impl<F> ExceptionHandler for F
where
    F: Fn(&str, &Error),
{
    fn on_rule_error(&self, rule: &str, error: &Error) {
        self(rule, error);
    }
}

#[derive(Debug, Clone)]
struct KnowledgeState {
    registry: TypeRegistry,
    rules: im::Vector<RuleDefinition>,
}

/// A knowledge base shared between threads and sessions.
///
/// Cloning shares the same underlying state.
#[derive(Debug, Clone)]
pub struct Knowledge {
    config: Configuration,
    state: Arc<RwLock<KnowledgeState>>,
}

impl Default for Knowledge {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl Knowledge {
    /// Creates an empty knowledge base.
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(KnowledgeState {
                registry: TypeRegistry::new(),
                rules: im::Vector::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, KnowledgeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, KnowledgeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration copied into every session.
    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Declares a fact type backed by `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is declared for a different Rust type.
    pub fn declare_type<T: Any + Send + Sync>(&self, name: &str) -> Result<TypeKey> {
        self.write().registry.declare::<T>(name)
    }

    /// Registers a field on a declared type.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or not backed by `T`.
    pub fn register_field<T, F>(
        &self,
        type_name: &str,
        field: &str,
        ty: Type,
        extract: F,
    ) -> Result<FieldKey>
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let mut state = self.write();
        let type_key = state.registry.require(type_name)?.key();
        state.registry.register_field::<T, F>(type_key, field, ty, extract)
    }

    /// Snapshot of the current type declarations.
    #[must_use]
    pub fn registry(&self) -> TypeRegistry {
        self.read().registry.clone()
    }

    /// Validates a rule and stores it for future sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if a rule with the same name exists or the rule
    /// does not compile against the declared types.
    pub fn add_rule(&self, definition: RuleDefinition) -> Result<()> {
        let mut state = self.write();
        if state.rules.iter().any(|r| r.name() == definition.name()) {
            return Err(Error::duplicate_rule(definition.name()));
        }
        RuleCompiler::validate(&definition, &state.registry)?;
        tracing::debug!(rule = definition.name(), "rule added to knowledge base");
        state.rules.push_back(definition);
        Ok(())
    }

    /// Adds rules one by one. A rule that fails is reported to `handler`
    /// and skipped; the others are still added. Returns how many were
    /// added.
    pub fn add_rules<I>(&self, definitions: I, handler: &dyn ExceptionHandler) -> usize
    where
        I: IntoIterator<Item = RuleDefinition>,
    {
        let mut added = 0;
        for definition in definitions {
            let name = definition.name().to_owned();
            match self.add_rule(definition) {
                Ok(()) => added += 1,
                Err(error) => {
                    tracing::warn!(rule = %name, %error, "skipping rule");
                    handler.on_rule_error(&name, &error);
                }
            }
        }
        added
    }

    /// Number of stored rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.read().rules.len()
    }

    /// Names of the stored rules, in the order they were added.
    #[must_use]
    pub fn rule_names(&self) -> Vec<String> {
        self.read().rules.iter().map(|r| r.name().to_owned()).collect()
    }

    /// Forks a session from a snapshot of the current declarations and
    /// deploys every stored rule into it.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored rule fails to deploy.
    pub fn new_session(&self) -> Result<Session> {
        let snapshot = self.read().clone();
        let mut session = Session::with_registry(self.config.clone(), snapshot.registry);
        for definition in &snapshot.rules {
            session.add_rule(definition)?;
        }
        tracing::debug!(
            session = session.id(),
            rules = snapshot.rules.len(),
            "forked session"
        );
        Ok(session)
    }
}
