//! Buffered working memory changes.
//!
//! Inserts, updates, and deletes are queued in an [`ActionSink`] and
//! applied in FIFO order when the session fires. A sink is cheap to clone
//! and can be handed to other threads; handles are allocated at submission
//! time so callers can refer to a fact before it is applied.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tessera_foundation::{FactHandle, Result};
use tessera_storage::{Fact, HandleAllocator};

/// How a buffered insert names its type.
#[derive(Debug, Clone)]
pub(crate) enum TypeTarget {
    /// By declared name. The Rust type is kept so an unknown name can
    /// still be declared on the fly.
    Named {
        name: Arc<str>,
        id: TypeId,
        rust_name: &'static str,
    },
    /// By the Rust type of the value.
    Rust {
        id: TypeId,
        name: &'static str,
    },
}

/// One buffered change.
#[derive(Clone)]
pub(crate) enum Action {
    Insert {
        handle: FactHandle,
        target: TypeTarget,
        fact: Fact,
    },
    Update {
        handle: FactHandle,
        fact: Fact,
    },
    Delete {
        handle: FactHandle,
    },
}

impl Action {
    pub(crate) fn handle(&self) -> FactHandle {
        match self {
            Self::Insert { handle, .. } | Self::Update { handle, .. } | Self::Delete { handle } => {
                *handle
            }
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert { handle, target, .. } => f
                .debug_struct("Insert")
                .field("handle", handle)
                .field("target", target)
                .finish_non_exhaustive(),
            Self::Update { handle, .. } => f
                .debug_struct("Update")
                .field("handle", handle)
                .finish_non_exhaustive(),
            Self::Delete { handle } => f.debug_struct("Delete").field("handle", handle).finish(),
        }
    }
}

/// A thread-safe queue of working memory changes for one session.
#[derive(Clone)]
pub struct ActionSink {
    allocator: Arc<HandleAllocator>,
    queue: Arc<Mutex<VecDeque<Action>>>,
}

impl ActionSink {
    pub(crate) fn new(allocator: Arc<HandleAllocator>) -> Self {
        Self {
            allocator,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Action>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session this sink feeds.
    #[must_use]
    pub fn session(&self) -> u32 {
        self.allocator.session()
    }

    /// Number of buffered changes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Buffers an insert typed by the value's Rust type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> FactHandle {
        self.submit_insert(
            TypeTarget::Rust {
                id: TypeId::of::<T>(),
                name: std::any::type_name::<T>(),
            },
            Arc::new(value),
        )
    }

    /// Buffers an insert under a declared type name.
    pub fn insert_as<T: Any + Send + Sync>(&self, type_name: &str, value: T) -> FactHandle {
        self.submit_insert(
            TypeTarget::Named {
                name: Arc::from(type_name),
                id: TypeId::of::<T>(),
                rust_name: std::any::type_name::<T>(),
            },
            Arc::new(value),
        )
    }

    pub(crate) fn submit_insert(&self, target: TypeTarget, fact: Fact) -> FactHandle {
        let handle = self.allocator.allocate();
        self.push(Action::Insert {
            handle,
            target,
            fact,
        });
        handle
    }

    /// Buffers a replacement of a fact's value. The handle is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle was never issued by this session.
    pub fn update<T: Any + Send + Sync>(&self, handle: FactHandle, value: T) -> Result<()> {
        self.allocator.validate(handle)?;
        self.push(Action::Update {
            handle,
            fact: Arc::new(value),
        });
        Ok(())
    }

    /// Buffers a delete. Deleting a fact that is already gone is a no-op
    /// when applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle was never issued by this session.
    pub fn delete(&self, handle: FactHandle) -> Result<()> {
        self.allocator.validate(handle)?;
        self.push(Action::Delete { handle });
        Ok(())
    }

    pub(crate) fn push(&self, action: Action) {
        self.queue().push_back(action);
    }

    /// Whether `handle` is live once the buffered changes are applied,
    /// given whether it is live now.
    pub(crate) fn live_after_pending(&self, handle: FactHandle, live: bool) -> bool {
        self.queue()
            .iter()
            .filter(|action| action.handle() == handle)
            .fold(live, |live, action| match action {
                Action::Insert { .. } => true,
                Action::Update { .. } => live,
                Action::Delete { .. } => false,
            })
    }

    /// Removes every buffered change, oldest first.
    pub(crate) fn take(&self) -> Vec<Action> {
        self.queue().drain(..).collect()
    }

    /// Puts changes back at the head of the queue.
    pub(crate) fn restore(&self, actions: Vec<Action>) {
        let mut queue = self.queue();
        for action in actions.into_iter().rev() {
            queue.push_front(action);
        }
    }
}

impl std::fmt::Debug for ActionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSink")
            .field("session", &self.session())
            .field("pending", &self.pending())
            .finish()
    }
}
