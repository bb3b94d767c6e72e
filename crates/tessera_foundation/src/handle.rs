//! Session-scoped fact handles.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque identifier for a fact inside one session.
///
/// Handles are allocated monotonically and never reused within a session,
/// so a handle that outlives its fact stays dead rather than aliasing a
/// newer fact. The `session` field lets the engine reject handles minted by
/// a different session.
///
/// # Layout
/// - `session`: 32-bit id of the session that allocated the handle
/// - `index`: 64-bit allocation counter within that session
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactHandle {
    /// Session that allocated this handle.
    pub session: u32,
    /// Allocation index within the session.
    pub index: u64,
}

impl FactHandle {
    /// Creates a new handle.
    #[must_use]
    pub const fn new(session: u32, index: u64) -> Self {
        Self { session, index }
    }

    /// Returns a sentinel value representing "no fact".
    #[must_use]
    pub const fn null() -> Self {
        Self {
            session: 0,
            index: u64::MAX,
        }
    }

    /// Returns true if this is the null sentinel value.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.index == u64::MAX
    }
}

impl fmt::Debug for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "FactHandle(null)")
        } else {
            write!(f, "FactHandle({}@{})", self.index, self.session)
        }
    }
}

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Fact(null)")
        } else {
            write!(f, "Fact({})", self.index)
        }
    }
}
