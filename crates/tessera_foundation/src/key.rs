//! Key tuples and memory scopes.
//!
//! A [`KeyTuple`] is the ordered projection of the field values a rule reads
//! from one fact. Facts that project to equal tuples share a key row in
//! keyed store mode.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One of the two logical partitions of every incremental memory.
///
/// `Main` holds state already propagated through the network. `Delta` holds
/// state added in the current evaluation cycle and is merged into `Main` at
/// the end of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemoryScope {
    /// Already-propagated state.
    Main,
    /// State added this cycle.
    Delta,
}

impl MemoryScope {
    /// Both scopes, `Main` first.
    pub const ALL: [MemoryScope; 2] = [MemoryScope::Main, MemoryScope::Delta];

    /// Returns true for `Delta`.
    #[must_use]
    pub const fn is_delta(self) -> bool {
        matches!(self, Self::Delta)
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Delta => write!(f, "delta"),
        }
    }
}

/// Immutable tuple of field values with a cached hash.
///
/// Cloning is O(1). Equality compares values positionally.
#[derive(Clone)]
pub struct KeyTuple {
    values: Arc<[Value]>,
    hash: u64,
}

impl KeyTuple {
    /// Creates a tuple from values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        let mut hasher = DefaultHasher::new();
        values.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            values: values.into(),
        }
    }

    /// Returns the empty tuple.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the tuple holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns all values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the cached hash.
    #[must_use]
    pub const fn cached_hash(&self) -> u64 {
        self.hash
    }

    /// Builds a new tuple from the values at `indices`.
    ///
    /// Indices past the end project to `Nil`.
    #[must_use]
    pub fn project(&self, indices: &[usize]) -> Self {
        Self::new(
            indices
                .iter()
                .map(|&i| self.values.get(i).cloned().unwrap_or(Value::Nil))
                .collect(),
        )
    }

    /// Concatenates several tuples into one.
    #[must_use]
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a KeyTuple>) -> Self {
        Self::new(
            parts
                .into_iter()
                .flat_map(|k| k.values.iter().cloned())
                .collect(),
        )
    }
}

impl PartialEq for KeyTuple {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.values == other.values
    }
}

impl Eq for KeyTuple {}

impl Hash for KeyTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.values.iter()).finish()
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for KeyTuple {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for KeyTuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
