//! Fact type declarations.
//!
//! A fact type pairs a name with the Rust type of its objects and an ordered
//! list of fields. Each field reads one [`Value`] out of a fact through a
//! [`FieldExtractor`]. The registry is built on persistent collections so
//! sessions can snapshot it in O(1).

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use tessera_foundation::{Error, FieldExtractor, Result, Type, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies a declared fact type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TypeKey(u32);

impl TypeKey {
    /// Creates a key from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies one field of a declared type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldKey {
    /// The owning type.
    pub type_key: TypeKey,
    /// Position of the field within the type.
    pub index: u32,
}

impl FieldKey {
    /// Returns the field position as an index.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.index as usize
    }
}

/// A declared field: name, expected type, and extractor.
#[derive(Clone)]
pub struct FieldSchema {
    name: Arc<str>,
    ty: Type,
    extractor: Arc<dyn FieldExtractor>,
}

impl FieldSchema {
    /// Creates a field schema.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, ty: Type, extractor: Arc<dyn FieldExtractor>) -> Self {
        Self {
            name: name.into(),
            ty,
            extractor,
        }
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Reads the field from a fact.
    ///
    /// A value that the declared type does not accept is logged and
    /// replaced by `Nil`.
    #[must_use]
    pub fn extract(&self, fact: &(dyn Any + Send + Sync)) -> Value {
        let value = self.extractor.extract(fact);
        if self.ty.accepts(&value.value_type()) {
            value
        } else {
            tracing::warn!(
                field = %self.name,
                expected = %self.ty,
                actual = %value.value_type(),
                "field extractor returned a value of the wrong type"
            );
            Value::Nil
        }
    }
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// A declared fact type.
#[derive(Clone, Debug)]
pub struct TypeSchema {
    key: TypeKey,
    name: Arc<str>,
    rust_type: TypeId,
    rust_name: &'static str,
    fields: im::Vector<FieldSchema>,
    field_index: im::HashMap<Arc<str>, u32>,
}

impl TypeSchema {
    /// The type's key.
    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The logical type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the logical type name.
    #[must_use]
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Identity of the Rust type backing this fact type.
    #[must_use]
    pub fn rust_type(&self) -> TypeId {
        self.rust_type
    }

    /// Name of the Rust type backing this fact type.
    #[must_use]
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    /// Number of declared fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns the field at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldSchema> {
        self.fields.get(index)
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field_key(&self, name: &str) -> Option<FieldKey> {
        self.field_index.get(name).map(|&index| FieldKey {
            type_key: self.key,
            index,
        })
    }

    /// Iterates declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter()
    }

    /// Extracts every field of `fact`.
    #[must_use]
    pub fn extract_all(&self, fact: &(dyn Any + Send + Sync)) -> Vec<Value> {
        self.fields.iter().map(|f| f.extract(fact)).collect()
    }

    /// Extends `values` with the fields it does not cover yet.
    pub fn extract_missing(&self, fact: &(dyn Any + Send + Sync), values: &mut Vec<Value>) {
        for field in self.fields.iter().skip(values.len()) {
            values.push(field.extract(fact));
        }
    }
}

/// Registry of declared fact types.
///
/// Clone is O(1) due to structural sharing.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: im::Vector<TypeSchema>,
    by_name: im::HashMap<Arc<str>, TypeKey>,
    by_rust: im::HashMap<TypeId, TypeKey>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Declares a fact type backed by the Rust type `T`.
    ///
    /// Declaring the same name for the same Rust type again returns the
    /// existing key. The first type declared for a Rust type becomes its
    /// default, used when facts are inserted without a type name.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is already declared for a different
    /// Rust type.
    pub fn declare<T: Any + Send + Sync>(&mut self, name: &str) -> Result<TypeKey> {
        self.declare_raw(name, TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Declares a fact type from an explicit Rust type identity.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is already declared for a different
    /// Rust type.
    pub fn declare_raw(
        &mut self,
        name: &str,
        rust_type: TypeId,
        rust_name: &'static str,
    ) -> Result<TypeKey> {
        if let Some(&key) = self.by_name.get(name) {
            let existing = &self.types[key.index()];
            if existing.rust_type == rust_type {
                return Ok(key);
            }
            return Err(Error::type_conflict(
                name,
                format!(
                    "already declared for {}, not {rust_name}",
                    existing.rust_name
                ),
            ));
        }

        let index = u32::try_from(self.types.len())
            .map_err(|_| Error::internal("too many declared types"))?;
        let key = TypeKey::new(index);
        let name: Arc<str> = Arc::from(name);
        self.types.push_back(TypeSchema {
            key,
            name: Arc::clone(&name),
            rust_type,
            rust_name,
            fields: im::Vector::new(),
            field_index: im::HashMap::new(),
        });
        self.by_name.insert(name, key);
        self.by_rust.entry(rust_type).or_insert(key);
        tracing::debug!(type_name = %self.types[key.index()].name, "declared fact type");
        Ok(key)
    }

    /// Registers a typed field on a declared type.
    ///
    /// Registration is idempotent by name: an existing field keeps its
    /// extractor and its key is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or backed by a Rust type
    /// other than `T`.
    pub fn register_field<T, F>(
        &mut self,
        type_key: TypeKey,
        name: &str,
        ty: Type,
        extract: F,
    ) -> Result<FieldKey>
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let schema = self.get(type_key).ok_or_else(|| {
            Error::unknown_type(format!("#{}", type_key.index()))
        })?;
        if schema.rust_type != TypeId::of::<T>() {
            return Err(Error::type_conflict(
                schema.name(),
                format!(
                    "field {name} reads {}, but the type holds {}",
                    std::any::type_name::<T>(),
                    schema.rust_name
                ),
            ));
        }
        let extractor = move |fact: &(dyn Any + Send + Sync)| {
            fact.downcast_ref::<T>().map_or(Value::Nil, &extract)
        };
        self.register_extractor(type_key, name, ty, Arc::new(extractor))
    }

    /// Registers a field with an untyped extractor.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown.
    pub fn register_extractor(
        &mut self,
        type_key: TypeKey,
        name: &str,
        ty: Type,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Result<FieldKey> {
        let schema = self
            .types
            .get_mut(type_key.index())
            .ok_or_else(|| Error::unknown_type(format!("#{}", type_key.index())))?;
        if let Some(key) = schema.field_key(name) {
            return Ok(key);
        }
        let index = u32::try_from(schema.fields.len())
            .map_err(|_| Error::internal("too many declared fields"))?;
        let name: Arc<str> = Arc::from(name);
        schema
            .fields
            .push_back(FieldSchema::new(Arc::clone(&name), ty, extractor));
        schema.field_index.insert(name, index);
        Ok(FieldKey { type_key, index })
    }

    /// Returns the schema for a key.
    #[must_use]
    pub fn get(&self, key: TypeKey) -> Option<&TypeSchema> {
        self.types.get(key.index())
    }

    /// Resolves a type by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<TypeKey> {
        self.by_name.get(name).copied()
    }

    /// Resolves the default type for a Rust type.
    #[must_use]
    pub fn resolve_rust(&self, rust_type: TypeId) -> Option<TypeKey> {
        self.by_rust.get(&rust_type).copied()
    }

    /// Resolves a type by name, failing if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if no type has this name.
    pub fn require(&self, name: &str) -> Result<&TypeSchema> {
        self.resolve(name)
            .and_then(|key| self.get(key))
            .ok_or_else(|| Error::unknown_type(name))
    }

    /// Resolves `type_name.field_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the type or the field is unknown.
    pub fn field(&self, type_name: &str, field_name: &str) -> Result<FieldKey> {
        self.require(type_name)?
            .field_key(field_name)
            .ok_or_else(|| Error::unknown_field(type_name, field_name))
    }

    /// Iterates declared types in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.iter()
    }
}
