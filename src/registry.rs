//! Type registry: maps type hints to field factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::converter::Converter;
use crate::error::ConversionError;
use crate::fields::{Field, FieldKind, SchemaField};
use crate::hint::{builtin, TypeHint};
use crate::options::FieldOptions;
use crate::schema::{Schema, SchemeRef};

type BuildFn =
    dyn Fn(&Converter, &[TypeHint], FieldOptions) -> Result<SchemaField, ConversionError> + Send + Sync;

/// Constructs a field for a type hint.
///
/// Receives the converter doing the conversion, the hint's type arguments
/// and the accumulated field options.
#[derive(Clone)]
pub struct FieldFactory {
    label: String,
    build: Arc<BuildFn>,
    scheme: Option<SchemeRef>,
}

impl FieldFactory {
    pub fn new<F>(label: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Converter, &[TypeHint], FieldOptions) -> Result<SchemaField, ConversionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            label: label.into(),
            build: Arc::new(build),
            scheme: None,
        }
    }

    /// Factory instantiating `kind` with the passed options.
    pub fn for_kind(kind: FieldKind) -> Self {
        let label = format!("{}FieldFactory", kind.name());
        Self::new(label, move |_, _, options| {
            Ok(SchemaField::from(Field::new(kind.clone(), options)))
        })
    }

    /// Factory producing a nested field for `scheme`.
    pub fn for_scheme(scheme: SchemeRef) -> Self {
        let label = format!("{}FieldFactory", scheme.name());
        let nested = scheme.clone();
        let mut factory = Self::new(label, move |converter, _, options| {
            Ok(SchemaField::from(Field::nested(
                nested.clone(),
                converter.registry().clone(),
                options,
            )))
        });
        factory.scheme = Some(scheme);
        factory
    }

    pub fn build(
        &self,
        converter: &Converter,
        subtypes: &[TypeHint],
        options: FieldOptions,
    ) -> Result<SchemaField, ConversionError> {
        (self.build)(converter, subtypes, options)
    }

    /// Whether this factory produces nested-schema fields.
    pub fn is_scheme(&self) -> bool {
        self.scheme.is_some()
    }

    pub fn scheme(&self) -> Option<&SchemeRef> {
        self.scheme.as_ref()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether both handles refer to the same registered factory.
    pub fn ptr_eq(&self, other: &FieldFactory) -> bool {
        Arc::ptr_eq(&self.build, &other.build)
    }
}

impl fmt::Debug for FieldFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldFactory")
            .field("label", &self.label)
            .field("is_scheme", &self.is_scheme())
            .finish()
    }
}

fn list_factory(
    converter: &Converter,
    subtypes: &[TypeHint],
    options: FieldOptions,
) -> Result<SchemaField, ConversionError> {
    let container = match subtypes.first() {
        Some(item) => converter.convert(item, FieldOptions::new())?,
        None => SchemaField::from(Field::new(FieldKind::Raw, FieldOptions::new())),
    };
    Ok(SchemaField::from(Field::list(container, options)))
}

/// Default registrations for builtin types.
pub fn default_factories() -> Vec<(TypeHint, FieldFactory)> {
    let kinds = [
        (builtin::BOOL, FieldKind::Boolean),
        (builtin::DATE, FieldKind::Date),
        (builtin::DATETIME, FieldKind::DateTime),
        (builtin::DECIMAL, FieldKind::Decimal),
        (builtin::FLOAT, FieldKind::Float),
        (builtin::INT, FieldKind::Integer),
        (builtin::STR, FieldKind::String),
        (builtin::TIME, FieldKind::Time),
        (builtin::TIMEDELTA, FieldKind::TimeDelta),
        (builtin::UUID, FieldKind::Uuid),
    ];

    let list = FieldFactory::new("ListFieldFactory", list_factory);
    kinds
        .into_iter()
        .map(|(name, kind)| (TypeHint::named(name), FieldFactory::for_kind(kind)))
        .chain([
            (TypeHint::named(builtin::LIST), list.clone()),
            (TypeHint::named(builtin::SEQUENCE), list),
        ])
        .collect()
}

#[derive(Default)]
struct RegistryState {
    factories: HashMap<TypeHint, FieldFactory>,
    schemas: HashMap<String, Arc<Schema>>,
}

/// Mapping from type hints to field factories, plus the catalog of built
/// schemas used to resolve nested schemas by name.
///
/// A `TypeRegistry` is a shared handle: clones refer to the same
/// registrations. Create separate registries to isolate schemas (tests
/// usually take a fresh one each).
#[derive(Clone)]
pub struct TypeRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl Default for TypeRegistry {
    /// See [`TypeRegistry::new`].
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry without any registrations.
    pub fn empty() -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// A registry seeded with the builtin types.
    ///
    /// - `bool` `int` `float` `Decimal` `str`
    /// - `date` `datetime` `time` `timedelta` `UUID`
    /// - `List` `Sequence`
    pub fn new() -> Self {
        Self::with_factories(std::iter::empty())
    }

    /// A seeded registry with `factories` registered over the defaults.
    pub fn with_factories(factories: impl IntoIterator<Item = (TypeHint, FieldFactory)>) -> Self {
        let registry = Self::empty();
        {
            let mut state = registry.write();
            state.factories.extend(default_factories());
            state.factories.extend(factories);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a factory for `hint`, replacing any previous one.
    pub fn register(&self, hint: TypeHint, factory: FieldFactory) {
        tracing::debug!(hint = %hint, factory = factory.label(), "registering field factory");
        self.write().factories.insert(hint, factory);
    }

    /// Register a closure as the factory for `hint` and return the factory.
    pub fn register_fn<F>(&self, hint: TypeHint, build: F) -> FieldFactory
    where
        F: Fn(&Converter, &[TypeHint], FieldOptions) -> Result<SchemaField, ConversionError>
            + Send
            + Sync
            + 'static,
    {
        let factory = FieldFactory::new(format!("{hint}FieldFactory"), build);
        self.register(hint, factory.clone());
        factory
    }

    /// Look up the factory for `hint`.
    ///
    /// Lookups are exact; a parameterized generic that is not registered
    /// verbatim falls back to its unparameterized origin.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::UnregisteredType` naming the hint.
    pub fn get(&self, hint: &TypeHint) -> Result<FieldFactory, ConversionError> {
        self.lookup(hint)
            .ok_or_else(|| ConversionError::UnregisteredType {
                hint: hint.to_string(),
            })
    }

    fn lookup(&self, hint: &TypeHint) -> Option<FieldFactory> {
        let state = self.read();
        state
            .factories
            .get(hint)
            .or_else(|| hint.origin().and_then(|origin| state.factories.get(&origin)))
            .cloned()
    }

    pub fn has(&self, hint: &TypeHint) -> bool {
        self.lookup(hint).is_some()
    }

    /// Factory registered for exactly `hint`, without the origin fallback.
    pub(crate) fn get_exact(&self, hint: &TypeHint) -> Option<FieldFactory> {
        self.read().factories.get(hint).cloned()
    }

    /// Associate a field kind with a type.
    pub fn register_field_for_type(&self, hint: TypeHint, kind: FieldKind) {
        self.register(hint, FieldFactory::for_kind(kind));
    }

    /// Associate a nested schema (built, or by name) with a type.
    pub fn register_scheme_factory(&self, hint: TypeHint, scheme: SchemeRef) {
        self.register(hint, FieldFactory::for_scheme(scheme));
    }

    /// Registered type hints, in no particular order.
    pub fn hints(&self) -> Vec<TypeHint> {
        self.read().factories.keys().cloned().collect()
    }

    /// Add a built schema to the named catalog.
    pub fn add_schema(&self, schema: Arc<Schema>) {
        tracing::debug!(schema = schema.name(), "cataloguing schema");
        self.write()
            .schemas
            .insert(schema.name().to_string(), schema);
    }

    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.read().schemas.get(name).cloned()
    }

    /// Resolve a nested-schema reference to a built schema.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::UnknownSchema` if a named schema has not been
    /// built against this registry.
    pub fn resolve_scheme(&self, scheme: &SchemeRef) -> Result<Arc<Schema>, ConversionError> {
        match scheme {
            SchemeRef::Schema(schema) => Ok(Arc::clone(schema)),
            SchemeRef::Named(name) => {
                self.schema(name)
                    .ok_or_else(|| ConversionError::UnknownSchema { name: name.clone() })
            }
        }
    }

    /// Whether both handles share the same registrations.
    pub fn same_as(&self, other: &TypeRegistry) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        let mut schemas: Vec<&String> = state.schemas.keys().collect();
        schemas.sort();
        f.debug_struct("TypeRegistry")
            .field("factories", &state.factories.len())
            .field("schemas", &schemas)
            .finish()
    }
}
