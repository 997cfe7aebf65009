//! Converter: resolves type hints into fields through a [`TypeRegistry`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::class::ClassDef;
use crate::error::ConversionError;
use crate::fields::SchemaField;
use crate::hint::TypeHint;
use crate::options::{FieldConfigs, FieldOptions, Missing};
use crate::registry::TypeRegistry;
use crate::thunk::ThunkedField;

/// The attribute currently being converted by [`Converter::convert_all`].
#[derive(Debug, Clone, Copy)]
pub struct FieldSite<'a> {
    pub name: &'a str,
    pub target: &'a ClassDef,
}

/// Extension points for class kinds with their own field bookkeeping.
///
/// Every method defaults to a no-op, so implementors override only what
/// they need.
pub trait ConverterHooks: Send + Sync + fmt::Debug {
    /// Called once when a converter is created over `registry`.
    fn install(&self, _registry: &TypeRegistry) {}

    /// Reject targets the hooks cannot handle before any field is converted.
    fn check_target(
        &self,
        _converter: &Converter,
        _target: &ClassDef,
        _ignore: &HashSet<String>,
    ) -> Result<(), ConversionError> {
        Ok(())
    }

    /// Load-time default per attribute name.
    fn field_defaults(&self, _target: &ClassDef) -> IndexMap<String, Value> {
        IndexMap::new()
    }

    /// Runs before optional and generic handling.
    fn preprocess_typehint(
        &self,
        _hint: &TypeHint,
        _options: &mut FieldOptions,
        _site: &FieldSite<'_>,
    ) {
    }

    /// Runs after optional and generic handling, right before construction.
    fn postprocess_typehint(
        &self,
        _hint: &TypeHint,
        _options: &mut FieldOptions,
        _site: &FieldSite<'_>,
    ) {
    }
}

/// Hooks of the plain converter.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaseHooks;

impl ConverterHooks for BaseHooks {}

/// Turns type hints into fields.
///
/// Cheap to clone; clones share the registry and hooks.
#[derive(Debug, Clone)]
pub struct Converter {
    registry: TypeRegistry,
    hooks: Arc<dyn ConverterHooks>,
}

impl Converter {
    pub fn new(registry: TypeRegistry) -> Self {
        Self::with_hooks(registry, Arc::new(BaseHooks))
    }

    /// Converter customized by `hooks`, which are installed into `registry`.
    pub fn with_hooks(registry: TypeRegistry, hooks: Arc<dyn ConverterHooks>) -> Self {
        hooks.install(&registry);
        Self { registry, hooks }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &dyn ConverterHooks {
        self.hooks.as_ref()
    }

    /// Convert a single type hint.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::UnregisteredType` when the resolved type has
    /// no registry entry.
    pub fn convert(
        &self,
        hint: &TypeHint,
        options: FieldOptions,
    ) -> Result<SchemaField, ConversionError> {
        self.convert_at(hint, options, None)
    }

    /// Convert every eligible annotation of `target` except the `ignore`d
    /// names. `configs` is merged over the defaults the hooks discover.
    ///
    /// # Errors
    ///
    /// Fails on the first annotation that cannot be converted, or when the
    /// hooks reject the target.
    pub fn convert_all(
        &self,
        target: &ClassDef,
        ignore: &HashSet<String>,
        configs: &FieldConfigs,
    ) -> Result<IndexMap<String, SchemaField>, ConversionError> {
        self.hooks.check_target(self, target, ignore)?;
        let defaults = self.hooks.field_defaults(target);

        let mut fields = IndexMap::new();
        for (name, hint) in self.type_hints(target, ignore) {
            let mut options = match defaults.get(&name) {
                Some(default) => FieldOptions {
                    missing: Some(Missing::Value(default.clone())),
                    required: Some(false),
                    ..FieldOptions::default()
                },
                None => FieldOptions::default(),
            };
            if let Some(config) = configs.get(&name) {
                options.merge(config);
            }

            let site = FieldSite {
                name: &name,
                target,
            };
            let field = self.convert_at(&hint, options, Some(&site))?;
            fields.insert(name, field);
        }

        tracing::debug!(
            target_type = target.name(),
            fields = fields.len(),
            "converted annotations"
        );
        Ok(fields)
    }

    /// Annotations of `target` eligible for conversion: merged across its
    /// ancestors, minus class variables and `ignore`d names.
    pub fn type_hints(
        &self,
        target: &ClassDef,
        ignore: &HashSet<String>,
    ) -> Vec<(String, TypeHint)> {
        target
            .type_hints()
            .into_iter()
            .filter(|(name, hint)| !ignore.contains(name) && !hint.is_class_var())
            .collect()
    }

    /// Whether `hint` resolves to a nested-schema factory.
    pub fn is_scheme(&self, hint: &TypeHint) -> bool {
        self.registry
            .get(hint)
            .map(|factory| factory.is_scheme())
            .unwrap_or(false)
    }

    fn convert_at(
        &self,
        hint: &TypeHint,
        mut options: FieldOptions,
        site: Option<&FieldSite<'_>>,
    ) -> Result<SchemaField, ConversionError> {
        if let Some(site) = site {
            self.hooks.preprocess_typehint(hint, &mut options, site);
        }

        let mut allow_none = false;
        let mut required = true;
        let mut target = hint;
        if let Some(inner) = hint.optional_inner() {
            allow_none = true;
            required = false;
            options.missing.get_or_insert(Missing::Absent);
            target = inner;
        }

        // Generic arguments go to the factory; the registry falls back from
        // `List[T]` to `List` on lookup.
        let subtypes = target.args().to_vec();
        let target = target.clone();

        options.allow_none.get_or_insert(allow_none);
        options.required.get_or_insert(required);

        if let Some(site) = site {
            self.hooks.postprocess_typehint(hint, &mut options, site);
        }

        if options.is_thunked() {
            options.thunked = None;
            tracing::debug!(target_type = %target, "deferring field construction");
            return Ok(ThunkedField::new(self.clone(), target, subtypes, options).into());
        }

        self.construct(&target, &subtypes, options)
    }

    /// Look up `target` and build its field.
    ///
    /// A sequence whose single item type is a nested schema becomes that
    /// nested field with `many` set, unless the parameterized sequence
    /// itself is registered.
    pub(crate) fn construct(
        &self,
        target: &TypeHint,
        subtypes: &[TypeHint],
        mut options: FieldOptions,
    ) -> Result<SchemaField, ConversionError> {
        if let Some(factory) = self.registry.get_exact(target) {
            return factory.build(self, subtypes, options);
        }
        if let [item] = subtypes {
            let sequence = target.origin().is_some_and(|origin| origin.is_sequence());
            if sequence && self.is_scheme(item) {
                options.many = Some(true);
                return self.registry.get(item)?.build(self, &[], options);
            }
        }

        self.registry.get(target)?.build(self, subtypes, options)
    }
}

type CreateFn = dyn Fn(&TypeRegistry) -> Converter + Send + Sync;

/// Creates the converter a schema uses, bound to the schema's registry.
#[derive(Clone)]
pub struct ConverterFactory {
    name: String,
    create: Arc<CreateFn>,
}

impl ConverterFactory {
    pub fn new<F>(name: impl Into<String>, create: F) -> Self
    where
        F: Fn(&TypeRegistry) -> Converter + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            create: Arc::new(create),
        }
    }

    /// Factory for the plain converter.
    pub fn base() -> Self {
        Self::new("base", |registry| Converter::new(registry.clone()))
    }

    /// Factory for converters customized by a shared set of hooks.
    pub fn with_hooks(name: impl Into<String>, hooks: Arc<dyn ConverterHooks>) -> Self {
        Self::new(name, move |registry| {
            Converter::with_hooks(registry.clone(), Arc::clone(&hooks))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&self, registry: &TypeRegistry) -> Converter {
        (self.create)(registry)
    }
}

impl Default for ConverterFactory {
    fn default() -> Self {
        Self::base()
    }
}

impl fmt::Debug for ConverterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConverterFactory").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldKind;
    use serde_json::json;

    fn hint(s: &str) -> TypeHint {
        TypeHint::parse(s).unwrap()
    }

    #[test]
    fn optional_sets_allow_none_and_not_required() {
        let converter = Converter::new(TypeRegistry::new());
        let field = converter.convert(&hint("Optional[int]"), FieldOptions::new()).unwrap();
        let options = field.options().unwrap();

        assert!(matches!(field.kind().unwrap(), FieldKind::Integer));
        assert_eq!(options.allow_none, Some(true));
        assert_eq!(options.required, Some(false));
        assert_eq!(options.missing, Some(Missing::Absent));
    }

    #[test]
    fn plain_hint_is_required_and_not_nullable() {
        let converter = Converter::new(TypeRegistry::new());
        let field = converter.convert(&hint("str"), FieldOptions::new()).unwrap();
        let options = field.options().unwrap();

        assert_eq!(options.allow_none, Some(false));
        assert_eq!(options.required, Some(true));
        assert_eq!(options.missing, None);
    }

    #[test]
    fn passed_options_are_not_overridden() {
        let converter = Converter::new(TypeRegistry::new());
        let field = converter
            .convert(&hint("Optional[int]"), FieldOptions::new().required(true).missing(json!(0)))
            .unwrap();
        let options = field.options().unwrap();

        assert_eq!(options.required, Some(true));
        assert_eq!(options.missing, Some(Missing::Value(json!(0))));
    }

    #[test]
    fn wide_unions_are_not_unwrapped() {
        let converter = Converter::new(TypeRegistry::new());
        let err = converter
            .convert(&hint("Union[int, str, None]"), FieldOptions::new())
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnregisteredType { .. }));
    }

    #[test]
    fn list_wraps_item_field() {
        let converter = Converter::new(TypeRegistry::new());
        let field = converter.convert(&hint("List[int]"), FieldOptions::new()).unwrap();

        match field.kind().unwrap() {
            FieldKind::List(container) => {
                assert!(matches!(container.kind().unwrap(), FieldKind::Integer));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn unregistered_item_type_fails() {
        let converter = Converter::new(TypeRegistry::new());
        let err = converter
            .convert(&hint("List[IPv4Address]"), FieldOptions::new())
            .unwrap_err();
        assert!(matches!(err, ConversionError::UnregisteredType { hint } if hint == "IPv4Address"));
    }

    #[test]
    fn thunked_options_defer_lookup() {
        let registry = TypeRegistry::new();
        let converter = Converter::new(registry.clone());
        let field = converter
            .convert(&hint("Later"), FieldOptions::new().thunked(true))
            .unwrap();
        assert!(field.is_thunked());
        assert!(field.kind().is_err());

        registry.register_field_for_type(hint("Later"), FieldKind::String);
        assert!(matches!(field.kind().unwrap(), FieldKind::String));
        assert_eq!(field.options().unwrap().thunked, None);
    }

    #[test]
    fn type_hints_skip_class_vars_and_ignored() {
        let target = ClassDef::builder("Target")
            .annotate("a", hint("int"))
            .annotate("b", hint("ClassVar[int]"))
            .annotate("c", hint("str"))
            .build()
            .unwrap();
        let converter = Converter::new(TypeRegistry::new());
        let ignore: HashSet<String> = ["c".to_string()].into();

        let names: Vec<String> = converter
            .type_hints(&target, &ignore)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["a"]);
    }

    #[test]
    fn convert_all_merges_configs() {
        let target = ClassDef::builder("Target")
            .annotate("id", hint("int"))
            .annotate("name", hint("Optional[str]"))
            .build()
            .unwrap();
        let converter = Converter::new(TypeRegistry::new());
        let mut configs = FieldConfigs::new();
        configs.insert("id".into(), FieldOptions::new().dump_only(true));

        let fields = converter.convert_all(&target, &HashSet::new(), &configs).unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(fields["id"].options().unwrap().dump_only, Some(true));
        assert!(fields["name"].options().unwrap().allows_none());
    }

    #[derive(Debug)]
    struct Defaults;

    impl ConverterHooks for Defaults {
        fn field_defaults(&self, _target: &ClassDef) -> IndexMap<String, Value> {
            IndexMap::from([("v".to_string(), json!(5))])
        }
    }

    #[test]
    fn hook_defaults_become_missing_values() {
        let target = ClassDef::builder("Target").annotate("v", hint("int")).build().unwrap();
        let converter = Converter::with_hooks(TypeRegistry::new(), Arc::new(Defaults));

        let fields = converter.convert_all(&target, &HashSet::new(), &FieldConfigs::new()).unwrap();
        let options = fields["v"].options().unwrap();
        assert_eq!(options.required, Some(false));
        assert_eq!(options.missing, Some(Missing::Value(json!(5))));

        let mut configs = FieldConfigs::new();
        configs.insert("v".into(), FieldOptions::new().missing(json!(7)));
        let fields = converter.convert_all(&target, &HashSet::new(), &configs).unwrap();
        assert_eq!(fields["v"].options().unwrap().missing, Some(Missing::Value(json!(7))));
    }

    #[test]
    fn factory_creates_converter_over_registry() {
        let registry = TypeRegistry::new();
        let converter = ConverterFactory::default().create(&registry);
        assert!(converter.registry().same_as(&registry));
        assert_eq!(format!("{:?}", ConverterFactory::base()), "ConverterFactory(\"base\")");
    }
}
