//! Schemas built from class annotations.
//!
//! [`SchemaBuilder::build`] does all the work once: it merges the options
//! declared along the schema's ancestor chain, registers the schema as the
//! nested-schema factory for its target when asked to, and converts every
//! annotation not already covered by a declared, inherited or excluded field.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::class::{linearize, ClassRef};
use crate::converter::ConverterFactory;
use crate::error::{AnnotationError, ConversionError, FieldError, ValidateError};
use crate::fields::{JsonSchemaDefs, SchemaField};
use crate::meta::{SchemaMeta, SchemaOpts};
use crate::options::{FieldOptions, Missing};
use crate::registry::TypeRegistry;

/// JSON Schema dialect of exported documents.
pub const JSON_SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Reference to a nested schema: built, or by name for schemas that do not
/// exist yet.
#[derive(Clone)]
pub enum SchemeRef {
    Schema(Arc<Schema>),
    Named(String),
}

impl SchemeRef {
    pub fn name(&self) -> &str {
        match self {
            SchemeRef::Schema(schema) => schema.name(),
            SchemeRef::Named(name) => name,
        }
    }
}

impl From<&Arc<Schema>> for SchemeRef {
    fn from(schema: &Arc<Schema>) -> Self {
        SchemeRef::Schema(Arc::clone(schema))
    }
}

impl From<&str> for SchemeRef {
    fn from(name: &str) -> Self {
        SchemeRef::Named(name.to_string())
    }
}

impl fmt::Debug for SchemeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemeRef::Schema(schema) => f.debug_tuple("Schema").field(&schema.name()).finish(),
            SchemeRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// Field selection applied to a nested schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldFilter {
    pub only: Option<Vec<String>>,
    pub exclude: Vec<String>,
}

impl FieldFilter {
    pub fn includes(&self, name: &str) -> bool {
        let selected = match &self.only {
            Some(only) => only.iter().any(|n| n == name),
            None => true,
        };
        selected && !self.exclude.iter().any(|n| n == name)
    }

    /// `$defs` key for `schema` under this filter.
    pub(crate) fn def_key(&self, schema: &str) -> String {
        let mut key = schema.to_string();
        if let Some(only) = &self.only {
            key.push_str("__only_");
            key.push_str(&only.join("_"));
        }
        if !self.exclude.is_empty() {
            key.push_str("__exclude_");
            key.push_str(&self.exclude.join("_"));
        }
        key
    }
}

/// A built schema.
pub struct Schema {
    name: String,
    bases: Vec<Arc<Schema>>,
    // Linearized ancestors, nearest first.
    ancestors: Vec<Arc<Schema>>,
    meta: SchemaMeta,
    opts: SchemaOpts,
    fields: IndexMap<String, SchemaField>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            bases: Vec::new(),
            meta: SchemaMeta::default(),
            fields: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bases(&self) -> &[Arc<Schema>] {
        &self.bases
    }

    /// Options as declared on this schema, before merging.
    pub fn meta(&self) -> &SchemaMeta {
        &self.meta
    }

    pub fn opts(&self) -> &SchemaOpts {
        &self.opts
    }

    pub fn target(&self) -> Option<&ClassRef> {
        self.opts.target.as_ref()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.opts.registry
    }

    pub fn fields(&self) -> &IndexMap<String, SchemaField> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.get(name)
    }

    /// Serialize `obj` (a JSON object keyed by attribute name).
    ///
    /// # Errors
    ///
    /// `ValidateError::Invalid` collects every field that could not be
    /// serialized; a thunked field that still cannot resolve aborts with
    /// `ValidateError::Conversion`.
    pub fn dump(&self, obj: &Value) -> Result<Value, ValidateError> {
        self.dump_filtered(obj, &FieldFilter::default())
    }

    /// Deserialize and validate `data`.
    ///
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// As for [`Schema::dump`].
    pub fn load(&self, data: &Value) -> Result<Value, ValidateError> {
        self.load_filtered(data, &FieldFilter::default())
    }

    /// Error messages for `data`, keyed by JSON Pointer.
    ///
    /// Runs [`Schema::load`] and collects what it rejects, so formats such as
    /// dates and UUIDs are checked too. [`crate::validate`] instead checks
    /// `data` against the exported JSON Schema and returns the problems as
    /// an error.
    ///
    /// # Errors
    ///
    /// Only conversion failures are errors here; invalid data is reported
    /// in the returned list.
    pub fn validate(&self, data: &Value) -> Result<Vec<FieldError>, ValidateError> {
        match self.load(data) {
            Ok(_) => Ok(Vec::new()),
            Err(ValidateError::Invalid { errors }) => Ok(errors),
            Err(other) => Err(other),
        }
    }

    pub(crate) fn dump_filtered(
        &self,
        obj: &Value,
        filter: &FieldFilter,
    ) -> Result<Value, ValidateError> {
        if !obj.is_object() {
            return Err(ValidateError::at("", "Invalid input type."));
        }

        let mut out = Map::new();
        let mut errors = Vec::new();
        for (name, field) in self.selected(filter) {
            if field.options()?.is_load_only() {
                continue;
            }
            match field.serialize(name, obj) {
                Ok(Some(value)) => {
                    out.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(err @ ValidateError::Invalid { .. }) => collect(&mut errors, err, name),
                Err(err) => return Err(err),
            }
        }
        if !errors.is_empty() {
            return Err(ValidateError::Invalid { errors });
        }

        if !self.opts.dump_default_fields {
            self.strip_defaults(&mut out);
        }
        Ok(Value::Object(out))
    }

    pub(crate) fn load_filtered(
        &self,
        data: &Value,
        filter: &FieldFilter,
    ) -> Result<Value, ValidateError> {
        let Some(input) = data.as_object() else {
            return Err(ValidateError::at("", "Invalid input type."));
        };

        let mut out = Map::new();
        let mut errors = Vec::new();
        for (name, field) in self.selected(filter) {
            if field.options()?.is_dump_only() {
                continue;
            }
            match field.deserialize(input.get(name)) {
                Ok(Some(value)) => {
                    out.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(err @ ValidateError::Invalid { .. }) => collect(&mut errors, err, name),
                Err(err) => return Err(err),
            }
        }
        if errors.is_empty() {
            Ok(Value::Object(out))
        } else {
            Err(ValidateError::Invalid { errors })
        }
    }

    fn selected<'a>(
        &'a self,
        filter: &'a FieldFilter,
    ) -> impl Iterator<Item = (&'a String, &'a SchemaField)> + 'a {
        self.fields.iter().filter(move |(name, _)| filter.includes(name))
    }

    fn strip_defaults(&self, out: &mut Map<String, Value>) {
        let Some(target) = &self.opts.target else {
            return;
        };
        let defaults = self.opts.converter.hooks().field_defaults(target);
        out.retain(|name, value| defaults.get(name.as_str()) != Some(&*value));
    }

    /// JSON Schema (draft 2020-12) describing what [`Schema::load`] accepts.
    ///
    /// Nested schemas are emitted once under `$defs`, so self-referencing
    /// and mutually referencing schemas export fine.
    ///
    /// # Errors
    ///
    /// Returns a `ConversionError` when a thunked field or a named nested
    /// schema cannot be resolved.
    pub fn json_schema(&self) -> Result<Value, ConversionError> {
        let mut defs = JsonSchemaDefs::default();
        let body = self.object_schema(&FieldFilter::default(), &mut defs)?;

        let mut document = Map::new();
        document.insert("$schema".into(), Value::String(JSON_SCHEMA_DIALECT.into()));
        document.insert("title".into(), Value::String(self.name.clone()));
        if let Value::Object(body) = body {
            document.extend(body);
        }
        let defs = defs.into_defs();
        if !defs.is_empty() {
            document.insert("$defs".into(), Value::Object(defs));
        }
        Ok(Value::Object(document))
    }

    pub(crate) fn object_schema(
        &self,
        filter: &FieldFilter,
        defs: &mut JsonSchemaDefs,
    ) -> Result<Value, ConversionError> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, field) in self.selected(filter) {
            let options = field.options()?;
            let substituted = options.missing.as_ref().and_then(Missing::value).is_some();
            if options.is_required() && !options.is_dump_only() && !substituted {
                required.push(Value::String(name.clone()));
            }
            properties.insert(name.clone(), field.json_schema(defs)?);
        }

        let mut schema = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        Ok(schema)
    }

    /// Field summaries keyed by name.
    pub fn describe(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.describe()))
            .collect();
        let mut out = Map::new();
        out.insert("schema".into(), Value::String(self.name.clone()));
        if let Some(target) = self.target() {
            out.insert("target".into(), Value::String(target.name().to_string()));
        }
        out.insert("fields".into(), Value::Object(fields));
        Value::Object(out)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("target", &self.target().map(|t| t.name()))
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn collect(errors: &mut Vec<FieldError>, err: ValidateError, name: &str) {
    if let ValidateError::Invalid { errors: nested } = err.nest(name) {
        errors.extend(nested);
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    bases: Vec<Arc<Schema>>,
    meta: SchemaMeta,
    fields: IndexMap<String, SchemaField>,
}

impl SchemaBuilder {
    /// Inherit fields and options from `base`.
    pub fn extends(mut self, base: &Arc<Schema>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    /// Class whose annotations generate the fields.
    pub fn target(mut self, target: &ClassRef) -> Self {
        self.meta.target = Some(Arc::clone(target));
        self
    }

    pub fn registry(mut self, registry: &TypeRegistry) -> Self {
        self.meta.registry = Some(registry.clone());
        self
    }

    pub fn converter_factory(mut self, factory: ConverterFactory) -> Self {
        self.meta.converter_factory = Some(factory);
        self
    }

    /// Register this schema as the nested-schema factory for its target.
    pub fn register_as_scheme(mut self, register: bool) -> Self {
        self.meta.register_as_scheme = Some(register);
        self
    }

    /// Configure the generated field `name`. Repeated calls merge.
    pub fn field_config(mut self, name: impl Into<String>, options: FieldOptions) -> Self {
        self.meta
            .fields
            .entry(name.into())
            .or_default()
            .merge(&options);
        self
    }

    /// Never generate or keep fields with these names.
    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.exclude.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare a field explicitly; generation never replaces it.
    pub fn field(mut self, name: impl Into<String>, field: impl Into<SchemaField>) -> Self {
        self.fields.insert(name.into(), field.into());
        self
    }

    pub fn dump_default_fields(mut self, dump: bool) -> Self {
        self.meta.dump_default_fields = Some(dump);
        self
    }

    /// Build the schema and add it to its registry's catalog.
    ///
    /// # Errors
    ///
    /// - `AnnotationError::InconsistentHierarchy` if the bases cannot be
    ///   linearized
    /// - `AnnotationError::Configuration` if a field is configured that the
    ///   target does not annotate
    /// - `AnnotationError::Conversion` if an annotation cannot be converted
    pub fn build(self) -> Result<Arc<Schema>, AnnotationError> {
        let ancestors = linearize(
            &self.bases,
            |base: &Arc<Schema>| base.ancestors.clone(),
            |a, b| Arc::ptr_eq(a, b),
        )
        .ok_or_else(|| AnnotationError::InconsistentHierarchy {
            name: self.name.clone(),
        })?;

        // Without a declared registry, share the nearest ancestor's.
        let mut own = self.meta.clone();
        if own.registry.is_none() && ancestors.iter().all(|a| a.meta.registry.is_none()) {
            own.registry = ancestors.first().map(|a| a.opts.registry.clone());
        }
        let opts = SchemaOpts::merge(ancestors.iter().rev().map(|a| &a.meta).chain([&own]));

        if opts.register_as_scheme {
            if let Some(target) = &opts.target {
                opts.registry
                    .register_scheme_factory(target.hint(), SchemeRef::Named(self.name.clone()));
            }
        }

        let mut fields: IndexMap<String, SchemaField> = IndexMap::new();
        for ancestor in ancestors.iter().rev() {
            for (name, field) in &ancestor.fields {
                fields.insert(name.clone(), field.clone());
            }
        }
        fields.extend(self.fields);

        if let Some(target) = &opts.target {
            check_configured_names(&self.name, target, &self.meta, &fields)?;

            let mut ignore: HashSet<String> = fields.keys().cloned().collect();
            ignore.extend(opts.exclude.iter().cloned());
            let generated = opts
                .converter
                .convert_all(target, &ignore, &opts.field_configs)?;
            fields.extend(generated);
        }
        fields.retain(|name, _| !opts.exclude.contains(name));
        for (name, field) in fields.iter_mut() {
            field.bind(name, &self.name);
        }

        tracing::debug!(
            schema = %self.name,
            target_type = ?opts.target.as_ref().map(|t| t.name()),
            fields = fields.len(),
            "built schema"
        );

        let registry = opts.registry.clone();
        let schema = Arc::new(Schema {
            name: self.name,
            bases: self.bases,
            ancestors,
            meta: self.meta,
            opts,
            fields,
        });
        registry.add_schema(Arc::clone(&schema));
        Ok(schema)
    }
}

// Field configs declared on the schema itself must name something the
// target annotates or the schema already declares.
fn check_configured_names(
    schema: &str,
    target: &ClassRef,
    meta: &SchemaMeta,
    fields: &IndexMap<String, SchemaField>,
) -> Result<(), AnnotationError> {
    let annotated: HashSet<String> = target.type_hints().into_iter().map(|(n, _)| n).collect();
    let mut unknown: Vec<&str> = meta
        .fields
        .keys()
        .filter(|name| !annotated.contains(*name) && !fields.contains_key(*name))
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(AnnotationError::Configuration {
        schema: schema.to_string(),
        message: format!(
            "field config for {} which {} does not annotate",
            unknown.join(", "),
            target.name()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Attribute, ClassDef};
    use crate::fields::{Field, FieldKind};
    use crate::hint::TypeHint;

    fn hint(s: &str) -> TypeHint {
        TypeHint::parse(s).unwrap()
    }

    fn artist() -> ClassRef {
        ClassDef::builder("Artist")
            .annotate("id", hint("int"))
            .annotate("name", hint("str"))
            .annotate("label", hint("Optional[str]"))
            .build()
            .unwrap()
    }

    #[test]
    fn generates_fields_from_target() {
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();

        assert_eq!(schema.fields().keys().collect::<Vec<_>>(), ["id", "name", "label"]);
        let id = schema.field("id").unwrap();
        assert_eq!(id.name(), Some("id"));
        assert_eq!(id.parent(), Some("ArtistSchema"));
    }

    #[test]
    fn schema_without_target_keeps_declared_fields_only() {
        let schema = Schema::builder("Plain")
            .field("raw", Field::new(FieldKind::Raw, FieldOptions::new()))
            .build()
            .unwrap();
        assert_eq!(schema.fields().len(), 1);
        assert!(schema.target().is_none());
    }

    #[test]
    fn catalogues_itself() {
        let registry = TypeRegistry::new();
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&registry)
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(&registry.schema("ArtistSchema").unwrap(), &schema));
    }

    #[test]
    fn load_collects_errors_by_field() {
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();

        let err = schema.load(&json!({ "id": "x", "label": 3 })).unwrap_err();
        let ValidateError::Invalid { errors } = err else {
            panic!("expected invalid");
        };
        let mut paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, ["/id", "/label", "/name"]);
    }

    #[test]
    fn load_and_dump_round_trip() {
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();
        let data = json!({ "id": 1, "name": "Tool", "label": null });

        let loaded = schema.load(&data).unwrap();
        assert_eq!(loaded, data);
        assert_eq!(schema.dump(&loaded).unwrap(), data);

        let sparse = schema.load(&json!({ "id": 1, "name": "Tool" })).unwrap();
        assert_eq!(sparse, json!({ "id": 1, "name": "Tool" }));
    }

    #[test]
    fn non_objects_are_rejected() {
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();
        assert!(schema.load(&json!([1, 2])).is_err());
        assert!(schema.dump(&json!("artist")).is_err());
    }

    #[test]
    fn validate_reports_errors_without_failing() {
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();
        assert!(schema.validate(&json!({ "id": 1, "name": "x" })).unwrap().is_empty());
        let errors = schema.validate(&json!({ "id": 1 })).unwrap();
        assert_eq!(errors[0].path, "/name");
        assert_eq!(errors[0].message, "Missing data for required field.");
    }

    #[test]
    fn unknown_field_config_is_a_configuration_error() {
        let err = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .field_config("nmae", FieldOptions::new().dump_only(true))
            .build()
            .unwrap_err();
        assert!(matches!(err, AnnotationError::Configuration { schema, .. } if schema == "ArtistSchema"));
    }

    #[test]
    fn json_schema_lists_required_fields() {
        let schema = Schema::builder("ArtistSchema")
            .target(&artist())
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();
        let document = schema.json_schema().unwrap();

        assert_eq!(document["$schema"], JSON_SCHEMA_DIALECT);
        assert_eq!(document["required"], json!(["id", "name"]));
        assert_eq!(document["properties"]["id"], json!({ "type": "integer" }));
        assert!(document.get("$defs").is_none());
    }

    #[test]
    fn inherits_registry_from_ancestor() {
        let registry = TypeRegistry::new();
        let base = Schema::builder("Base").registry(&registry).build().unwrap();
        let derived = Schema::builder("Derived")
            .extends(&base)
            .target(&artist())
            .build()
            .unwrap();
        assert!(derived.registry().same_as(&registry));

        let undeclared = Schema::builder("Undeclared").build().unwrap();
        let child = Schema::builder("Child").extends(&undeclared).build().unwrap();
        assert!(child.registry().same_as(undeclared.registry()));
    }

    #[test]
    fn record_target_with_defaults() {
        let point = ClassDef::builder("Point")
            .attribute(Attribute::new("x", hint("int")))
            .attribute(Attribute::new("y", hint("int")).default(json!(0)))
            .build()
            .unwrap();
        let schema = Schema::builder("PointSchema")
            .target(&point)
            .registry(&TypeRegistry::new())
            .build()
            .unwrap();
        // The base converter knows nothing about record defaults.
        assert!(schema.field("y").unwrap().options().unwrap().is_required());
    }

    #[test]
    fn filter_def_keys() {
        let filter = FieldFilter {
            only: None,
            exclude: vec!["foo".into()],
        };
        assert_eq!(filter.def_key("Bar"), "Bar__exclude_foo");
        assert!(!filter.includes("foo"));
        assert!(filter.includes("id"));
        assert_eq!(FieldFilter::default().def_key("Bar"), "Bar");
    }
}
