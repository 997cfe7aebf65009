//! Model and payload loading.
//!
//! A model file describes custom types, classes and schemas in JSON:
//!
//! ```json
//! {
//!   "types": { "IPv4Address": "String" },
//!   "classes": [
//!     { "name": "Artist", "annotations": { "id": "UUID", "name": "str" } }
//!   ],
//!   "schemas": [
//!     { "name": "ArtistSchema", "target": "Artist", "register_as_scheme": true }
//!   ]
//! }
//! ```
//!
//! Classes and schemas may only refer to bases declared earlier in the
//! file. All schemas of a model share one registry.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::class::{Attribute, ClassDef, ClassRef};
use crate::converter::ConverterFactory;
use crate::error::LoadError;
use crate::ext;
use crate::fields::FieldKind;
use crate::hint::TypeHint;
use crate::options::FieldOptions;
use crate::registry::TypeRegistry;
use crate::schema::Schema;

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    load_json_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a model file and build everything it declares.
///
/// # Errors
///
/// IO and JSON errors as for [`load_json`]; `LoadError::InvalidModel` for
/// structural problems; `LoadError::Annotation` when a hint does not parse
/// or a schema fails to build.
pub fn load_model(path: &Path) -> Result<Model, LoadError> {
    Model::from_value(load_json(path)?)
}

/// Load a model from a JSON string.
///
/// # Errors
///
/// As for [`load_model`], minus IO errors.
pub fn load_model_str(content: &str) -> Result<Model, LoadError> {
    Model::from_value(load_json_str(content)?)
}

/// Classes and schemas built from a model file.
#[derive(Debug)]
pub struct Model {
    registry: TypeRegistry,
    classes: IndexMap<String, ClassRef>,
    schemas: IndexMap<String, Arc<Schema>>,
}

impl Model {
    /// Build a model from an already parsed document.
    ///
    /// # Errors
    ///
    /// See [`load_model`].
    pub fn from_value(document: Value) -> Result<Self, LoadError> {
        let file: ModelFile = serde_json::from_value(document).map_err(|e| LoadError::InvalidModel {
            message: e.to_string(),
        })?;

        let mut model = Model {
            registry: TypeRegistry::new(),
            classes: IndexMap::new(),
            schemas: IndexMap::new(),
        };
        model.register_types(&file.types)?;
        for class in file.classes {
            model.add_class(class)?;
        }
        for schema in file.schemas {
            model.add_schema(schema)?;
        }

        tracing::debug!(
            classes = model.classes.len(),
            schemas = model.schemas.len(),
            "loaded model"
        );
        Ok(model)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn class(&self, name: &str) -> Option<&ClassRef> {
        self.classes.get(name)
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    /// Schemas in declaration order.
    pub fn schemas(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    fn register_types(&self, types: &IndexMap<String, String>) -> Result<(), LoadError> {
        for (hint, kind) in types {
            let field_kind = FieldKind::from_name(kind).ok_or_else(|| LoadError::InvalidModel {
                message: format!("unknown field kind \"{kind}\" for type {hint}"),
            })?;
            self.registry
                .register_field_for_type(TypeHint::parse(hint)?, field_kind);
        }
        Ok(())
    }

    fn add_class(&mut self, spec: ClassSpec) -> Result<(), LoadError> {
        if self.classes.contains_key(&spec.name) {
            return Err(invalid(format!("class {} is declared twice", spec.name)));
        }

        let mut builder = ClassDef::builder(&spec.name);
        for base in &spec.bases {
            let base = self
                .classes
                .get(base)
                .ok_or_else(|| invalid(format!("unknown base class {base} for {}", spec.name)))?;
            builder = builder.extends(base);
        }
        for (name, hint) in &spec.annotations {
            builder = builder.annotate(name, TypeHint::parse(hint)?);
        }
        if let Some(attributes) = spec.attributes {
            builder = builder.record();
            for attr in attributes {
                builder = builder.attribute(attr.into_attribute()?);
            }
        }

        self.classes.insert(spec.name, builder.build()?);
        Ok(())
    }

    fn add_schema(&mut self, spec: SchemaSpec) -> Result<(), LoadError> {
        if self.schemas.contains_key(&spec.name) {
            return Err(invalid(format!("schema {} is declared twice", spec.name)));
        }

        let mut builder = Schema::builder(&spec.name).registry(&self.registry);
        for base in &spec.extends {
            let base = self
                .schemas
                .get(base)
                .ok_or_else(|| invalid(format!("unknown base schema {base} for {}", spec.name)))?;
            builder = builder.extends(base);
        }
        if let Some(target) = &spec.target {
            let class = self
                .classes
                .get(target)
                .ok_or_else(|| invalid(format!("unknown target class {target} for {}", spec.name)))?;
            builder = builder.target(class);
        }
        if let Some(kind) = spec.converter {
            builder = builder.converter_factory(kind.factory());
        }
        if let Some(register) = spec.register_as_scheme {
            builder = builder.register_as_scheme(register);
        }
        if let Some(dump) = spec.dump_default_fields {
            builder = builder.dump_default_fields(dump);
        }
        for (name, options) in spec.fields {
            builder = builder.field_config(name, options);
        }
        builder = builder.exclude(spec.exclude);

        self.schemas.insert(spec.name, builder.build()?);
        Ok(())
    }
}

fn invalid(message: String) -> LoadError {
    LoadError::InvalidModel { message }
}

// --- Model file format ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    #[serde(default)]
    types: IndexMap<String, String>,
    #[serde(default)]
    classes: Vec<ClassSpec>,
    #[serde(default)]
    schemas: Vec<SchemaSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassSpec {
    name: String,
    #[serde(default)]
    bases: Vec<String>,
    #[serde(default)]
    annotations: IndexMap<String, String>,
    /// Present (even empty) for record-like classes.
    attributes: Option<Vec<AttributeSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttributeSpec {
    name: String,
    #[serde(rename = "type")]
    hint: String,
    #[serde(default, deserialize_with = "present")]
    default: Option<Value>,
    #[serde(default)]
    factory: bool,
    #[serde(default = "default_init")]
    init: bool,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl AttributeSpec {
    fn into_attribute(self) -> Result<Attribute, LoadError> {
        let mut attr = Attribute::new(self.name, TypeHint::parse(&self.hint)?).init(self.init);
        attr.default = self.default;
        attr.has_factory = self.factory;
        attr.metadata = self.metadata;
        Ok(attr)
    }
}

fn default_init() -> bool {
    true
}

// An explicit `null` default is still a default.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaSpec {
    name: String,
    #[serde(default)]
    extends: Vec<String>,
    target: Option<String>,
    converter: Option<ConverterKind>,
    register_as_scheme: Option<bool>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(default)]
    fields: IndexMap<String, FieldOptions>,
    dump_default_fields: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ConverterKind {
    Base,
    Dataclass,
    Attrs,
    Namedtuple,
}

impl ConverterKind {
    fn factory(self) -> ConverterFactory {
        match self {
            ConverterKind::Base => ConverterFactory::base(),
            ConverterKind::Dataclass => ext::dataclass::converter_factory(),
            ConverterKind::Attrs => ext::attrs::converter_factory(),
            ConverterKind::Namedtuple => ext::namedtuple::converter_factory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnnotationError, ConversionError};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_json_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": 1}}"#).unwrap();

        let value = load_json(file.path()).unwrap();
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn load_json_file_not_found() {
        let result = load_json(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_json_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_json(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_model_builds_classes_and_schemas() {
        let model = load_model_str(
            r#"{
                "types": { "IPv4Address": "String" },
                "classes": [
                    { "name": "Host", "annotations": { "address": "IPv4Address", "port": "Optional[int]" } }
                ],
                "schemas": [
                    { "name": "HostSchema", "target": "Host", "fields": { "port": { "missing": 80 } } }
                ]
            }"#,
        )
        .unwrap();

        let schema = model.schema("HostSchema").unwrap();
        let loaded = schema.load(&json!({ "address": "10.0.0.1" })).unwrap();
        assert_eq!(loaded, json!({ "address": "10.0.0.1", "port": 80 }));
        assert!(model.class("Host").is_some());
        assert!(model.registry().schema("HostSchema").is_some());
    }

    #[test]
    fn record_attributes_are_loaded() {
        let model = load_model_str(
            r#"{
                "classes": [
                    {
                        "name": "Point",
                        "attributes": [
                            { "name": "x", "type": "int" },
                            { "name": "y", "type": "int", "default": null },
                            { "name": "z", "type": "int", "init": false }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        let point = model.class("Point").unwrap();
        let fields = point.record_fields().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].default, Some(Value::Null));
        assert!(!fields[2].init);
    }

    #[test]
    fn unknown_base_is_invalid() {
        let result = load_model_str(r#"{ "classes": [ { "name": "B", "bases": ["A"] } ] }"#);
        assert!(matches!(result, Err(LoadError::InvalidModel { message }) if message.contains("unknown base class A")));
    }

    #[test]
    fn unknown_keys_are_invalid() {
        let result = load_model_str(r#"{ "schemas": [ { "name": "S", "taget": "A" } ] }"#);
        assert!(matches!(result, Err(LoadError::InvalidModel { .. })));
    }

    #[test]
    fn unknown_field_kind_is_invalid() {
        let result = load_model_str(r#"{ "types": { "Ip": "Inet" } }"#);
        assert!(matches!(result, Err(LoadError::InvalidModel { .. })));
    }

    #[test]
    fn conversion_errors_surface_as_annotation_errors() {
        let result = load_model_str(
            r#"{
                "classes": [ { "name": "Host", "annotations": { "address": "IPv4Address" } } ],
                "schemas": [ { "name": "HostSchema", "target": "Host" } ]
            }"#,
        );
        match result {
            Err(LoadError::Annotation(AnnotationError::Conversion(
                ConversionError::UnregisteredType { hint },
            ))) => assert_eq!(hint, "IPv4Address"),
            other => panic!("expected conversion error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_hint_is_an_annotation_error() {
        let result = load_model_str(
            r#"{ "classes": [ { "name": "Host", "annotations": { "address": "List[int" } } ] }"#,
        );
        assert!(matches!(
            result,
            Err(LoadError::Annotation(AnnotationError::InvalidHint { .. }))
        ));
        assert_eq!(result.unwrap_err().exit_code(), 2);
    }
}
