//! Field runtime: the objects conversion produces.
//!
//! A [`Field`] serializes, deserializes and validates a single value of a
//! JSON document. [`SchemaField`] is what a schema actually holds: either a
//! concrete field or a [`ThunkedField`] standing in for one.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde_json::{json, Map, Number, Value};

use crate::error::{ConversionError, ValidateError};
use crate::options::{FieldOptions, Missing};
use crate::registry::TypeRegistry;
use crate::schema::{FieldFilter, SchemeRef};
use crate::thunk::ThunkedField;

/// What a field holds and how it is (de)serialized.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    /// Arbitrary precision decimal, carried as a string.
    Decimal,
    String,
    /// ISO 8601 date.
    Date,
    /// RFC 3339 date-time, or a naive ISO 8601 date-time.
    DateTime,
    /// ISO 8601 time.
    Time,
    /// Duration in seconds.
    TimeDelta,
    Uuid,
    /// Passed through untouched.
    Raw,
    /// Homogeneous sequence; each item handled by the container field.
    List(Box<SchemaField>),
    /// A nested schema.
    Nested(Nested),
}

/// Reference from a nested field to its schema.
#[derive(Debug, Clone)]
pub struct Nested {
    pub scheme: SchemeRef,
    registry: TypeRegistry,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "Boolean",
            FieldKind::Integer => "Integer",
            FieldKind::Float => "Float",
            FieldKind::Decimal => "Decimal",
            FieldKind::String => "String",
            FieldKind::Date => "Date",
            FieldKind::DateTime => "DateTime",
            FieldKind::Time => "Time",
            FieldKind::TimeDelta => "TimeDelta",
            FieldKind::Uuid => "UUID",
            FieldKind::Raw => "Raw",
            FieldKind::List(_) => "List",
            FieldKind::Nested(_) => "Nested",
        }
    }

    /// Look up a scalar kind by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Boolean" => FieldKind::Boolean,
            "Integer" => FieldKind::Integer,
            "Float" => FieldKind::Float,
            "Decimal" => FieldKind::Decimal,
            "String" => FieldKind::String,
            "Date" => FieldKind::Date,
            "DateTime" => FieldKind::DateTime,
            "Time" => FieldKind::Time,
            "TimeDelta" => FieldKind::TimeDelta,
            "UUID" => FieldKind::Uuid,
            "Raw" => FieldKind::Raw,
            _ => return None,
        })
    }
}

/// A concrete field.
#[derive(Debug, Clone)]
pub struct Field {
    kind: FieldKind,
    options: FieldOptions,
    name: Option<String>,
    parent: Option<String>,
}

impl Field {
    pub fn new(kind: FieldKind, options: FieldOptions) -> Self {
        Self {
            kind,
            options,
            name: None,
            parent: None,
        }
    }

    pub fn list(container: SchemaField, options: FieldOptions) -> Self {
        Self::new(FieldKind::List(Box::new(container)), options)
    }

    pub fn nested(scheme: SchemeRef, registry: TypeRegistry, options: FieldOptions) -> Self {
        Self::new(FieldKind::Nested(Nested { scheme, registry }), options)
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name of the schema this field is attached to.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Attach the field to a schema under `name`.
    pub fn bind(&mut self, name: &str, parent: &str) {
        self.name = Some(name.to_string());
        self.parent = Some(parent.to_string());
    }

    /// For list fields, the item field.
    pub fn container(&self) -> Option<&SchemaField> {
        match &self.kind {
            FieldKind::List(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn get_value(&self, attr: &str, obj: &Value) -> Option<Value> {
        obj.get(attr).cloned()
    }

    /// Serialize attribute `attr` of `obj`. `None` leaves it out of the output.
    pub fn serialize(&self, attr: &str, obj: &Value) -> Result<Option<Value>, ValidateError> {
        match self.get_value(attr, obj) {
            None => Ok(self.options.default.clone()),
            Some(Value::Null) => Ok(Some(Value::Null)),
            Some(value) => self.serialize_value(&value).map(Some),
        }
    }

    /// Deserialize an input value; `None` means the key was absent.
    ///
    /// An absent value takes the configured `missing` value, and is an error
    /// only when there is none and the field is required. Present values are
    /// checked against allow-none before the field kind handles them.
    pub fn deserialize(&self, value: Option<&Value>) -> Result<Option<Value>, ValidateError> {
        match value {
            None => match self.options.missing.as_ref().and_then(Missing::value) {
                Some(missing) => Ok(Some(missing.clone())),
                None if self.options.is_required() => {
                    Err(ValidateError::at("", "Missing data for required field."))
                }
                None => Ok(None),
            },
            Some(Value::Null) if self.options.allows_none() => Ok(Some(Value::Null)),
            Some(Value::Null) => Err(ValidateError::at("", "Field may not be null.")),
            Some(value) => self.deserialize_value(value).map(Some),
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidateError> {
        self.deserialize(Some(value)).map(|_| ())
    }

    fn serialize_value(&self, value: &Value) -> Result<Value, ValidateError> {
        match &self.kind {
            FieldKind::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(ValidateError::at("", "Not a valid string.")),
            },
            FieldKind::List(container) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ValidateError::at("", "Not a valid list."))?;
                collect_items(items, |item| match item {
                    Value::Null => Ok(Value::Null),
                    item => container.serialize_value(item),
                })
                .map(Value::Array)
            }
            FieldKind::Nested(nested) => {
                let schema = nested.registry.resolve_scheme(&nested.scheme)?;
                let filter = self.filter();
                if self.options.is_many() {
                    let items = value
                        .as_array()
                        .ok_or_else(|| ValidateError::at("", "Invalid type."))?;
                    collect_items(items, |item| schema.dump_filtered(item, &filter))
                        .map(Value::Array)
                } else {
                    schema.dump_filtered(value, &filter)
                }
            }
            // Scalars serialize through the same normalization as loading.
            _ => self.deserialize_value(value),
        }
    }

    fn deserialize_value(&self, value: &Value) -> Result<Value, ValidateError> {
        match &self.kind {
            FieldKind::Raw => Ok(value.clone()),
            FieldKind::Boolean => parse_bool(value)
                .map(Value::Bool)
                .ok_or_else(|| ValidateError::at("", "Not a valid boolean.")),
            FieldKind::Integer => parse_integer(value)
                .ok_or_else(|| ValidateError::at("", "Not a valid integer.")),
            FieldKind::Float | FieldKind::TimeDelta => parse_float(value)
                .ok_or_else(|| ValidateError::at("", "Not a valid number.")),
            FieldKind::Decimal => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(ValidateError::at("", "Not a valid decimal.")),
                };
                rust_decimal::Decimal::from_str(text.trim())
                    .map(|d| Value::String(d.to_string()))
                    .map_err(|_| ValidateError::at("", "Not a valid decimal."))
            }
            FieldKind::String => value
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| ValidateError::at("", "Not a valid string.")),
            FieldKind::Date => parse_text::<chrono::NaiveDate>(value, "Not a valid date."),
            FieldKind::Time => parse_text::<chrono::NaiveTime>(value, "Not a valid time."),
            FieldKind::DateTime => {
                let valid = value.as_str().is_some_and(|s| {
                    chrono::DateTime::parse_from_rfc3339(s).is_ok()
                        || s.parse::<chrono::NaiveDateTime>().is_ok()
                });
                if valid {
                    Ok(value.clone())
                } else {
                    Err(ValidateError::at("", "Not a valid datetime."))
                }
            }
            FieldKind::Uuid => value
                .as_str()
                .and_then(|s| uuid::Uuid::parse_str(s).ok())
                .map(|u| Value::String(u.to_string()))
                .ok_or_else(|| ValidateError::at("", "Not a valid UUID.")),
            FieldKind::List(container) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ValidateError::at("", "Not a valid list."))?;
                collect_items(items, |item| match container.deserialize(Some(item))? {
                    Some(v) => Ok(v),
                    None => Ok(Value::Null),
                })
                .map(Value::Array)
            }
            FieldKind::Nested(nested) => {
                let schema = nested.registry.resolve_scheme(&nested.scheme)?;
                let filter = self.filter();
                if self.options.is_many() {
                    let items = value
                        .as_array()
                        .ok_or_else(|| ValidateError::at("", "Invalid type."))?;
                    collect_items(items, |item| schema.load_filtered(item, &filter))
                        .map(Value::Array)
                } else {
                    schema.load_filtered(value, &filter)
                }
            }
        }
    }

    fn filter(&self) -> FieldFilter {
        FieldFilter {
            only: self.options.only.clone(),
            exclude: self.options.exclude.clone().unwrap_or_default(),
        }
    }

    /// JSON Schema fragment describing accepted input.
    pub(crate) fn json_schema(&self, defs: &mut JsonSchemaDefs) -> Result<Value, ConversionError> {
        let mut schema = match &self.kind {
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::Integer => json!({ "type": "integer" }),
            FieldKind::Float | FieldKind::TimeDelta => json!({ "type": "number" }),
            FieldKind::Decimal => json!({ "type": ["string", "number"] }),
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Date => json!({ "type": "string", "format": "date" }),
            FieldKind::DateTime => json!({ "type": "string", "format": "date-time" }),
            FieldKind::Time => json!({ "type": "string", "format": "time" }),
            FieldKind::Uuid => json!({ "type": "string", "format": "uuid" }),
            FieldKind::Raw => json!({}),
            FieldKind::List(container) => {
                json!({ "type": "array", "items": container.json_schema(defs)? })
            }
            FieldKind::Nested(nested) => {
                let schema = nested.registry.resolve_scheme(&nested.scheme)?;
                let reference = defs.reference(&schema, &self.filter())?;
                if self.options.is_many() {
                    json!({ "type": "array", "items": reference })
                } else {
                    reference
                }
            }
        };

        if self.options.is_dump_only() {
            if let Value::Object(map) = &mut schema {
                map.insert("readOnly".to_string(), Value::Bool(true));
            }
        }
        if let Some(description) = self.options.metadata.get("description") {
            if let Value::Object(map) = &mut schema {
                map.insert("description".to_string(), description.clone());
            }
        }
        if self.options.allows_none() {
            schema = json!({ "anyOf": [schema, { "type": "null" }] });
        }
        Ok(schema)
    }

    /// Human-readable summary used by the CLI.
    pub fn describe(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.kind.name().into()));
        let options = &self.options;
        out.insert("required".into(), Value::Bool(options.is_required()));
        out.insert("allow_none".into(), Value::Bool(options.allows_none()));
        if let Some(missing) = &options.missing {
            out.insert(
                "missing".into(),
                missing.value().cloned().unwrap_or_else(|| json!("<absent>")),
            );
        }
        if let Some(default) = &options.default {
            out.insert("default".into(), default.clone());
        }
        for (key, flag) in [
            ("dump_only", options.dump_only),
            ("load_only", options.load_only),
            ("many", options.many),
        ] {
            if flag == Some(true) {
                out.insert(key.into(), Value::Bool(true));
            }
        }
        if !options.metadata.is_empty() {
            out.insert("metadata".into(), Value::Object(options.metadata.clone()));
        }
        match &self.kind {
            FieldKind::List(container) => {
                out.insert("container".into(), container.describe());
            }
            FieldKind::Nested(nested) => {
                out.insert("schema".into(), Value::String(nested.scheme.name().to_string()));
                if let Some(only) = &options.only {
                    out.insert("only".into(), json!(only));
                }
                if let Some(exclude) = &options.exclude {
                    out.insert("exclude".into(), json!(exclude));
                }
            }
            _ => {}
        }
        Value::Object(out)
    }
}

/// A field held by a schema: concrete, or deferred until first use.
#[derive(Debug, Clone)]
pub enum SchemaField {
    Concrete(Field),
    Thunked(ThunkedField),
}

impl From<Field> for SchemaField {
    fn from(field: Field) -> Self {
        SchemaField::Concrete(field)
    }
}

impl From<ThunkedField> for SchemaField {
    fn from(field: ThunkedField) -> Self {
        SchemaField::Thunked(field)
    }
}

impl SchemaField {
    pub fn is_thunked(&self) -> bool {
        matches!(self, SchemaField::Thunked(_))
    }

    /// The concrete field, constructing it first for thunks.
    ///
    /// # Errors
    ///
    /// Returns a `ConversionError` when a thunk still cannot be resolved.
    pub fn resolve(&self) -> Result<&Field, ConversionError> {
        match self {
            SchemaField::Concrete(field) => Ok(field),
            SchemaField::Thunked(thunk) => thunk.resolve()?.resolve(),
        }
    }

    pub fn kind(&self) -> Result<&FieldKind, ConversionError> {
        self.resolve().map(Field::kind)
    }

    pub fn options(&self) -> Result<&FieldOptions, ConversionError> {
        self.resolve().map(Field::options)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            SchemaField::Concrete(field) => field.name(),
            SchemaField::Thunked(thunk) => thunk.name(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            SchemaField::Concrete(field) => field.parent(),
            SchemaField::Thunked(thunk) => thunk.parent(),
        }
    }

    pub fn bind(&mut self, name: &str, parent: &str) {
        match self {
            SchemaField::Concrete(field) => field.bind(name, parent),
            SchemaField::Thunked(thunk) => thunk.bind(name, parent),
        }
    }

    pub fn get_value(&self, attr: &str, obj: &Value) -> Result<Option<Value>, ConversionError> {
        Ok(self.resolve()?.get_value(attr, obj))
    }

    pub fn serialize(&self, attr: &str, obj: &Value) -> Result<Option<Value>, ValidateError> {
        self.resolve()?.serialize(attr, obj)
    }

    pub fn deserialize(&self, value: Option<&Value>) -> Result<Option<Value>, ValidateError> {
        self.resolve()?.deserialize(value)
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidateError> {
        self.resolve()?.validate(value)
    }

    fn serialize_value(&self, value: &Value) -> Result<Value, ValidateError> {
        self.resolve()?.serialize_value(value)
    }

    pub(crate) fn json_schema(&self, defs: &mut JsonSchemaDefs) -> Result<Value, ConversionError> {
        self.resolve()?.json_schema(defs)
    }

    /// Summary of the field; unresolvable thunks describe their target.
    pub fn describe(&self) -> Value {
        match self {
            SchemaField::Concrete(field) => field.describe(),
            SchemaField::Thunked(thunk) => match thunk.resolve() {
                Ok(inner) => {
                    let mut described = inner.describe();
                    if let Value::Object(map) = &mut described {
                        map.insert("thunked".into(), Value::Bool(true));
                    }
                    described
                }
                Err(err) => json!({
                    "type": "Thunked",
                    "target": thunk.target().to_string(),
                    "error": err.to_string(),
                }),
            },
        }
    }
}

/// `$defs` accumulated while exporting nested schemas.
#[derive(Debug, Default)]
pub(crate) struct JsonSchemaDefs {
    defs: Map<String, Value>,
    // Keys handed out so far, per schema name and filter.
    keys: HashMap<(String, FieldFilter), String>,
    visiting: HashSet<String>,
}

impl JsonSchemaDefs {
    /// `$ref` to the definition of `schema` under `filter`, exporting it on
    /// first use.
    fn reference(
        &mut self,
        schema: &crate::schema::Schema,
        filter: &FieldFilter,
    ) -> Result<Value, ConversionError> {
        let key = self.key_for(schema.name(), filter);
        if !self.defs.contains_key(&key) && self.visiting.insert(key.clone()) {
            let definition = schema.object_schema(filter, self);
            self.visiting.remove(&key);
            self.defs.insert(key.clone(), definition?);
        }
        Ok(json!({ "$ref": format!("#/$defs/{key}") }))
    }

    /// Readable keys can collide across filters (`only: [a, b]` and
    /// `only: [a_b]`), so a taken key gets a numeric suffix.
    fn key_for(&mut self, schema: &str, filter: &FieldFilter) -> String {
        let lookup = (schema.to_string(), filter.clone());
        if let Some(key) = self.keys.get(&lookup) {
            return key.clone();
        }
        let base = filter.def_key(schema);
        let mut key = base.clone();
        let mut n = 2;
        while self.keys.values().any(|taken| *taken == key) {
            key = format!("{base}_{n}");
            n += 1;
        }
        self.keys.insert(lookup, key.clone());
        key
    }

    pub(crate) fn into_defs(self) -> Map<String, Value> {
        self.defs
    }
}

fn collect_items<F>(items: &[Value], mut f: F) -> Result<Vec<Value>, ValidateError>
where
    F: FnMut(&Value) -> Result<Value, ValidateError>,
{
    let mut out = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match f(item) {
            Ok(value) => out.push(value),
            Err(err @ ValidateError::Invalid { .. }) => {
                if let ValidateError::Invalid { errors: nested } = err.nest(&i.to_string()) {
                    errors.extend(nested);
                }
            }
            Err(other) => return Err(other),
        }
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.as_str() {
            "true" | "True" | "TRUE" | "1" | "yes" | "on" => Some(true),
            "false" | "False" | "FALSE" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn parse_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

fn parse_text<T: FromStr>(value: &Value, message: &str) -> Result<Value, ValidateError> {
    match value.as_str() {
        Some(s) if s.parse::<T>().is_ok() => Ok(value.clone()),
        _ => Err(ValidateError::at("", message)),
    }
}
