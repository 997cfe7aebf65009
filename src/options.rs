//! Per-field configuration.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Per-field configuration keyed by attribute name.
pub type FieldConfigs = HashMap<String, FieldOptions>;

/// Value used when a field is absent from loaded data.
#[derive(Debug, Clone, PartialEq)]
pub enum Missing {
    /// No value is provided; the field stays absent from the output.
    Absent,
    /// Substitute this value (which may be `null`).
    Value(Value),
}

impl Missing {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Missing::Absent => None,
            Missing::Value(v) => Some(v),
        }
    }
}

impl<'de> Deserialize<'de> for Missing {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Missing::Value)
    }
}

/// Field configuration bag.
///
/// Every key is optional: `None` means "not configured", which lets
/// configuration layers be merged key by key and lets hooks fill only what
/// nobody set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldOptions {
    pub required: Option<bool>,
    pub allow_none: Option<bool>,
    /// Load-time default for absent input.
    #[serde(deserialize_with = "deserialize_missing")]
    pub missing: Option<Missing>,
    /// Dump-time default for absent attributes.
    pub default: Option<Value>,
    pub dump_only: Option<bool>,
    pub load_only: Option<bool>,
    /// Nested fields only: the value is a collection of nested objects.
    pub many: Option<bool>,
    /// Nested fields only: restrict to these nested field names.
    pub only: Option<Vec<String>>,
    /// Nested fields only: drop these nested field names.
    pub exclude: Option<Vec<String>>,
    pub metadata: Map<String, Value>,
    /// Defer construction until first use.
    pub thunked: Option<bool>,
}

// `Option<Missing>` would otherwise map an explicit `null` to `None`.
fn deserialize_missing<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Missing>, D::Error> {
    Missing::deserialize(deserializer).map(Some)
}

macro_rules! setters {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $name(mut self, value: $ty) -> Self {
                self.$name = Some(value);
                self
            }
        )*
    };
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    setters! {
        required: bool,
        allow_none: bool,
        dump_only: bool,
        load_only: bool,
        many: bool,
        thunked: bool,
    }

    /// Set the load-time default to `value`.
    pub fn missing(mut self, value: Value) -> Self {
        self.missing = Some(Missing::Value(value));
        self
    }

    /// Set the dump-time default.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Overlay `other` onto `self`: every key `other` configures wins,
    /// metadata is merged entry by entry.
    pub fn merge(&mut self, other: &FieldOptions) {
        macro_rules! overlay {
            ($($name:ident),*) => {
                $(
                    if let Some(value) = &other.$name {
                        self.$name = Some(value.clone());
                    }
                )*
            };
        }
        overlay!(
            required, allow_none, missing, default, dump_only, load_only, many, only, exclude,
            thunked
        );
        for (key, value) in &other.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    pub fn merged(mut self, other: &FieldOptions) -> Self {
        self.merge(other);
        self
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }

    pub fn allows_none(&self) -> bool {
        self.allow_none.unwrap_or(false)
    }

    pub fn is_dump_only(&self) -> bool {
        self.dump_only.unwrap_or(false)
    }

    pub fn is_load_only(&self) -> bool {
        self.load_only.unwrap_or(false)
    }

    pub fn is_many(&self) -> bool {
        self.many.unwrap_or(false)
    }

    pub fn is_thunked(&self) -> bool {
        self.thunked.unwrap_or(false)
    }
}

/// Merge `layer` into `configs` name by name.
pub fn merge_configs(configs: &mut FieldConfigs, layer: &FieldConfigs) {
    for (name, options) in layer {
        configs.entry(name.clone()).or_default().merge(options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overrides_only_configured_keys() {
        let mut base = FieldOptions::new().default_value(json!(1)).required(true);
        base.merge(&FieldOptions::new().dump_only(true));

        assert_eq!(base.default, Some(json!(1)));
        assert_eq!(base.required, Some(true));
        assert_eq!(base.dump_only, Some(true));
    }

    #[test]
    fn merge_combines_metadata() {
        let mut base = FieldOptions::new().metadata("a", json!(1)).metadata("b", json!(1));
        base.merge(&FieldOptions::new().metadata("b", json!(2)));

        assert_eq!(base.metadata["a"], json!(1));
        assert_eq!(base.metadata["b"], json!(2));
    }

    #[test]
    fn merge_configs_is_key_by_key() {
        let mut configs = FieldConfigs::new();
        configs.insert("name".into(), FieldOptions::new().default_value(json!("x")));

        let mut layer = FieldConfigs::new();
        layer.insert("name".into(), FieldOptions::new().dump_only(true));
        layer.insert("id".into(), FieldOptions::new().default_value(json!(1)));
        merge_configs(&mut configs, &layer);

        assert_eq!(configs["name"].default, Some(json!("x")));
        assert_eq!(configs["name"].dump_only, Some(true));
        assert_eq!(configs["id"].default, Some(json!(1)));
    }

    #[test]
    fn deserializes_from_json() {
        let options: FieldOptions = serde_json::from_value(json!({
            "required": false,
            "missing": null,
            "exclude": ["foo"],
            "thunked": true,
            "metadata": { "hi": "world" }
        }))
        .unwrap();

        assert_eq!(options.required, Some(false));
        assert_eq!(options.missing, Some(Missing::Value(Value::Null)));
        assert_eq!(options.exclude, Some(vec!["foo".to_string()]));
        assert!(options.is_thunked());
        assert_eq!(options.metadata["hi"], json!("world"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let result: Result<FieldOptions, _> = serde_json::from_value(json!({ "requried": true }));
        assert!(result.is_err());
    }

    #[test]
    fn unset_flags_default_to_false() {
        let options = FieldOptions::new();
        assert!(!options.is_required());
        assert!(!options.allows_none());
        assert!(!options.is_many());
        assert_eq!(options.missing, None);
    }
}
