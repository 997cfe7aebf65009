//! Attribute-based records with per-attribute metadata.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{dump_only_unless_init, optional_if_defaulted, record_defaults, site_attribute};
use crate::class::ClassDef;
use crate::converter::{Converter, ConverterFactory, ConverterHooks, FieldSite};
use crate::error::ConversionError;
use crate::hint::TypeHint;
use crate::options::FieldOptions;
use crate::schema::{Schema, SchemaBuilder};

/// Hooks for attribute-based targets.
///
/// Behaves like [`DataclassHooks`](super::dataclass::DataclassHooks) and
/// additionally copies attribute metadata into field metadata and refuses
/// targets whose annotations and record fields disagree, which happens when
/// a plain class extends a record and annotates more attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttrsHooks;

impl ConverterHooks for AttrsHooks {
    fn check_target(
        &self,
        converter: &Converter,
        target: &ClassDef,
        ignore: &HashSet<String>,
    ) -> Result<(), ConversionError> {
        let hints: BTreeSet<String> = converter
            .type_hints(target, ignore)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let fields: BTreeSet<String> = target
            .record_fields()
            .unwrap_or_default()
            .into_iter()
            .filter(|attr| !ignore.contains(&attr.name))
            .map(|attr| attr.name.clone())
            .collect();

        if hints == fields {
            return Ok(());
        }
        Err(ConversionError::MismatchedHints {
            class: target.name().to_string(),
            hints: hints.into_iter().collect(),
            fields: fields.into_iter().collect(),
        })
    }

    fn field_defaults(&self, target: &ClassDef) -> IndexMap<String, Value> {
        record_defaults(target, |attr| attr.init)
    }

    fn preprocess_typehint(
        &self,
        _hint: &TypeHint,
        options: &mut FieldOptions,
        site: &FieldSite<'_>,
    ) {
        optional_if_defaulted(options, site);
        if let Some(attr) = site_attribute(site) {
            for (key, value) in &attr.metadata {
                options
                    .metadata
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }

    fn postprocess_typehint(
        &self,
        _hint: &TypeHint,
        options: &mut FieldOptions,
        site: &FieldSite<'_>,
    ) {
        dump_only_unless_init(options, site);
    }
}

pub fn converter_factory() -> ConverterFactory {
    ConverterFactory::with_hooks("attrs", Arc::new(AttrsHooks))
}

/// Schema builder using the attrs converter.
pub fn schema(name: impl Into<String>) -> SchemaBuilder {
    Schema::builder(name).converter_factory(converter_factory())
}
