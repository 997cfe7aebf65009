//! Dataclass-style records.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{dump_only_unless_init, optional_if_defaulted, record_defaults};
use crate::class::ClassDef;
use crate::converter::{Converter, ConverterFactory, ConverterHooks, FieldSite};
use crate::error::ConversionError;
use crate::fields::SchemaField;
use crate::hint::{builtin, TypeHint};
use crate::options::FieldOptions;
use crate::registry::{FieldFactory, TypeRegistry};
use crate::schema::{Schema, SchemaBuilder};

/// Hooks for dataclass-style targets.
///
/// - init attributes with a plain default supply the load default
/// - any default (plain or factory) makes the field optional
/// - attributes excluded from the constructor are dump-only
/// - `InitVar[T]` converts as `T`
#[derive(Debug, Default, Clone, Copy)]
pub struct DataclassHooks;

impl ConverterHooks for DataclassHooks {
    fn install(&self, registry: &TypeRegistry) {
        let init_var = TypeHint::named(builtin::INIT_VAR);
        if !registry.has(&init_var) {
            let factory = FieldFactory::new("InitVarFieldFactory", init_var_factory);
            registry.register(init_var, factory);
        }
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

fn init_var_factory(
    converter: &Converter,
    subtypes: &[TypeHint],
    options: FieldOptions,
) -> Result<SchemaField, ConversionError> {
    match subtypes.first() {
        Some(inner) => converter.convert(inner, options),
        None => Err(ConversionError::UnregisteredType {
            hint: builtin::INIT_VAR.to_string(),
        }),
    }
}

pub fn converter_factory() -> ConverterFactory {
    ConverterFactory::with_hooks("dataclass", Arc::new(DataclassHooks))
}

/// Schema builder using the dataclass converter.
pub fn schema(name: impl Into<String>) -> SchemaBuilder {
    Schema::builder(name).converter_factory(converter_factory())
}
