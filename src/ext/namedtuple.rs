//! Named tuples: records whose only bookkeeping is field defaults.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::record_defaults;
use crate::class::ClassDef;
use crate::converter::{ConverterFactory, ConverterHooks};
use crate::schema::{Schema, SchemaBuilder};

#[derive(Debug, Default, Clone, Copy)]
pub struct NamedTupleHooks;

impl ConverterHooks for NamedTupleHooks {
    fn field_defaults(&self, target: &ClassDef) -> IndexMap<String, Value> {
        record_defaults(target, |_| true)
    }
}

pub fn converter_factory() -> ConverterFactory {
    ConverterFactory::with_hooks("namedtuple", Arc::new(NamedTupleHooks))
}

/// Schema builder using the namedtuple converter.
///
/// Combine with [`SchemaBuilder::dump_default_fields`] to leave values equal
/// to their defaults out of dumped output.
pub fn schema(name: impl Into<String>) -> SchemaBuilder {
    Schema::builder(name).converter_factory(converter_factory())
}
