//! Schema options: what a schema declares, and what it ends up with once
//! its ancestors' declarations are merged in.

use crate::class::ClassRef;
use crate::converter::{Converter, ConverterFactory};
use crate::options::{merge_configs, FieldConfigs};
use crate::registry::TypeRegistry;

/// Options declared on a single schema.
///
/// `None` means "not declared here", so an ancestor's value shows through.
#[derive(Debug, Clone, Default)]
pub struct SchemaMeta {
    pub target: Option<ClassRef>,
    pub registry: Option<TypeRegistry>,
    pub converter_factory: Option<ConverterFactory>,
    pub register_as_scheme: Option<bool>,
    pub fields: FieldConfigs,
    pub exclude: Vec<String>,
    /// Whether dumped output keeps values equal to the target's defaults.
    pub dump_default_fields: Option<bool>,
}

/// Effective options of a built schema.
#[derive(Debug, Clone)]
pub struct SchemaOpts {
    pub target: Option<ClassRef>,
    pub registry: TypeRegistry,
    pub converter_factory: ConverterFactory,
    pub register_as_scheme: bool,
    pub field_configs: FieldConfigs,
    pub exclude: Vec<String>,
    pub dump_default_fields: bool,
    /// Converter created from `converter_factory` over `registry`.
    pub converter: Converter,
}

impl SchemaOpts {
    /// Merge `metas`, oldest first, so later declarations win.
    ///
    /// Scalar options are replaced, field configs are merged per name and
    /// key, and exclude lists accumulate.
    pub fn merge<'a>(metas: impl IntoIterator<Item = &'a SchemaMeta>) -> Self {
        let mut target = None;
        let mut registry = None;
        let mut converter_factory = None;
        let mut register_as_scheme = None;
        let mut dump_default_fields = None;
        let mut field_configs = FieldConfigs::new();
        let mut exclude: Vec<String> = Vec::new();

        for meta in metas {
            if meta.target.is_some() {
                target.clone_from(&meta.target);
            }
            if meta.registry.is_some() {
                registry.clone_from(&meta.registry);
            }
            if meta.converter_factory.is_some() {
                converter_factory.clone_from(&meta.converter_factory);
            }
            register_as_scheme = meta.register_as_scheme.or(register_as_scheme);
            dump_default_fields = meta.dump_default_fields.or(dump_default_fields);
            merge_configs(&mut field_configs, &meta.fields);
            for name in &meta.exclude {
                if !exclude.contains(name) {
                    exclude.push(name.clone());
                }
            }
        }

        let registry = registry.unwrap_or_default();
        let converter_factory = converter_factory.unwrap_or_default();
        let converter = converter_factory.create(&registry);
        Self {
            target,
            registry,
            converter_factory,
            register_as_scheme: register_as_scheme.unwrap_or(false),
            field_configs,
            exclude,
            dump_default_fields: dump_default_fields.unwrap_or(true),
            converter,
        }
    }
}
