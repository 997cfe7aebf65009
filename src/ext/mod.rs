//! Converters for record-like classes.
//!
//! Record-like classes track per-attribute bookkeeping (defaults,
//! constructor participation, metadata) on top of their annotations. Each
//! submodule provides [`ConverterHooks`](crate::ConverterHooks) that feed
//! that bookkeeping into field options, a matching
//! [`ConverterFactory`](crate::ConverterFactory), and a schema builder
//! preconfigured with it.

pub mod attrs;
pub mod dataclass;
pub mod namedtuple;

use indexmap::IndexMap;
use serde_json::Value;

use crate::class::{Attribute, ClassDef};
use crate::converter::FieldSite;
use crate::options::{FieldOptions, Missing};

/// Plain defaults of the record fields selected by `include`.
fn record_defaults<F>(target: &ClassDef, include: F) -> IndexMap<String, Value>
where
    F: Fn(&Attribute) -> bool,
{
    target
        .record_fields()
        .unwrap_or_default()
        .into_iter()
        .filter(|attr| include(attr))
        .filter_map(|attr| attr.default.clone().map(|value| (attr.name.clone(), value)))
        .collect()
}

fn site_attribute<'a>(site: &FieldSite<'a>) -> Option<&'a Attribute> {
    site.target.record_field(site.name)
}

/// A defaulted attribute may be omitted on load, unless configured otherwise.
fn optional_if_defaulted(options: &mut FieldOptions, site: &FieldSite<'_>) {
    if site_attribute(site).is_some_and(Attribute::has_default) {
        options.required.get_or_insert(false);
        options.missing.get_or_insert(Missing::Absent);
    }
}

/// Attributes the constructor does not accept can only be dumped.
fn dump_only_unless_init(options: &mut FieldOptions, site: &FieldSite<'_>) {
    if site_attribute(site).is_some_and(|attr| !attr.init) {
        options.dump_only = Some(true);
    }
}
