//! Annotated Schema
//!
//! Derive serialization schema fields from class type annotations.
//!
//! Classes are described explicitly (name, bases, annotated attributes) and
//! a [`Schema`] targeting a class gets one field per annotation. Each type
//! hint is resolved through a [`TypeRegistry`] mapping types to field
//! factories; schemas can register themselves so other classes can refer to
//! their target type.
//!
//! # Example
//!
//! ```
//! use annotated_schema::{ClassDef, FieldOptions, Schema, TypeHint, TypeRegistry};
//! use serde_json::json;
//!
//! let registry = TypeRegistry::new();
//!
//! let artist = ClassDef::builder("Artist")
//!     .annotate("id", TypeHint::parse("UUID").unwrap())
//!     .annotate("name", TypeHint::parse("str").unwrap())
//!     .build()
//!     .unwrap();
//! let album = ClassDef::builder("Album")
//!     .annotate("title", TypeHint::parse("str").unwrap())
//!     .annotate("artists", TypeHint::parse("List[Artist]").unwrap())
//!     .annotate("year", TypeHint::parse("Optional[int]").unwrap())
//!     .build()
//!     .unwrap();
//!
//! Schema::builder("ArtistSchema")
//!     .target(&artist)
//!     .registry(&registry)
//!     .register_as_scheme(true)
//!     .build()
//!     .unwrap();
//! let album_schema = Schema::builder("AlbumSchema")
//!     .target(&album)
//!     .registry(&registry)
//!     .field_config("title", FieldOptions::new().missing(json!("Untitled")))
//!     .build()
//!     .unwrap();
//!
//! let loaded = album_schema
//!     .load(&json!({
//!         "artists": [{ "id": "67e55044-10b1-426f-9247-bb680e5fe0c8", "name": "Tool" }]
//!     }))
//!     .unwrap();
//!
//! // A list of a registered schema's target becomes a single nested field
//! // with `many` set; the optional year is simply left out.
//! assert_eq!(loaded["title"], "Untitled");
//! assert_eq!(loaded["artists"][0]["name"], "Tool");
//! assert!(loaded.get("year").is_none());
//! ```
//!
//! # Conversion Rules
//!
//! | Hint | Field |
//! |------|-------|
//! | `T` | factory registered for `T`, required, not nullable |
//! | `Optional[T]` | as `T`, nullable, not required, no load default |
//! | `List[T]` | list of the field for `T` |
//! | `List[T]`, `T` a registered schema target | nested field with `many` |
//! | `ClassVar[T]` | skipped |
//!
//! Unregistered types are always an error; nothing falls back to an
//! untyped field.

mod class;
mod converter;
mod error;
pub mod ext;
mod fields;
mod hint;
mod loader;
mod meta;
mod options;
mod registry;
mod schema;
mod thunk;
mod validator;

pub use class::{Attribute, ClassBuilder, ClassDef, ClassRef};
pub use converter::{BaseHooks, Converter, ConverterFactory, ConverterHooks, FieldSite};
pub use error::{AnnotationError, ConversionError, FieldError, LoadError, ValidateError};
pub use fields::{Field, FieldKind, Nested, SchemaField};
pub use hint::{builtin, TypeHint, SEQUENCE_ORIGINS};
pub use loader::{load_json, load_json_str, load_model, load_model_str, Model};
pub use meta::{SchemaMeta, SchemaOpts};
pub use options::{merge_configs, FieldConfigs, FieldOptions, Missing};
pub use registry::{default_factories, FieldFactory, TypeRegistry};
pub use schema::{FieldFilter, Schema, SchemaBuilder, SchemeRef, JSON_SCHEMA_DIALECT};
pub use thunk::ThunkedField;
pub use validator::{validate, validate_against_schema};
