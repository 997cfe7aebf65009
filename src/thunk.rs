//! Deferred fields for types that are registered after the schema that
//! references them.

use std::fmt;
use std::sync::OnceLock;

use crate::converter::Converter;
use crate::error::ConversionError;
use crate::fields::SchemaField;
use crate::hint::TypeHint;
use crate::options::FieldOptions;

/// A field whose construction waits until first use.
///
/// Holds everything needed to run the registry lookup later. The first
/// operation that needs the real field resolves it; when the target type is
/// still unregistered at that point the operation fails with a
/// [`ConversionError`] and the thunk stays unresolved.
#[derive(Clone)]
pub struct ThunkedField {
    converter: Converter,
    target: TypeHint,
    subtypes: Vec<TypeHint>,
    options: FieldOptions,
    name: Option<String>,
    parent: Option<String>,
    inner: OnceLock<Box<SchemaField>>,
}

impl ThunkedField {
    pub fn new(
        converter: Converter,
        target: TypeHint,
        subtypes: Vec<TypeHint>,
        options: FieldOptions,
    ) -> Self {
        Self {
            converter,
            target,
            subtypes,
            options,
            name: None,
            parent: None,
            inner: OnceLock::new(),
        }
    }

    pub fn target(&self) -> &TypeHint {
        &self.target
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.get().is_some()
    }

    /// The inner field, constructing it on first call.
    ///
    /// # Errors
    ///
    /// Returns the conversion error raised by the registry lookup or the
    /// field factory.
    pub fn resolve(&self) -> Result<&SchemaField, ConversionError> {
        if let Some(inner) = self.inner.get() {
            return Ok(inner);
        }

        let mut field = self.converter.construct(
            &self.target,
            &self.subtypes,
            self.options.clone(),
        )?;
        if let (Some(name), Some(parent)) = (&self.name, &self.parent) {
            field.bind(name, parent);
        }
        tracing::debug!(target_type = %self.target, field = ?self.name, "resolved thunked field");

        // A concurrent resolution may have won; either result is equivalent.
        Ok(self.inner.get_or_init(|| Box::new(field)))
    }

    pub fn name(&self) -> Option<&str> {
        match self.inner.get() {
            Some(inner) => inner.name(),
            None => self.name.as_deref(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self.inner.get() {
            Some(inner) => inner.parent(),
            None => self.parent.as_deref(),
        }
    }

    /// Attach to a schema. Stored locally until the inner field exists.
    pub fn bind(&mut self, name: &str, parent: &str) {
        self.name = Some(name.to_string());
        self.parent = Some(parent.to_string());
        if let Some(inner) = self.inner.get_mut() {
            inner.bind(name, parent);
        }
    }
}

impl fmt::Debug for ThunkedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.get() {
            Some(inner) => f.debug_tuple("ThunkedField").field(inner).finish(),
            None => write!(f, "ThunkedField({} UNINITIALIZED)", self.target),
        }
    }
}
