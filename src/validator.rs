//! Payload validation against exported JSON Schemas.

use serde_json::Value;

use crate::error::{FieldError, ValidateError};
use crate::schema::Schema;

/// Validate a payload against a schema's JSON Schema export.
///
/// Exports the schema, then validates the payload against the exported
/// document. This checks the payload's shape only. [`Schema::validate`]
/// runs [`Schema::load`] instead and also checks formats the JSON Schema
/// cannot express.
///
/// # Errors
///
/// Returns `ValidateError::Conversion` if the export fails, or
/// `ValidateError::Invalid` if the payload doesn't match.
pub fn validate(schema: &Schema, payload: &Value) -> Result<(), ValidateError> {
    let document = schema.json_schema()?;
    validate_against_schema(&document, payload)
}

/// Validate a payload against an already exported JSON Schema.
///
/// Use this when validating many payloads against the same schema.
pub fn validate_against_schema(schema: &Value, payload: &Value) -> Result<(), ValidateError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ValidateError::InvalidSchema {
        message: e.to_string(),
    })?;

    let errors: Vec<FieldError> = validator
        .iter_errors(payload)
        .map(|e| FieldError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}
