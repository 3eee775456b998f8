//! Typed output schemas handed to the structured generation client.
//!
//! A schema is built once per stage and validated at construction time, so a
//! malformed descriptor never reaches the model. The same value validates the
//! model's JSON before it is deserialized into the stage's Rust type.

use std::collections::HashSet;

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("schema '{0}' declares no fields")]
    Empty(String),

    #[error("schema '{schema}' has a field with an empty name")]
    EmptyFieldName { schema: String },

    #[error("schema '{schema}' declares field '{field}' more than once")]
    DuplicateField { schema: String, field: String },

    #[error("expected a JSON object at '{path}'")]
    NotAnObject { path: String },

    #[error("missing required field '{path}'")]
    MissingField { path: String },

    #[error("field '{path}' should be {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: &'static str,
    },
}

/// The shape of a single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Number,
    ArrayOf(Box<FieldKind>),
    Object(OutputSchema),
}

impl FieldKind {
    pub fn array_of(inner: FieldKind) -> Self {
        FieldKind::ArrayOf(Box::new(inner))
    }

    fn describe(&self) -> String {
        match self {
            FieldKind::String => "a string".to_string(),
            FieldKind::Number => "a number".to_string(),
            FieldKind::ArrayOf(inner) => format!("an array of {}", inner.describe()),
            FieldKind::Object(schema) => format!("an object '{}'", schema.name),
        }
    }

    fn to_json_schema(&self) -> Value {
        match self {
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Number => json!({ "type": "number" }),
            FieldKind::ArrayOf(inner) => json!({ "type": "array", "items": inner.to_json_schema() }),
            FieldKind::Object(schema) => schema.to_json_schema(),
        }
    }

    fn check(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let matches = match (self, value) {
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::ArrayOf(inner), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.check(item, &format!("{path}[{i}]"))?;
                }
                true
            }
            (FieldKind::Object(schema), Value::Object(_)) => {
                return schema.validate_at(value, path);
            }
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            Err(SchemaError::TypeMismatch {
                path: path.to_string(),
                expected: self.describe(),
                found: json_type_name(value),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

/// A named object schema: an ordered list of fields with required-ness.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn builder(name: impl Into<String>) -> OutputSchemaBuilder {
        OutputSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Checks that `value` is an object carrying every required field with the
    /// declared type. Optional fields may be absent or null; unknown fields are ignored.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let object = value.as_object().ok_or_else(|| SchemaError::NotAnObject {
            path: path.to_string(),
        })?;

        for field in &self.fields {
            let field_path = format!("{path}.{}", field.name);
            match object.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(SchemaError::MissingField { path: field_path });
                }
                None | Some(Value::Null) => {}
                Some(v) => field.kind.check(v, &field_path)?,
            }
        }

        Ok(())
    }

    /// Renders the schema as a JSON-Schema-like object for inclusion in prompts.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.kind.to_json_schema());
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_fields().collect::<Vec<_>>(),
        })
    }
}

pub struct OutputSchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
}

impl OutputSchemaBuilder {
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    pub fn build(self) -> Result<OutputSchema, SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty(self.name));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(SchemaError::EmptyFieldName { schema: self.name });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(OutputSchema {
            name: self.name,
            fields: self.fields,
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword_schema() -> OutputSchema {
        OutputSchema::builder("keywords")
            .required("matchingKeywords", FieldKind::array_of(FieldKind::String))
            .required("score", FieldKind::Number)
            .optional("title", FieldKind::String)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_empty_schema() {
        let err = OutputSchema::builder("empty").build().unwrap_err();
        assert_eq!(err, SchemaError::Empty("empty".to_string()));
    }

    #[test]
    fn test_builder_rejects_duplicate_fields() {
        let err = OutputSchema::builder("dup")
            .required("a", FieldKind::String)
            .optional("a", FieldKind::Number)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { ref field, .. } if field == "a"));
    }

    #[test]
    fn test_builder_rejects_blank_field_name() {
        let err = OutputSchema::builder("blank")
            .required("  ", FieldKind::String)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::EmptyFieldName { .. }));
    }

    #[test]
    fn test_validate_accepts_conforming_value() {
        let value = json!({ "matchingKeywords": ["Rust"], "score": 81.6 });
        assert!(keyword_schema().validate(&value).is_ok());
    }

    #[test]
    fn test_validate_reports_missing_required_field() {
        let value = json!({ "score": 10 });
        let err = keyword_schema().validate(&value).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingField {
                path: "$.matchingKeywords".to_string()
            }
        );
    }

    #[test]
    fn test_validate_treats_null_required_as_missing() {
        let value = json!({ "matchingKeywords": null, "score": 10 });
        assert!(matches!(
            keyword_schema().validate(&value),
            Err(SchemaError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_allows_null_optional_field() {
        let value = json!({ "matchingKeywords": [], "score": 1, "title": null });
        assert!(keyword_schema().validate(&value).is_ok());
    }

    #[test]
    fn test_validate_checks_array_items() {
        let value = json!({ "matchingKeywords": ["Rust", 7], "score": 1 });
        let err = keyword_schema().validate(&value).unwrap_err();
        assert!(
            matches!(err, SchemaError::TypeMismatch { ref path, found: "number", .. } if path == "$.matchingKeywords[1]")
        );
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let err = keyword_schema().validate(&json!([1, 2])).unwrap_err();
        assert_eq!(err, SchemaError::NotAnObject { path: "$".to_string() });
    }

    #[test]
    fn test_nested_object_validation_uses_nested_path() {
        let inner = OutputSchema::builder("variation")
            .required("style", FieldKind::String)
            .build()
            .unwrap();
        let schema = OutputSchema::builder("letters")
            .required("variations", FieldKind::array_of(FieldKind::Object(inner)))
            .build()
            .unwrap();

        let err = schema
            .validate(&json!({ "variations": [{ "style": "a" }, {}] }))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingField {
                path: "$.variations[1].style".to_string()
            }
        );
    }

    #[test]
    fn test_to_json_schema_lists_required_fields() {
        let rendered = keyword_schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["required"], json!(["matchingKeywords", "score"]));
        assert_eq!(rendered["properties"]["matchingKeywords"]["items"]["type"], "string");
    }
}
