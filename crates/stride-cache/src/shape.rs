//! Structural validation of cached documents.
//!
//! Payloads are opaque to the cache, but a handful of fields must look right
//! before an entry is accepted: identifying fields must be non-empty, and
//! collection fields must have the right JSON type. Anything else is left
//! alone.

use std::collections::HashMap;

use stride_types::{Document, ResourceKind};
use thiserror::Error;

/// Reasons a document fails its shape check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("payload is not an object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{0}' is empty")]
    EmptyField(String),

    #[error("field '{field}' should be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    /// Non-empty string or a number.
    Identifier,
    Array,
    Object,
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    rule: Rule,
    required: bool,
}

/// Expected shape of a top-level JSON object.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    fields: Vec<FieldRule>,
}

impl Shape {
    /// An object with no field constraints.
    pub fn object() -> Self {
        Self::default()
    }

    /// Require a non-empty identifying field.
    pub fn identifier(self, name: impl Into<String>) -> Self {
        self.with_rule(name, Rule::Identifier, true)
    }

    /// If present, the field must be an array.
    pub fn array(self, name: impl Into<String>) -> Self {
        self.with_rule(name, Rule::Array, false)
    }

    /// The field must be present and be an array.
    pub fn required_array(self, name: impl Into<String>) -> Self {
        self.with_rule(name, Rule::Array, true)
    }

    /// If present, the field must be an object.
    pub fn nested(self, name: impl Into<String>) -> Self {
        self.with_rule(name, Rule::Object, false)
    }

    fn with_rule(mut self, name: impl Into<String>, rule: Rule, required: bool) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            rule,
            required,
        });
        self
    }

    /// Check a document against this shape.
    pub fn validate(&self, doc: &Document) -> Result<(), ShapeError> {
        let object = doc.as_object().ok_or(ShapeError::NotAnObject)?;

        for field in &self.fields {
            let value = match object.get(&field.name) {
                None | Some(Document::Null) if field.required => {
                    return Err(ShapeError::MissingField(field.name.clone()));
                }
                None | Some(Document::Null) => continue,
                Some(value) => value,
            };

            match field.rule {
                Rule::Identifier => match value {
                    Document::String(s) if s.trim().is_empty() => {
                        return Err(ShapeError::EmptyField(field.name.clone()));
                    }
                    Document::String(_) | Document::Number(_) => {}
                    _ => {
                        return Err(ShapeError::WrongType {
                            field: field.name.clone(),
                            expected: "a string or number",
                        });
                    }
                },
                Rule::Array if !value.is_array() => {
                    return Err(ShapeError::WrongType {
                        field: field.name.clone(),
                        expected: "an array",
                    });
                }
                Rule::Object if !value.is_object() => {
                    return Err(ShapeError::WrongType {
                        field: field.name.clone(),
                        expected: "an object",
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Shapes registered per resource kind.
#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    shapes: HashMap<ResourceKind, Shape>,
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        let mut shapes = HashMap::new();
        shapes.insert(
            ResourceKind::Profile,
            Shape::object().identifier("userId").array("courses"),
        );
        shapes.insert(
            ResourceKind::Catalog,
            Shape::object().required_array("courses"),
        );
        shapes.insert(
            ResourceKind::Course,
            Shape::object().identifier("id").array("sessions"),
        );
        shapes.insert(
            ResourceKind::Progress,
            Shape::object().identifier("courseId").nested("completed"),
        );
        shapes.insert(
            ResourceKind::Aggregate,
            Shape::object().identifier("ownerId").required_array("resources"),
        );
        Self { shapes }
    }
}

impl ShapeRegistry {
    /// A registry with no rules beyond "must be an object".
    pub fn permissive() -> Self {
        Self {
            shapes: HashMap::new(),
        }
    }

    /// Replace the shape for a kind.
    pub fn register(&mut self, kind: ResourceKind, shape: Shape) {
        self.shapes.insert(kind, shape);
    }

    /// Validate a document for the given kind.
    pub fn validate(&self, kind: ResourceKind, doc: &Document) -> Result<(), ShapeError> {
        match self.shapes.get(&kind) {
            Some(shape) => shape.validate(doc),
            None => Shape::object().validate(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_rules() {
        let shape = Shape::object().identifier("id");

        assert!(shape.validate(&json!({"id": "c1"})).is_ok());
        assert!(shape.validate(&json!({"id": 42})).is_ok());
        assert_eq!(
            shape.validate(&json!({})),
            Err(ShapeError::MissingField("id".into()))
        );
        assert_eq!(
            shape.validate(&json!({"id": "  "})),
            Err(ShapeError::EmptyField("id".into()))
        );
        assert!(matches!(
            shape.validate(&json!({"id": ["x"]})),
            Err(ShapeError::WrongType { .. })
        ));
    }

    #[test]
    fn test_collection_rules() {
        let shape = Shape::object().array("sessions").nested("meta");

        assert!(shape.validate(&json!({})).is_ok());
        assert!(shape.validate(&json!({"sessions": [], "meta": {}})).is_ok());
        assert!(shape.validate(&json!({"sessions": "nope"})).is_err());
        assert!(shape.validate(&json!({"meta": 3})).is_err());
    }

    #[test]
    fn test_required_array() {
        let shape = Shape::object().required_array("resources");
        assert_eq!(
            shape.validate(&json!({"resources": null})),
            Err(ShapeError::MissingField("resources".into()))
        );
    }

    #[test]
    fn test_non_object_rejected() {
        assert_eq!(
            Shape::object().validate(&json!([1, 2])),
            Err(ShapeError::NotAnObject)
        );
    }

    #[test]
    fn test_default_registry_course_shape() {
        let registry = ShapeRegistry::default();
        assert!(
            registry
                .validate(ResourceKind::Course, &json!({"id": "c1", "sessions": []}))
                .is_ok()
        );
        assert!(
            registry
                .validate(ResourceKind::Course, &json!({"sessions": []}))
                .is_err()
        );
    }
}
