//! Structured-output model registry.
//!
//! Model definitions arrive as data inside a workflow bundle and are
//! compiled once per load into two artifacts: a JSON-schema description
//! used for the provider's response-format contract, and a recursive
//! validator over arbitrary JSON.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Recursion guard for nested model expansion in JSON schemas.
const MAX_MODEL_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("circular inheritance involving model: {0}")]
    CircularInheritance(String),

    #[error("model nesting too deep at: {0}")]
    TooDeep(String),
}

/// A single validation failure with its JSON-pointer-ish path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Field types supported by the structured-output system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Optional { of: Box<FieldType> },
    List { of: Box<FieldType> },
    Dict { of: Box<FieldType> },
    Enum { values: Vec<String> },
    Union { of: Vec<FieldType> },
    Model { name: String },
}

/// A named model with referential inheritance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,
    pub fields: BTreeMap<String, FieldType>,
}

/// The compiled registry of structured-output models for one bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    models: BTreeMap<String, ModelDef>,
}

impl SchemaRegistry {
    pub fn from_models(models: Vec<ModelDef>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Referential integrity: every referenced model exists and the
    /// inheritance graph is acyclic.
    pub fn check_integrity(&self) -> Result<(), SchemaError> {
        for model in self.models.values() {
            self.effective_fields(&model.name)?;
            for field in model.fields.values() {
                self.check_field_refs(field)?;
            }
        }
        Ok(())
    }

    fn check_field_refs(&self, field: &FieldType) -> Result<(), SchemaError> {
        match field {
            FieldType::Optional { of } | FieldType::List { of } | FieldType::Dict { of } => {
                self.check_field_refs(of)
            }
            FieldType::Union { of } => {
                for inner in of {
                    self.check_field_refs(inner)?;
                }
                Ok(())
            }
            FieldType::Model { name } => {
                if self.contains(name) {
                    Ok(())
                } else {
                    Err(SchemaError::UnknownModel(name.clone()))
                }
            }
            _ => Ok(()),
        }
    }

    /// Own fields plus inherited fields, child definitions winning.
    pub fn effective_fields(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, FieldType>, SchemaError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());

        while let Some(model_name) = current {
            if !seen.insert(model_name.clone()) {
                return Err(SchemaError::CircularInheritance(model_name));
            }
            let model = self
                .models
                .get(&model_name)
                .ok_or_else(|| SchemaError::UnknownModel(model_name.clone()))?;
            chain.push(model);
            current = model.inherits.clone();
        }

        let mut fields = BTreeMap::new();
        // Base first so derived models override.
        for model in chain.iter().rev() {
            for (field_name, field_type) in &model.fields {
                fields.insert(field_name.clone(), field_type.clone());
            }
        }
        Ok(fields)
    }

    /// JSON schema for the provider's structured-output contract.
    pub fn json_schema(&self, name: &str) -> Result<Value, SchemaError> {
        self.model_schema(name, 0)
    }

    fn model_schema(&self, name: &str, depth: usize) -> Result<Value, SchemaError> {
        if depth > MAX_MODEL_DEPTH {
            return Err(SchemaError::TooDeep(name.to_string()));
        }
        let fields = self.effective_fields(name)?;

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (field_name, field_type) in &fields {
            properties.insert(field_name.clone(), self.field_schema(field_type, depth)?);
            if !matches!(field_type, FieldType::Optional { .. }) {
                required.push(Value::String(field_name.clone()));
            }
        }

        Ok(json!({
            "type": "object",
            "title": name,
            "properties": Value::Object(properties),
            "required": required,
            "additionalProperties": false,
        }))
    }

    fn field_schema(&self, field: &FieldType, depth: usize) -> Result<Value, SchemaError> {
        Ok(match field {
            FieldType::String => json!({ "type": "string" }),
            FieldType::Integer => json!({ "type": "integer" }),
            FieldType::Number => json!({ "type": "number" }),
            FieldType::Boolean => json!({ "type": "boolean" }),
            FieldType::Optional { of } => {
                let inner = self.field_schema(of, depth)?;
                json!({ "anyOf": [inner, { "type": "null" }] })
            }
            FieldType::List { of } => {
                json!({ "type": "array", "items": self.field_schema(of, depth)? })
            }
            FieldType::Dict { of } => {
                json!({ "type": "object", "additionalProperties": self.field_schema(of, depth)? })
            }
            FieldType::Enum { values } => json!({ "type": "string", "enum": values }),
            FieldType::Union { of } => {
                let schemas = of
                    .iter()
                    .map(|t| self.field_schema(t, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                json!({ "anyOf": schemas })
            }
            FieldType::Model { name } => self.model_schema(name, depth + 1)?,
        })
    }

    /// Validate arbitrary JSON against a model.
    pub fn validate_value(&self, name: &str, value: &Value) -> Result<(), Vec<ValidationError>> {
        let fields = self.effective_fields(name).map_err(|e| {
            vec![ValidationError {
                path: "$".to_string(),
                message: e.to_string(),
            }]
        })?;

        let mut errors = Vec::new();
        let Some(object) = value.as_object() else {
            return Err(vec![ValidationError {
                path: "$".to_string(),
                message: "expected an object".to_string(),
            }]);
        };

        for (field_name, field_type) in &fields {
            let path = format!("$.{}", field_name);
            match object.get(field_name) {
                Some(field_value) => {
                    self.validate_field(field_type, field_value, &path, &mut errors)
                }
                None => {
                    if !matches!(field_type, FieldType::Optional { .. }) {
                        errors.push(ValidationError {
                            path,
                            message: "missing required field".to_string(),
                        });
                    }
                }
            }
        }

        for key in object.keys() {
            if !fields.contains_key(key) {
                errors.push(ValidationError {
                    path: format!("$.{}", key),
                    message: "unexpected field".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_field(
        &self,
        field: &FieldType,
        value: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        match field {
            FieldType::String => {
                if !value.is_string() {
                    errors.push(type_error(path, "string", value));
                }
            }
            FieldType::Integer => {
                if !value.is_i64() && !value.is_u64() {
                    errors.push(type_error(path, "integer", value));
                }
            }
            FieldType::Number => {
                if !value.is_number() {
                    errors.push(type_error(path, "number", value));
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    errors.push(type_error(path, "boolean", value));
                }
            }
            FieldType::Optional { of } => {
                if !value.is_null() {
                    self.validate_field(of, value, path, errors);
                }
            }
            FieldType::List { of } => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.validate_field(of, item, &format!("{}[{}]", path, i), errors);
                    }
                }
                None => errors.push(type_error(path, "array", value)),
            },
            FieldType::Dict { of } => match value.as_object() {
                Some(entries) => {
                    for (key, entry) in entries {
                        self.validate_field(of, entry, &format!("{}.{}", path, key), errors);
                    }
                }
                None => errors.push(type_error(path, "object", value)),
            },
            FieldType::Enum { values } => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => {}
                Some(s) => errors.push(ValidationError {
                    path: path.to_string(),
                    message: format!("'{}' is not one of {:?}", s, values),
                }),
                None => errors.push(type_error(path, "string", value)),
            },
            FieldType::Union { of } => {
                let matches_any = of.iter().any(|variant| {
                    let mut probe = Vec::new();
                    self.validate_field(variant, value, path, &mut probe);
                    probe.is_empty()
                });
                if !matches_any {
                    errors.push(ValidationError {
                        path: path.to_string(),
                        message: "no union variant matched".to_string(),
                    });
                }
            }
            FieldType::Model { name } => {
                if let Err(nested) = self.validate_value(name, value) {
                    for mut error in nested {
                        error.path = format!("{}{}", path, &error.path[1..]);
                        errors.push(error);
                    }
                }
            }
        }
    }
}

fn type_error(path: &str, expected: &str, value: &Value) -> ValidationError {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ValidationError {
        path: path.to_string(),
        message: format!("expected {}, got {}", expected, actual),
    }
}
