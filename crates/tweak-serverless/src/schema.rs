//! Declarative schema validation for events and contexts.
//!
//! A [`Schema`] describes the expected shape of a JSON value. A
//! [`SchemaEngine`] checks a value against it and returns either the
//! canonicalized value (defaults applied, convertible strings converted) or
//! a [`ValidationReport`] listing what failed.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tweak_serverless::{DeclarativeEngine, Schema, SchemaEngine};
//!
//! let schema = Schema::object()
//!     .key("id", Schema::number().integer().required())
//!     .key("tags", Schema::array().items(Schema::string()).default(json!([])));
//!
//! let value = DeclarativeEngine::new()
//!     .validate(&json!({"id": "7"}), &schema)
//!     .unwrap();
//! assert_eq!(value, json!({"id": 7, "tags": []}));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// A schema validation engine.
pub trait SchemaEngine: Send + Sync {
    /// Validate `data`, returning the canonicalized value.
    fn validate(&self, data: &Value, schema: &Schema) -> Result<Value, ValidationReport>;
}

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetail {
    /// Human-readable message, e.g. `"id" must be a number`.
    pub message: String,
    /// Path from the validated root to the failing value.
    pub path: Vec<String>,
    /// Rule identifier, e.g. `number.base`.
    #[serde(rename = "type")]
    pub kind: String,
    pub context: DetailContext,
}

/// Context of a failed rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub value: Value,
}

/// Failed validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{message}")]
pub struct ValidationReport {
    pub message: String,
    pub details: Vec<ValidationDetail>,
}

impl ValidationReport {
    fn from_details(details: Vec<ValidationDetail>) -> Self {
        let message = details
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join(". ");
        Self { message, details }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SchemaKind {
    Any,
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        allowed: Vec<String>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
        integer: bool,
    },
    Boolean,
    Object {
        keys: Vec<(String, Schema)>,
        allow_unknown: bool,
    },
    Array {
        items: Option<Box<Schema>>,
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
}

/// Declarative description of a JSON value.
///
/// Rule methods only affect the kinds they make sense for: `min`/`max` apply
/// to numbers, `min_length`/`max_length` to strings and arrays, `key` and
/// `unknown` to objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    kind: SchemaKind,
    required: bool,
    nullable: bool,
    default: Option<Value>,
}

impl Schema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            required: false,
            nullable: false,
            default: None,
        }
    }

    pub fn any() -> Self {
        Self::of(SchemaKind::Any)
    }

    pub fn string() -> Self {
        Self::of(SchemaKind::String {
            min_length: None,
            max_length: None,
            allowed: Vec::new(),
        })
    }

    pub fn number() -> Self {
        Self::of(SchemaKind::Number {
            min: None,
            max: None,
            integer: false,
        })
    }

    pub fn boolean() -> Self {
        Self::of(SchemaKind::Boolean)
    }

    /// An object. Keys not declared are rejected unless `unknown(true)`.
    pub fn object() -> Self {
        Self::of(SchemaKind::Object {
            keys: Vec::new(),
            allow_unknown: false,
        })
    }

    pub fn array() -> Self {
        Self::of(SchemaKind::Array {
            items: None,
            min_length: None,
            max_length: None,
        })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn allow_null(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Value used when the key is absent.
    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn min(mut self, bound: f64) -> Self {
        if let SchemaKind::Number { min, .. } = &mut self.kind {
            *min = Some(bound);
        }
        self
    }

    pub fn max(mut self, bound: f64) -> Self {
        if let SchemaKind::Number { max, .. } = &mut self.kind {
            *max = Some(bound);
        }
        self
    }

    pub fn integer(mut self) -> Self {
        if let SchemaKind::Number { integer, .. } = &mut self.kind {
            *integer = true;
        }
        self
    }

    pub fn min_length(mut self, bound: usize) -> Self {
        match &mut self.kind {
            SchemaKind::String { min_length, .. } | SchemaKind::Array { min_length, .. } => {
                *min_length = Some(bound)
            }
            _ => {}
        }
        self
    }

    pub fn max_length(mut self, bound: usize) -> Self {
        match &mut self.kind {
            SchemaKind::String { max_length, .. } | SchemaKind::Array { max_length, .. } => {
                *max_length = Some(bound)
            }
            _ => {}
        }
        self
    }

    /// Restrict a string to the given values.
    pub fn valid<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let SchemaKind::String { allowed, .. } = &mut self.kind {
            allowed.extend(values.into_iter().map(Into::into));
        }
        self
    }

    /// Declare an object key.
    pub fn key(mut self, name: impl Into<String>, schema: Schema) -> Self {
        if let SchemaKind::Object { keys, .. } = &mut self.kind {
            keys.push((name.into(), schema));
        }
        self
    }

    /// Allow or reject undeclared object keys.
    pub fn unknown(mut self, allow: bool) -> Self {
        if let SchemaKind::Object { allow_unknown, .. } = &mut self.kind {
            *allow_unknown = allow;
        }
        self
    }

    pub fn items(mut self, schema: Schema) -> Self {
        if let SchemaKind::Array { items, .. } = &mut self.kind {
            *items = Some(Box::new(schema));
        }
        self
    }
}

/// The built-in [`SchemaEngine`].
///
/// By default it converts numeric and boolean strings and stops at the
/// first failure.
#[derive(Debug, Clone)]
pub struct DeclarativeEngine {
    convert: bool,
    abort_early: bool,
}

impl Default for DeclarativeEngine {
    fn default() -> Self {
        Self {
            convert: true,
            abort_early: true,
        }
    }
}

impl DeclarativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every failure instead of stopping at the first.
    pub fn collect_all(mut self) -> Self {
        self.abort_early = false;
        self
    }

    /// Disable string-to-number/boolean conversion.
    pub fn strict(mut self) -> Self {
        self.convert = false;
        self
    }
}

impl SchemaEngine for DeclarativeEngine {
    fn validate(&self, data: &Value, schema: &Schema) -> Result<Value, ValidationReport> {
        let mut walk = Walk {
            engine: self,
            path: Vec::new(),
            details: Vec::new(),
        };
        let value = walk.check(Some(data), schema);
        if walk.details.is_empty() {
            Ok(value.unwrap_or(Value::Null))
        } else {
            Err(ValidationReport::from_details(walk.details))
        }
    }
}

struct Walk<'a> {
    engine: &'a DeclarativeEngine,
    path: Vec<String>,
    details: Vec<ValidationDetail>,
}

impl Walk<'_> {
    fn stopped(&self) -> bool {
        self.engine.abort_early && !self.details.is_empty()
    }

    fn label(&self) -> String {
        self.path
            .last()
            .cloned()
            .unwrap_or_else(|| "value".to_string())
    }

    fn fail(&mut self, kind: &str, message: String, value: &Value) {
        let label = self.label();
        self.details.push(ValidationDetail {
            message: format!("\"{}\" {}", label, message),
            path: self.path.clone(),
            kind: kind.to_string(),
            context: DetailContext {
                key: self.path.last().cloned(),
                label,
                value: value.clone(),
            },
        });
    }

    fn check(&mut self, value: Option<&Value>, schema: &Schema) -> Option<Value> {
        let value = match value {
            None => {
                if let Some(default) = &schema.default {
                    return Some(default.clone());
                }
                if schema.required {
                    self.fail("any.required", "is required".to_string(), &Value::Null);
                }
                return None;
            }
            Some(Value::Null) if schema.nullable => return Some(Value::Null),
            Some(value) => value,
        };

        match &schema.kind {
            SchemaKind::Any => Some(value.clone()),
            SchemaKind::String {
                min_length,
                max_length,
                allowed,
            } => self.check_string(value, *min_length, *max_length, allowed),
            SchemaKind::Number { min, max, integer } => {
                self.check_number(value, *min, *max, *integer)
            }
            SchemaKind::Boolean => self.check_boolean(value),
            SchemaKind::Object {
                keys,
                allow_unknown,
            } => self.check_object(value, keys, *allow_unknown),
            SchemaKind::Array {
                items,
                min_length,
                max_length,
            } => self.check_array(value, items.as_deref(), *min_length, *max_length),
        }
    }

    fn check_string(
        &mut self,
        value: &Value,
        min_length: Option<usize>,
        max_length: Option<usize>,
        allowed: &[String],
    ) -> Option<Value> {
        let Some(text) = value.as_str() else {
            self.fail("string.base", "must be a string".to_string(), value);
            return None;
        };

        let length = text.chars().count();
        if let Some(min) = min_length {
            if length < min {
                self.fail(
                    "string.min",
                    format!("length must be at least {} characters long", min),
                    value,
                );
            }
        }
        if let Some(max) = max_length {
            if length > max && !self.stopped() {
                self.fail(
                    "string.max",
                    format!("length must be less than or equal to {} characters long", max),
                    value,
                );
            }
        }
        if !allowed.is_empty() && !allowed.iter().any(|a| a == text) && !self.stopped() {
            self.fail(
                "any.allowOnly",
                format!("must be one of [{}]", allowed.join(", ")),
                value,
            );
        }
        Some(value.clone())
    }

    fn check_number(
        &mut self,
        value: &Value,
        min: Option<f64>,
        max: Option<f64>,
        integer: bool,
    ) -> Option<Value> {
        let number = match value {
            Value::Number(n) => n.as_f64().map(|f| (f, value.clone())),
            Value::String(s) if self.engine.convert => parse_number(s),
            _ => None,
        };
        let Some((number, canonical)) = number else {
            self.fail("number.base", "must be a number".to_string(), value);
            return None;
        };

        if integer && number.fract() != 0.0 {
            self.fail("number.integer", "must be an integer".to_string(), value);
        }
        if let Some(min) = min {
            if number < min && !self.stopped() {
                self.fail(
                    "number.min",
                    format!("must be larger than or equal to {}", format_bound(min)),
                    value,
                );
            }
        }
        if let Some(max) = max {
            if number > max && !self.stopped() {
                self.fail(
                    "number.max",
                    format!("must be less than or equal to {}", format_bound(max)),
                    value,
                );
            }
        }
        Some(canonical)
    }

    fn check_boolean(&mut self, value: &Value) -> Option<Value> {
        match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) if self.engine.convert => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => {
                    self.fail("boolean.base", "must be a boolean".to_string(), value);
                    None
                }
            },
            _ => {
                self.fail("boolean.base", "must be a boolean".to_string(), value);
                None
            }
        }
    }

    fn check_object(
        &mut self,
        value: &Value,
        keys: &[(String, Schema)],
        allow_unknown: bool,
    ) -> Option<Value> {
        let Some(object) = value.as_object() else {
            self.fail("object.base", "must be an object".to_string(), value);
            return None;
        };

        let mut canonical = Map::new();
        for (name, schema) in keys {
            if self.stopped() {
                break;
            }
            self.path.push(name.clone());
            if let Some(checked) = self.check(object.get(name), schema) {
                canonical.insert(name.clone(), checked);
            }
            self.path.pop();
        }

        for (name, field) in object {
            if keys.iter().any(|(declared, _)| declared == name) {
                continue;
            }
            if allow_unknown {
                canonical.insert(name.clone(), field.clone());
            } else if !self.stopped() {
                self.path.push(name.clone());
                self.fail("object.allowUnknown", "is not allowed".to_string(), field);
                self.path.pop();
            }
        }

        Some(Value::Object(canonical))
    }

    fn check_array(
        &mut self,
        value: &Value,
        items: Option<&Schema>,
        min_length: Option<usize>,
        max_length: Option<usize>,
    ) -> Option<Value> {
        let Some(array) = value.as_array() else {
            self.fail("array.base", "must be an array".to_string(), value);
            return None;
        };

        if let Some(min) = min_length {
            if array.len() < min {
                self.fail(
                    "array.min",
                    format!("must contain at least {} items", min),
                    value,
                );
            }
        }
        if let Some(max) = max_length {
            if array.len() > max && !self.stopped() {
                self.fail(
                    "array.max",
                    format!("must contain less than or equal to {} items", max),
                    value,
                );
            }
        }

        let Some(items) = items else {
            return Some(value.clone());
        };
        let mut canonical = Vec::with_capacity(array.len());
        for (index, item) in array.iter().enumerate() {
            if self.stopped() {
                break;
            }
            self.path.push(index.to_string());
            canonical.push(self.check(Some(item), items).unwrap_or(Value::Null));
            self.path.pop();
        }
        Some(Value::Array(canonical))
    }
}

fn parse_number(raw: &str) -> Option<(f64, Value)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Some((int as f64, Value::from(int)));
    }
    let float = trimmed.parse::<f64>().ok()?;
    Number::from_f64(float).map(|n| (float, Value::Number(n)))
}

fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 && bound.abs() < 1e15 {
        format!("{}", bound as i64)
    } else {
        format!("{}", bound)
    }
}
