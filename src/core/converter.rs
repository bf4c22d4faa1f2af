//! Type-driven coercion of path and query parameters.
//!
//! A view declares a [`Signature`]: the path parameters it expects (optionally
//! typed) and the query parameters it accepts together with their defaults.
//! The [`Converter`] validates every bound argument, gathers every failure into
//! one [`ValidationError`] and only then substitutes defaults for the query
//! parameters that were omitted. Defaults are never validated.
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::core::pattern::{CompiledPattern, PatternTag, RawParams};

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)$").expect("valid regex"));

/// User-supplied validator for [`ParamKind::Custom`].
pub trait Validator: Send + Sync + 'static {
    /// Short name used in error messages, e.g. `"slug"`.
    fn name(&self) -> &str;

    /// Validate and convert a raw parameter, returning a human readable message on failure.
    fn validate(&self, raw: &str) -> Result<Value, String>;
}

/// Declared kind of a handler argument.
#[derive(Clone)]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    Decimal,
    Date,
    Time,
    DateTime,
    Custom(Arc<dyn Validator>),
}

impl fmt::Debug for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(validator) => write!(f, "Custom({})", validator.name()),
            other => f.write_str(other.label()),
        }
    }
}

impl ParamKind {
    fn label(&self) -> &str {
        match self {
            Self::Str => "string",
            Self::Int => "integer",
            Self::Float => "float",
            Self::Bool => "boolean",
            Self::Decimal => "decimal",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Custom(validator) => validator.name(),
        }
    }

    fn from_tag(tag: PatternTag) -> Self {
        match tag {
            PatternTag::Integer => Self::Int,
            PatternTag::Float => Self::Float,
            PatternTag::Segment | PatternTag::Path => Self::Str,
        }
    }

    /// Convert a raw string into a typed value.
    pub fn convert(&self, raw: &str) -> Result<Value, String> {
        let invalid = || format!("'{raw}' is not a valid {}", self.label());
        match self {
            Self::Str => Ok(Value::Str(raw.to_string())),
            Self::Int => raw.parse().map(Value::Int).map_err(|_| invalid()),
            Self::Float => raw.parse().map(Value::Float).map_err(|_| invalid()),
            Self::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            Self::Decimal => {
                if DECIMAL_RE.is_match(raw) {
                    Ok(Value::Decimal(raw.to_string()))
                } else {
                    Err(invalid())
                }
            }
            Self::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| invalid()),
            Self::Time => NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
                .map(Value::Time)
                .map_err(|_| invalid()),
            Self::DateTime => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
                .or_else(|_| {
                    chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.naive_utc())
                })
                .map(Value::DateTime)
                .map_err(|_| invalid()),
            Self::Custom(validator) => validator.validate(raw),
        }
    }
}

/// A converted parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Kept in its textual form to avoid losing precision.
    Decimal(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Json(JsonValue),
    Null,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) | Self::Decimal(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Json(json) => write!(f, "{json}"),
            Self::Null => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Converted parameters handed to views, hooks and middleware.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconverted parameters straight from a pattern match.
    pub fn from_raw(raw: &RawParams) -> Self {
        Self {
            values: raw
                .iter()
                .map(|(name, value)| (name.clone(), Value::Str(value.clone())))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::hash_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Aggregated per-field conversion failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parameter validation failed: {}", describe(.errors))]
pub struct ValidationError {
    pub errors: BTreeMap<String, String>,
}

fn describe(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// `{field: message}` object used as the 400 response detail.
    pub fn detail(&self) -> JsonValue {
        JsonValue::Object(
            self.errors
                .iter()
                .map(|(field, message)| (field.clone(), JsonValue::String(message.clone())))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PathArg {
    pub name: String,
    pub kind: Option<ParamKind>,
}

#[derive(Debug, Clone)]
pub(crate) struct QueryArg {
    pub name: String,
    pub kind: Option<ParamKind>,
    pub default: Value,
}

/// The arguments a view accepts besides the request context.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub(crate) path: Vec<PathArg>,
    pub(crate) query: Vec<QueryArg>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// A path parameter typed by its pattern tag (`{x:d}` is an integer).
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.path.push(PathArg {
            name: name.into(),
            kind: None,
        });
        self
    }

    /// A path parameter with an explicit kind, overriding the pattern tag.
    pub fn typed_param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.path.push(PathArg {
            name: name.into(),
            kind: Some(kind),
        });
        self
    }

    /// An untyped query parameter with a default.
    pub fn query(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.query.push(QueryArg {
            name: name.into(),
            kind: None,
            default: default.into(),
        });
        self
    }

    /// A typed query parameter with a default; the default itself is never validated.
    pub fn typed_query(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        default: impl Into<Value>,
    ) -> Self {
        self.query.push(QueryArg {
            name: name.into(),
            kind: Some(kind),
            default: default.into(),
        });
        self
    }

    pub fn path_names(&self) -> impl Iterator<Item = &str> {
        self.path.iter().map(|arg| arg.name.as_str())
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.query.iter().map(|arg| arg.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && self.query.is_empty()
    }
}

/// Converter bound to one route: the view signature resolved against its pattern.
#[derive(Debug, Clone)]
pub struct Converter {
    path: Vec<(String, ParamKind)>,
    query: Vec<QueryArg>,
}

impl Converter {
    pub(crate) fn new(signature: &Signature, pattern: &CompiledPattern) -> Self {
        let path = signature
            .path
            .iter()
            .map(|arg| {
                let kind = arg.kind.clone().unwrap_or_else(|| {
                    pattern
                        .param(&arg.name)
                        .map(|param| ParamKind::from_tag(param.tag))
                        .unwrap_or(ParamKind::Str)
                });
                (arg.name.clone(), kind)
            })
            .collect();
        Self {
            path,
            query: signature.query.clone(),
        }
    }

    /// Converter typing every pattern parameter by its tag alone.
    pub(crate) fn for_pattern(pattern: &CompiledPattern) -> Self {
        let path = pattern
            .params()
            .iter()
            .map(|param| (param.name.clone(), ParamKind::from_tag(param.tag)))
            .collect();
        Self {
            path,
            query: Vec::new(),
        }
    }

    /// Convert captured path parameters and query string values.
    ///
    /// Path parameters not described by the signature are kept as strings, as are
    /// query parameters without a declared kind.
    pub fn convert(
        &self,
        raw: &RawParams,
        query: &HashMap<String, String>,
    ) -> Result<Params, ValidationError> {
        let mut params = Params::from_raw(raw);
        let mut errors = BTreeMap::new();

        for (name, kind) in &self.path {
            let Some((_, value)) = raw.iter().find(|(raw_name, _)| raw_name == name) else {
                continue;
            };
            match kind.convert(value) {
                Ok(converted) => params.insert(name.clone(), converted),
                Err(message) => {
                    errors.insert(name.clone(), message);
                }
            }
        }

        let mut omitted = Vec::new();
        for arg in &self.query {
            match (query.get(&arg.name), &arg.kind) {
                (Some(value), Some(kind)) => match kind.convert(value) {
                    Ok(converted) => params.insert(arg.name.clone(), converted),
                    Err(message) => {
                        errors.insert(arg.name.clone(), message);
                    }
                },
                (Some(value), None) => params.insert(arg.name.clone(), value.clone()),
                (None, _) => omitted.push(arg),
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError { errors });
        }

        for arg in omitted {
            params.insert(arg.name.clone(), arg.default.clone());
        }
        Ok(params)
    }
}
