//! Field extraction strategies.
//!
//! Every schema field owns one [`Extractor`] that turns
//! `(identifier, payload)` into the ordered values of that column, one per
//! output row. Declarative [`ExtractorSpec`]s are resolved into extractors
//! once, when the schema is registered.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::schema::SchemaError;
use super::value::FieldValue;
use crate::ids::Identifier;
use crate::probe::Payload;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("nothing at {0}")]
    Missing(String),
    #[error("value at {0} is not an array")]
    NotAnArray(String),
    #[error("{0}")]
    Custom(String),
}

pub type ExtractFn = dyn Fn(Identifier, &Payload) -> Result<Vec<FieldValue>, ExtractError>
    + Send
    + Sync;

/// Declarative extractor, as written in configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorSpec {
    /// The probed identifier itself.
    Identifier,
    /// A fixed value.
    Constant { value: Value },
    /// One value at a JSON pointer.
    Pointer { pointer: String },
    /// One value per element of the array at `array`, taken at `field`
    /// inside each element.
    Each { array: String, field: String },
    /// The inner sequence repeated once per element of the array at
    /// `array`.
    RepeatPer {
        array: String,
        inner: Box<ExtractorSpec>,
    },
}

#[derive(Clone)]
pub enum Extractor {
    Identifier,
    Constant(FieldValue),
    Pointer(String),
    Each { array: String, field: String },
    RepeatPer { array: String, inner: Box<Extractor> },
    /// Strip any trailing characters contained in `chars` from text values.
    TrimEnd { inner: Box<Extractor>, chars: String },
    Custom(Arc<ExtractFn>),
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Identifier => f.write_str("Identifier"),
            Extractor::Constant(value) => {
                f.debug_tuple("Constant").field(value).finish()
            }
            Extractor::Pointer(pointer) => {
                f.debug_tuple("Pointer").field(pointer).finish()
            }
            Extractor::Each { array, field } => f
                .debug_struct("Each")
                .field("array", array)
                .field("field", field)
                .finish(),
            Extractor::RepeatPer { array, inner } => f
                .debug_struct("RepeatPer")
                .field("array", array)
                .field("inner", inner)
                .finish(),
            Extractor::TrimEnd { inner, chars } => f
                .debug_struct("TrimEnd")
                .field("inner", inner)
                .field("chars", chars)
                .finish(),
            Extractor::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

fn check_pointer(pointer: &str) -> Result<(), SchemaError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(SchemaError::InvalidPointer(pointer.to_string()))
    }
}

fn lookup<'a>(value: &'a Value, pointer: &str) -> Result<&'a Value, ExtractError> {
    value
        .pointer(pointer)
        .ok_or_else(|| ExtractError::Missing(pointer.to_string()))
}

fn array_at<'a>(
    value: &'a Value,
    pointer: &str,
) -> Result<&'a Vec<Value>, ExtractError> {
    lookup(value, pointer)?
        .as_array()
        .ok_or_else(|| ExtractError::NotAnArray(pointer.to_string()))
}

impl Extractor {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Identifier, &Payload) -> Result<Vec<FieldValue>, ExtractError>
            + Send
            + Sync
            + 'static,
    {
        Extractor::Custom(Arc::new(f))
    }

    pub fn pointer(pointer: impl Into<String>) -> Self {
        Extractor::Pointer(pointer.into())
    }

    pub fn each(array: impl Into<String>, field: impl Into<String>) -> Self {
        Extractor::Each {
            array: array.into(),
            field: field.into(),
        }
    }

    pub fn repeat_per(self, array: impl Into<String>) -> Self {
        Extractor::RepeatPer {
            array: array.into(),
            inner: Box::new(self),
        }
    }

    pub fn trim_end(self, chars: impl Into<String>) -> Self {
        Extractor::TrimEnd {
            inner: Box::new(self),
            chars: chars.into(),
        }
    }

    /// Resolve a declarative spec, validating every pointer.
    pub fn from_spec(spec: &ExtractorSpec) -> Result<Self, SchemaError> {
        Ok(match spec {
            ExtractorSpec::Identifier => Extractor::Identifier,
            ExtractorSpec::Constant { value } => {
                Extractor::Constant(FieldValue::from(value))
            }
            ExtractorSpec::Pointer { pointer } => {
                check_pointer(pointer)?;
                Extractor::pointer(pointer.as_str())
            }
            ExtractorSpec::Each { array, field } => {
                check_pointer(array)?;
                check_pointer(field)?;
                Extractor::each(array.as_str(), field.as_str())
            }
            ExtractorSpec::RepeatPer { array, inner } => {
                check_pointer(array)?;
                Extractor::from_spec(inner)?.repeat_per(array.as_str())
            }
        })
    }

    pub fn extract(
        &self,
        id: Identifier,
        payload: &Payload,
    ) -> Result<Vec<FieldValue>, ExtractError> {
        match self {
            Extractor::Identifier => Ok(vec![FieldValue::Integer(id)]),
            Extractor::Constant(value) => Ok(vec![value.clone()]),
            Extractor::Pointer(pointer) => {
                Ok(vec![FieldValue::from(lookup(payload, pointer)?)])
            }
            Extractor::Each { array, field } => array_at(payload, array)?
                .iter()
                .map(|element| lookup(element, field).map(FieldValue::from))
                .collect(),
            Extractor::RepeatPer { array, inner } => {
                let times = array_at(payload, array)?.len();
                let values = inner.extract(id, payload)?;
                Ok(values
                    .iter()
                    .cycle()
                    .take(values.len() * times)
                    .cloned()
                    .collect())
            }
            Extractor::TrimEnd { inner, chars } => Ok(inner
                .extract(id, payload)?
                .into_iter()
                .map(|value| match value {
                    FieldValue::Text(text) => FieldValue::Text(
                        text.trim_end_matches(|c: char| chars.contains(c)).to_string(),
                    ),
                    other => other,
                })
                .collect()),
            Extractor::Custom(f) => f(id, payload),
        }
    }
}
