//! Response decoding
//!
//! Turns the payload of a validated response frame into typed values using
//! the catalog's field layout, and hands them to a [`VariableSink`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{CommandCatalog, FieldSpec, Postprocess, SemanticType};

/// Numerator of the fan speed conversion
const RPM_NUMERATOR: f64 = 1_875_000.0;

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Whole number
    Integer(i64),
    /// Scaled value
    Float(f64),
    /// Flag
    Bool(bool),
    /// Text
    String(String),
}

impl Value {
    /// Get as integer, returning None if not an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as float; integers are widened
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as bool, returning None if not a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
        }
    }
}

/// Receiver of decoded values
///
/// Whether a destination exists is up to the sink; unknown names must not
/// make the engine fail.
pub trait VariableSink {
    /// Store the latest value for `destination`
    fn set_value(&mut self, destination: &str, value: Value);
}

impl<S: VariableSink + ?Sized> VariableSink for &mut S {
    fn set_value(&mut self, destination: &str, value: Value) {
        (**self).set_value(destination, value)
    }
}

/// Sink that keeps the latest value per destination
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    values: HashMap<String, Value>,
    updates: u64,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value for a destination
    pub fn get(&self, destination: &str) -> Option<&Value> {
        self.values.get(destination)
    }

    /// Number of distinct destinations seen
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True before the first update
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total number of `set_value` calls
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// All current values
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

impl VariableSink for MemorySink {
    fn set_value(&mut self, destination: &str, value: Value) {
        self.updates += 1;
        self.values.insert(destination.to_string(), value);
    }
}

/// Decodes response payloads against the catalog
#[derive(Debug, Clone)]
pub struct Dispatcher {
    catalog: Arc<CommandCatalog>,
}

impl Dispatcher {
    /// Dispatcher over `catalog`
    pub fn new(catalog: Arc<CommandCatalog>) -> Self {
        Self { catalog }
    }

    /// Decode the payload of a response frame
    ///
    /// Returns an empty list if no descriptor answers with `response_id`.
    pub fn decode(&self, response_id: u16, payload: &[u8]) -> Vec<(String, Value)> {
        let Some(descriptor) = self.catalog.find_by_response_id(response_id) else {
            debug!("dispatch: no descriptor for response {:#06x}", response_id);
            return Vec::new();
        };

        descriptor
            .fields
            .iter()
            .filter_map(|field| {
                let value = decode_field(field, payload)?;
                Some((field.destination.clone(), value))
            })
            .collect()
    }

    /// Decode and deliver every present field; returns how many were delivered
    pub fn dispatch<S: VariableSink + ?Sized>(
        &self,
        response_id: u16,
        payload: &[u8],
        sink: &mut S,
    ) -> usize {
        let values = self.decode(response_id, payload);
        let count = values.len();
        for (destination, value) in values {
            trace!("dispatch: {} = {}", destination, value);
            sink.set_value(&destination, value);
        }
        count
    }
}

/// Decode one field; `None` if its bytes are not all inside the payload
pub fn decode_field(field: &FieldSpec, payload: &[u8]) -> Option<Value> {
    let bytes = payload.get(field.range())?;
    if field.byte_offset == 0 || bytes.is_empty() {
        return None;
    }

    let raw = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);

    let value = match field.semantic {
        SemanticType::Boolean => Value::Bool(raw != 0),
        SemanticType::String => Value::String(char::from(bytes[0]).to_string()),
        SemanticType::Integer => match field.postprocess {
            None => Value::Integer(raw as i64),
            Some(post) => Value::Integer(apply(post, raw).round() as i64),
        },
        SemanticType::Float => match field.postprocess {
            None => Value::Float(raw as f64),
            Some(post) => Value::Float(apply(post, raw)),
        },
    };
    Some(value)
}

fn apply(post: Postprocess, raw: u32) -> f64 {
    match post {
        Postprocess::RpmInverse if raw == 0 => 0.0,
        Postprocess::RpmInverse => (RPM_NUMERATOR / raw as f64).round(),
        Postprocess::TempHalfMinus20 => raw as f64 / 2.0 - 20.0,
    }
}
