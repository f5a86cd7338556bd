//! Wire-side parameter models.
//!
//! This module defines the typed values, wire types and descriptors that are handed to
//! the execution capability after marshalling.

use crate::models::value::{Value, float_json};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Parameter data type communicated to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    String,
    Boolean,
    /// Unsigned 8-bit integer
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    Binary,
    Guid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Json,
}

impl WireType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Single => "single",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Binary => "binary",
            Self::Guid => "guid",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::DateTimeOffset => "datetimeoffset",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for WireType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    InOut,
    ReturnValue,
}

/// A homogeneous array of one primitive type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    Bool(Vec<bool>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Decimal(Vec<Decimal>),
    String(Vec<String>),
}

impl TypedArray {
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Decimal(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> JsonValue {
        fn arr<T: Clone + Into<JsonValue>>(v: &[T]) -> JsonValue {
            JsonValue::Array(v.iter().cloned().map(Into::into).collect())
        }
        match self {
            Self::Bool(v) => arr(v),
            Self::I8(v) => arr(v),
            Self::I16(v) => arr(v),
            Self::I32(v) => arr(v),
            Self::I64(v) => arr(v),
            Self::U8(v) => arr(v),
            Self::U16(v) => arr(v),
            Self::U32(v) => arr(v),
            Self::U64(v) => arr(v),
            Self::F32(v) => JsonValue::Array(v.iter().map(|f| float_json(*f as f64)).collect()),
            Self::F64(v) => JsonValue::Array(v.iter().map(|f| float_json(*f)).collect()),
            Self::Decimal(v) => {
                JsonValue::Array(v.iter().map(|d| JsonValue::String(d.to_string())).collect())
            }
            Self::String(v) => arr(v),
        }
    }
}

/// A database-ready parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Array(TypedArray),
    /// Heterogeneous or nested list passed through unchanged
    List(Vec<Value>),
    Json(JsonValue),
}

impl ParamValue {
    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::I16(_) => "i16",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Array(_) => "array",
            Self::List(_) => "list",
            Self::Json(_) => "json",
        }
    }

    /// Render as JSON for structured logging.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::I8(v) => (*v).into(),
            Self::I16(v) => (*v).into(),
            Self::I32(v) => (*v).into(),
            Self::I64(v) => (*v).into(),
            Self::U8(v) => (*v).into(),
            Self::U16(v) => (*v).into(),
            Self::U32(v) => (*v).into(),
            Self::U64(v) => (*v).into(),
            Self::F32(v) => float_json(*v as f64),
            Self::F64(v) => float_json(*v),
            Self::Decimal(v) => JsonValue::String(v.to_string()),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
            Self::Uuid(v) => JsonValue::String(v.to_string()),
            Self::Date(v) => JsonValue::String(v.to_string()),
            Self::Time(v) => JsonValue::String(v.to_string()),
            Self::DateTime(v) => JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::DateTimeOffset(v) => JsonValue::String(v.to_rfc3339()),
            Self::Array(v) => v.to_json(),
            Self::List(items) => JsonValue::Array(items.iter().map(|v| v.to_json(false)).collect()),
            Self::Json(v) => v.clone(),
        }
    }
}

/// One bound parameter.
///
/// A descriptor with no wire type, direction, size or value is a null parameter whose
/// handling is left to the execution layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub wire_type: Option<WireType>,
    pub direction: Option<Direction>,
    pub size: Option<u32>,
    pub value: Option<ParamValue>,
}

impl ParameterDescriptor {
    /// Create a descriptor with nothing but a name.
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wire_type: None,
            direction: None,
            size: None,
            value: None,
        }
    }

    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            value: Some(value),
            ..Self::null(name)
        }
    }

    pub fn with_wire_type(mut self, wire_type: WireType) -> Self {
        self.wire_type = Some(wire_type);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

/// Ordered, name-unique collection of bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    params: Vec<ParameterDescriptor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, replacing any existing descriptor of the same name in place.
    ///
    /// Returns the replaced descriptor.
    pub fn insert(&mut self, descriptor: ParameterDescriptor) -> Option<ParameterDescriptor> {
        match self.params.iter_mut().find(|p| p.name == descriptor.name) {
            Some(existing) => Some(std::mem::replace(existing, descriptor)),
            None => {
                self.params.push(descriptor);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<ParameterDescriptor> {
        let idx = self.params.iter().position(|p| p.name == name)?;
        Some(self.params.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ParameterDescriptor> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Position of a parameter in binding order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParameterDescriptor> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a ParameterDescriptor;
    type IntoIter = std::slice::Iter<'a, ParameterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

impl FromIterator<ParameterDescriptor> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = ParameterDescriptor>>(iter: I) -> Self {
        let mut set = Self::new();
        for descriptor in iter {
            set.insert(descriptor);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_type_names() {
        assert_eq!(WireType::Byte.to_string(), "byte");
        assert_eq!(WireType::DateTimeOffset.as_str(), "datetimeoffset");
        assert_eq!(serde_json::to_string(&WireType::Int16).unwrap(), "\"int16\"");
    }

    #[test]
    fn test_parameter_set_insert_replaces_in_place() {
        let mut set = ParameterSet::new();
        set.insert(ParameterDescriptor::new("a", ParamValue::I32(1)));
        set.insert(ParameterDescriptor::new("b", ParamValue::I32(2)));
        let old = set.insert(ParameterDescriptor::new("a", ParamValue::I32(3)));

        assert_eq!(old.unwrap().value, Some(ParamValue::I32(1)));
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set.get("a").unwrap().value, Some(ParamValue::I32(3)));
        assert_eq!(set.position("b"), Some(1));
    }

    #[test]
    fn test_null_descriptor() {
        let p = ParameterDescriptor::null("x");
        assert!(p.is_null());
        assert!(p.wire_type.is_none());
        assert!(p.direction.is_none());
        assert!(p.size.is_none());
    }

    #[test]
    fn test_typed_array_json() {
        let arr = TypedArray::I16(vec![1, 2]);
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.to_json().to_string(), "[1,2]");
    }
}
