//! Caller-side values and field sets.
//!
//! A [`Fields`] sequence is what a caller hands to a repository: ordered, string-keyed,
//! optional-valued. The parameter builder turns it into a wire-ready `ParameterSet`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use uuid::Uuid;

/// Underlying integer storage of an enumerated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumStorage {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
}

/// An enumerated type that can be sent to the database by name or by ordinal.
///
/// Usually implemented through [`db_enum!`](crate::db_enum).
pub trait DbEnum {
    const STORAGE: EnumStorage = EnumStorage::Bits32;

    /// Variant name, `None` if the value has no renderable name.
    fn variant_name(&self) -> Option<&'static str>;

    fn ordinal(&self) -> i64;
}

/// A captured enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub type_name: &'static str,
    pub name: Option<Cow<'static, str>>,
    pub ordinal: i64,
    pub storage: EnumStorage,
}

impl EnumValue {
    pub fn of<E: DbEnum>(value: &E) -> Self {
        Self {
            type_name: std::any::type_name::<E>(),
            name: value.variant_name().map(Cow::Borrowed),
            ordinal: value.ordinal(),
            storage: E::STORAGE,
        }
    }
}

/// A value supplied by the caller for one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
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
    /// Date and time without offset
    DateTime(NaiveDateTime),
    /// Date and time with offset
    DateTimeOffset(DateTime<FixedOffset>),
    Enum(EnumValue),
    List(Vec<Value>),
    Document(Document),
    Json(JsonValue),
}

impl Value {
    /// Capture an enum value.
    pub fn enumeration<E: DbEnum>(value: &E) -> Self {
        Self::Enum(EnumValue::of(value))
    }

    /// Get the type name of this value for debugging.
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
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Document(_) => "document",
            Self::Json(_) => "json",
        }
    }

    /// Render as JSON. Enums render by name, falling back to the ordinal.
    pub fn to_json(&self, skip_nulls: bool) -> JsonValue {
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
            Self::Enum(e) => match &e.name {
                Some(name) => JsonValue::String(name.to_string()),
                None => e.ordinal.into(),
            },
            Self::List(items) => {
                JsonValue::Array(items.iter().map(|v| v.to_json(skip_nulls)).collect())
            }
            Self::Document(doc) => doc.to_json(skip_nulls),
            Self::Json(v) => v.clone(),
        }
    }
}

pub(crate) fn float_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )+
    };
}

impl_from_for_value! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    EnumValue => Enum,
    Document => Document,
    JsonValue => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeOffset(v.fixed_offset())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// Build a list value from any iterator of convertible items.
pub fn list<I, T>(items: I) -> Value
where
    I: IntoIterator<Item = T>,
    T: Into<Value>,
{
    Value::List(items.into_iter().map(Into::into).collect())
}

/// A string-keyed, ordered mapping of optional values, sent to the database as JSON text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Option<Value>)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    pub fn with_null(mut self, key: impl Into<String>) -> Self {
        self.insert(key, None);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Option<Value>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn to_json(&self, skip_nulls: bool) -> JsonValue {
        let map = self
            .entries
            .iter()
            .filter(|(_, v)| !(skip_nulls && v.is_none()))
            .map(|(k, v)| {
                let json = v
                    .as_ref()
                    .map(|v| v.to_json(skip_nulls))
                    .unwrap_or(JsonValue::Null);
                (k.clone(), json)
            })
            .collect();
        JsonValue::Object(map)
    }
}

/// Ordered field set supplied to a repository call.
///
/// Field order is preserved all the way to the bound parameter set and to the
/// argument list of generated function calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, Option<Value>)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field with a value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((name.into(), Some(value.into())));
        self
    }

    /// Append a field whose value is null.
    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.entries.push((name.into(), None));
        self
    }

    /// Append a field whose value may be absent.
    pub fn with_option<T: Into<Value>>(mut self, name: impl Into<String>, value: Option<T>) -> Self {
        self.entries.push((name.into(), value.map(Into::into)));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<Value>) {
        self.entries.push((name.into(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

impl<K: Into<String>> FromIterator<(K, Option<Value>)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, Option<Value>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Types that can describe themselves as a field set.
pub trait ToFields {
    fn to_fields(&self) -> Fields;
}

impl ToFields for Fields {
    fn to_fields(&self) -> Fields {
        self.clone()
    }
}
