//! Parameter building.
//!
//! Converts a caller's [`Fields`] into an ordered [`ParameterSet`]: names go through the
//! parameter convention and values get type-directed coercions. The first matching rule
//! wins:
//!
//! 1. date/time without offset -> `datetime`, value unchanged
//! 2. date/time with offset -> `datetimeoffset`, normalized to UTC or local time
//! 3. enum -> [`EnumResolver`]
//! 4. homogeneous primitive list -> typed array, no wire type
//! 5. document -> JSON text, no wire type
//! 6. anything else -> passed through, no wire type

use crate::convention::{ConventionSet, DateTimeOffsetFormat};
use crate::error::{DbError, DbResult};
use crate::marshal::enums::EnumResolver;
use crate::models::{
    Document, Fields, ParamValue, ParameterDescriptor, ParameterSet, TypedArray, Value, WireType,
};
use crate::options::JsonSettings;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct ParameterBuilder<'a> {
    conventions: &'a ConventionSet,
    json: &'a JsonSettings,
}

impl<'a> ParameterBuilder<'a> {
    pub fn new(conventions: &'a ConventionSet, json: &'a JsonSettings) -> Self {
        Self { conventions, json }
    }

    /// Build the bound parameter set for a field sequence.
    ///
    /// Fails with [`DbError::ParameterConflict`] when two fields format to the same
    /// parameter name.
    pub fn build(&self, fields: &Fields) -> DbResult<ParameterSet> {
        let mut set = ParameterSet::new();
        let mut sources: HashMap<String, &str> = HashMap::with_capacity(fields.len());

        for (field, value) in fields.iter() {
            let name = self.conventions.parameter.format(field);
            if let Some(previous) = sources.insert(name.clone(), field) {
                return Err(DbError::parameter_conflict(name, previous, field));
            }

            let descriptor = match value {
                None => ParameterDescriptor::null(name),
                Some(value) => self.describe(name, value)?,
            };
            set.insert(descriptor);
        }

        Ok(set)
    }

    /// Apply the coercion rules to a single non-null value.
    pub fn describe(&self, name: String, value: &Value) -> DbResult<ParameterDescriptor> {
        let descriptor = match value {
            Value::DateTime(dt) => ParameterDescriptor::new(name, ParamValue::DateTime(*dt))
                .with_wire_type(WireType::DateTime),
            Value::DateTimeOffset(dt) => {
                ParameterDescriptor::new(name, ParamValue::DateTimeOffset(self.normalize(dt)))
                    .with_wire_type(WireType::DateTimeOffset)
            }
            Value::Enum(e) => {
                let (wire_type, value) =
                    EnumResolver::new(&self.conventions.enum_value).resolve(e);
                ParameterDescriptor::new(name, value).with_wire_type(wire_type)
            }
            Value::List(items) => {
                let value = match homogeneous_array(items) {
                    Some(array) => ParamValue::Array(array),
                    None => ParamValue::List(items.clone()),
                };
                ParameterDescriptor::new(name, value)
            }
            Value::Document(doc) => {
                ParameterDescriptor::new(name, ParamValue::String(self.serialize(doc)?))
            }
            Value::Bool(v) => ParameterDescriptor::new(name, ParamValue::Bool(*v)),
            Value::I8(v) => ParameterDescriptor::new(name, ParamValue::I8(*v)),
            Value::I16(v) => ParameterDescriptor::new(name, ParamValue::I16(*v)),
            Value::I32(v) => ParameterDescriptor::new(name, ParamValue::I32(*v)),
            Value::I64(v) => ParameterDescriptor::new(name, ParamValue::I64(*v)),
            Value::U8(v) => ParameterDescriptor::new(name, ParamValue::U8(*v)),
            Value::U16(v) => ParameterDescriptor::new(name, ParamValue::U16(*v)),
            Value::U32(v) => ParameterDescriptor::new(name, ParamValue::U32(*v)),
            Value::U64(v) => ParameterDescriptor::new(name, ParamValue::U64(*v)),
            Value::F32(v) => ParameterDescriptor::new(name, ParamValue::F32(*v)),
            Value::F64(v) => ParameterDescriptor::new(name, ParamValue::F64(*v)),
            Value::Decimal(v) => ParameterDescriptor::new(name, ParamValue::Decimal(*v)),
            Value::String(v) => ParameterDescriptor::new(name, ParamValue::String(v.clone())),
            Value::Bytes(v) => ParameterDescriptor::new(name, ParamValue::Bytes(v.clone())),
            Value::Uuid(v) => ParameterDescriptor::new(name, ParamValue::Uuid(*v)),
            Value::Date(v) => ParameterDescriptor::new(name, ParamValue::Date(*v)),
            Value::Time(v) => ParameterDescriptor::new(name, ParamValue::Time(*v)),
            Value::Json(v) => ParameterDescriptor::new(name, ParamValue::Json(v.clone())),
        };
        Ok(descriptor)
    }

    fn normalize(&self, dt: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self.conventions.date_time_offset_format {
            DateTimeOffsetFormat::Utc => dt.with_timezone(&Utc).fixed_offset(),
            DateTimeOffsetFormat::Local => dt.with_timezone(&Local).fixed_offset(),
        }
    }

    fn serialize(&self, doc: &Document) -> DbResult<String> {
        let json = doc.to_json(self.json.skip_nulls);
        let text = if self.json.pretty {
            serde_json::to_string_pretty(&json)?
        } else {
            serde_json::to_string(&json)?
        };
        Ok(text)
    }
}

/// Flatten a parameter set into `name -> value` for structured logging.
pub fn to_plain_mapping(parameters: &ParameterSet) -> serde_json::Map<String, JsonValue> {
    parameters
        .iter()
        .map(|p| {
            let value = p
                .value
                .as_ref()
                .map(ParamValue::to_json)
                .unwrap_or(JsonValue::Null);
            (p.name.clone(), value)
        })
        .collect()
}

macro_rules! collect_homogeneous {
    ($items:expr, $variant:ident) => {{
        let mut out = Vec::with_capacity($items.len());
        for item in $items {
            match item {
                Value::$variant(v) => out.push(v.clone()),
                _ => return None,
            }
        }
        Some(TypedArray::$variant(out))
    }};
}

/// Materialize a list of one primitive kind as a typed array.
fn homogeneous_array(items: &[Value]) -> Option<TypedArray> {
    let first = items.first()?;
    match first {
        Value::Bool(_) => collect_homogeneous!(items, Bool),
        Value::I8(_) => collect_homogeneous!(items, I8),
        Value::I16(_) => collect_homogeneous!(items, I16),
        Value::I32(_) => collect_homogeneous!(items, I32),
        Value::I64(_) => collect_homogeneous!(items, I64),
        Value::U8(_) => collect_homogeneous!(items, U8),
        Value::U16(_) => collect_homogeneous!(items, U16),
        Value::U32(_) => collect_homogeneous!(items, U32),
        Value::U64(_) => collect_homogeneous!(items, U64),
        Value::F32(_) => collect_homogeneous!(items, F32),
        Value::F64(_) => collect_homogeneous!(items, F64),
        Value::Decimal(_) => collect_homogeneous!(items, Decimal),
        Value::String(_) => collect_homogeneous!(items, String),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convention::{CasingRule, Convention, EnumValueFormat};
    use crate::models::{DbEnum, EnumStorage, list};
    use chrono::{NaiveDate, TimeZone};

    #[derive(Clone, Copy)]
    #[repr(u8)]
    enum Status {
        Active = 1,
    }

    crate::db_enum!(Status, Bits8 { Active });

    fn conventions() -> ConventionSet {
        let mut set = ConventionSet::default();
        set.parameter.naming = Convention::new()
            .with_prefix("p_")
            .with_casing(CasingRule::LowerSnake);
        set
    }

    #[test]
    fn test_names_go_through_convention() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("UserId", "abc"))
            .unwrap();

        let p = set.get("p_user_id").unwrap();
        assert_eq!(p.value, Some(ParamValue::String("abc".to_string())));
        assert_eq!(p.wire_type, None);
    }

    #[test]
    fn test_order_is_preserved() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let fields = Fields::new().with("a", 1).with("b", 2).with("c", 3);
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&fields)
            .unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["p_a", "p_b", "p_c"]);
    }

    #[test]
    fn test_null_field() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with_null("Missing"))
            .unwrap();
        assert_eq!(set.get("p_missing"), Some(&ParameterDescriptor::null("p_missing")));
    }

    #[test]
    fn test_conflicting_names_are_rejected() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let fields = Fields::new().with("UserId", 1).with("user_id", 2);
        let err = ParameterBuilder::new(&conventions, &json)
            .build(&fields)
            .unwrap_err();
        match err {
            DbError::ParameterConflict { name, first, second } => {
                assert_eq!(name, "p_user_id");
                assert_eq!(first, "UserId");
                assert_eq!(second, "user_id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_naive_datetime() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let dt = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("At", dt))
            .unwrap();
        let p = set.get("p_at").unwrap();
        assert_eq!(p.wire_type, Some(WireType::DateTime));
        assert_eq!(p.value, Some(ParamValue::DateTime(dt)));
    }

    #[test]
    fn test_offset_datetime_normalized_to_utc() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let dt = offset.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("At", dt))
            .unwrap();

        let p = set.get("p_at").unwrap();
        assert_eq!(p.wire_type, Some(WireType::DateTimeOffset));
        let Some(ParamValue::DateTimeOffset(value)) = &p.value else {
            panic!("expected datetimeoffset");
        };
        assert_eq!(value.offset().local_minus_utc(), 0);
        assert_eq!(value.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_offset_datetime_normalized_to_local() {
        let mut conventions = conventions();
        conventions.date_time_offset_format = DateTimeOffsetFormat::Local;
        let json = JsonSettings::default();
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap().fixed_offset();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("At", dt))
            .unwrap();

        let expected = dt.with_timezone(&Local).fixed_offset();
        let Some(ParamValue::DateTimeOffset(value)) = &set.get("p_at").unwrap().value else {
            panic!("expected datetimeoffset");
        };
        assert_eq!(value.offset(), expected.offset());
        assert_eq!(*value, dt);
    }

    #[test]
    fn test_enum_ordinal() {
        let mut conventions = conventions();
        conventions.enum_value.value_format = EnumValueFormat::Ordinal;
        let json = JsonSettings::default();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("Status", Value::enumeration(&Status::Active)))
            .unwrap();

        let p = set.get("p_status").unwrap();
        assert_eq!(p.wire_type, Some(WireType::Byte));
        assert_eq!(p.value, Some(ParamValue::U8(1)));
        assert_eq!(<Status as DbEnum>::STORAGE, EnumStorage::Bits8);
    }

    #[test]
    fn test_enum_name() {
        let mut conventions = conventions();
        conventions.enum_value.naming = Convention::new().with_casing(CasingRule::UpperSnake);
        let json = JsonSettings::default();
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("Status", Value::enumeration(&Status::Active)))
            .unwrap();

        let p = set.get("p_status").unwrap();
        assert_eq!(p.wire_type, Some(WireType::String));
        assert_eq!(p.value, Some(ParamValue::String("ACTIVE".to_string())));
    }

    #[test]
    fn test_homogeneous_list_becomes_typed_array() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let fields = Fields::new()
            .with("Ids", list([1i64, 2, 3]))
            .with("Names", list(["a", "b"]));
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&fields)
            .unwrap();

        let ids = set.get("p_ids").unwrap();
        assert_eq!(ids.value, Some(ParamValue::Array(TypedArray::I64(vec![1, 2, 3]))));
        assert_eq!(ids.wire_type, None);
        assert_eq!(
            set.get("p_names").unwrap().value,
            Some(ParamValue::Array(TypedArray::String(vec![
                "a".to_string(),
                "b".to_string()
            ])))
        );
    }

    #[test]
    fn test_mixed_list_passes_through() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let mixed = vec![Value::I32(1), Value::from("x")];
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("Mixed", mixed.clone()))
            .unwrap();
        assert_eq!(set.get("p_mixed").unwrap().value, Some(ParamValue::List(mixed)));
    }

    #[test]
    fn test_document_serialized_to_json_text() {
        let conventions = conventions();
        let json = JsonSettings {
            skip_nulls: true,
            ..Default::default()
        };
        let doc = Document::new().with("name", "x").with_null("gone").with("n", 2);
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&Fields::new().with("Payload", doc))
            .unwrap();

        let p = set.get("p_payload").unwrap();
        assert_eq!(p.wire_type, None);
        assert_eq!(
            p.value,
            Some(ParamValue::String(r#"{"name":"x","n":2}"#.to_string()))
        );
    }

    #[test]
    fn test_to_plain_mapping() {
        let conventions = conventions();
        let json = JsonSettings::default();
        let fields = Fields::new().with("UserId", "abc").with_null("Other");
        let set = ParameterBuilder::new(&conventions, &json)
            .build(&fields)
            .unwrap();

        let plain = to_plain_mapping(&set);
        assert_eq!(
            JsonValue::Object(plain).to_string(),
            r#"{"p_user_id":"abc","p_other":null}"#
        );
    }
}
