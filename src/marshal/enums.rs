//! Enum value resolution.
//!
//! An enum is sent either as its formatted name (text) or as its ordinal at the integer
//! width of its storage. Width matching avoids silent truncation against narrower or
//! wider columns.

use crate::convention::{EnumConvention, EnumValueFormat};
use crate::models::{EnumStorage, EnumValue, ParamValue, WireType};

/// Resolves the wire type and value of enum parameters under one enum convention.
#[derive(Debug, Clone, Copy)]
pub struct EnumResolver<'a> {
    convention: &'a EnumConvention,
}

impl<'a> EnumResolver<'a> {
    pub fn new(convention: &'a EnumConvention) -> Self {
        Self { convention }
    }

    pub fn resolve_type(&self, value: &EnumValue) -> WireType {
        match self.convention.value_format {
            EnumValueFormat::Name => WireType::String,
            EnumValueFormat::Ordinal => ordinal_wire_type(value.storage),
        }
    }

    pub fn resolve_value(&self, value: &EnumValue) -> ParamValue {
        match self.convention.value_format {
            EnumValueFormat::Name => match value.name.as_deref() {
                Some(name) => ParamValue::String(self.convention.naming.format(name)),
                None => ordinal_value(value),
            },
            EnumValueFormat::Ordinal => ordinal_value(value),
        }
    }

    /// Wire type and value together.
    ///
    /// A name-formatted enum without a renderable name reports the ordinal wire type so
    /// type and value stay consistent.
    pub fn resolve(&self, value: &EnumValue) -> (WireType, ParamValue) {
        let resolved = self.resolve_value(value);
        let wire_type = match resolved {
            ParamValue::String(_) => WireType::String,
            _ => ordinal_wire_type(value.storage),
        };
        (wire_type, resolved)
    }
}

fn ordinal_wire_type(storage: EnumStorage) -> WireType {
    match storage {
        EnumStorage::Bits8 => WireType::Byte,
        EnumStorage::Bits16 => WireType::Int16,
        EnumStorage::Bits64 => WireType::Int64,
        EnumStorage::Bits32 => WireType::Int32,
    }
}

// Ordinals are captured as i64; narrowing reinterprets the low bits the same way the
// enum's own storage would.
fn ordinal_value(value: &EnumValue) -> ParamValue {
    match value.storage {
        EnumStorage::Bits8 => ParamValue::U8(value.ordinal as u8),
        EnumStorage::Bits16 => ParamValue::I16(value.ordinal as i16),
        EnumStorage::Bits64 => ParamValue::I64(value.ordinal),
        EnumStorage::Bits32 => ParamValue::I32(value.ordinal as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convention::{CasingRule, Convention};
    use std::borrow::Cow;

    fn enum_value(name: Option<&'static str>, ordinal: i64, storage: EnumStorage) -> EnumValue {
        EnumValue {
            type_name: "Status",
            name: name.map(Cow::Borrowed),
            ordinal,
            storage,
        }
    }

    fn convention(format: EnumValueFormat) -> EnumConvention {
        EnumConvention {
            naming: Convention::new()
                .with_prefix("st_")
                .with_suffix("_v")
                .with_casing(CasingRule::LowerSnake),
            value_format: format,
        }
    }

    #[test]
    fn test_name_format() {
        let conv = convention(EnumValueFormat::Name);
        let resolver = EnumResolver::new(&conv);
        let value = enum_value(Some("PendingReview"), 2, EnumStorage::Bits32);

        assert_eq!(resolver.resolve_type(&value), WireType::String);
        assert_eq!(
            resolver.resolve_value(&value),
            ParamValue::String("st_pending_review_v".to_string())
        );
    }

    #[test]
    fn test_name_format_falls_back_to_ordinal() {
        let conv = convention(EnumValueFormat::Name);
        let resolver = EnumResolver::new(&conv);
        let value = enum_value(None, 7, EnumStorage::Bits16);

        assert_eq!(resolver.resolve_value(&value), ParamValue::I16(7));
        assert_eq!(resolver.resolve(&value).0, WireType::Int16);
    }

    #[test]
    fn test_ordinal_widths() {
        let conv = convention(EnumValueFormat::Ordinal);
        let resolver = EnumResolver::new(&conv);

        let cases = [
            (EnumStorage::Bits8, WireType::Byte, ParamValue::U8(1)),
            (EnumStorage::Bits16, WireType::Int16, ParamValue::I16(1)),
            (EnumStorage::Bits32, WireType::Int32, ParamValue::I32(1)),
            (EnumStorage::Bits64, WireType::Int64, ParamValue::I64(1)),
        ];
        for (storage, wire_type, param) in cases {
            let value = enum_value(Some("Active"), 1, storage);
            assert_eq!(resolver.resolve_type(&value), wire_type);
            assert_eq!(resolver.resolve_value(&value), param);
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let conv = convention(EnumValueFormat::Name);
        let resolver = EnumResolver::new(&conv);
        let value = enum_value(Some("Active"), 1, EnumStorage::Bits8);
        assert_eq!(resolver.resolve(&value), resolver.resolve(&value));
    }
}
