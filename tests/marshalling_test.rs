//! Integration tests for naming conventions and parameter/routine marshalling.
//!
//! These tests exercise the public resolution pipeline: convention formatting, enum
//! encoding, parameter building and routine statement resolution.

use chrono::{FixedOffset, TimeZone, Utc};
use routinekit::convention::{
    CasingRule, Convention, ConventionSet, DateTimeOffsetFormat, EnumValueFormat,
    PlaceholderFormatter,
};
use routinekit::marshal::{EnumResolver, ParameterBuilder, RoutineResolver, to_plain_mapping};
use routinekit::models::{
    CommandKind, EnumValue, Fields, ParamValue, RoutineKind, Value, WireType,
};
use routinekit::options::{JsonSettings, RepositoryOptions};
use routinekit::{DbError, Repository, RoutineCall};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Status {
    Inactive = 0,
    Active = 1,
}
routinekit::db_enum!(Status, Bits8 { Inactive, Active });

#[derive(Debug, Clone, Copy)]
#[repr(i16)]
enum Priority {
    Low = 10,
}
routinekit::db_enum!(Priority, Bits16 { Low });

#[derive(Debug, Clone, Copy)]
#[repr(i64)]
enum Region {
    EuropeWest = 1 << 33,
}
routinekit::db_enum!(Region, Bits64 { EuropeWest });

#[derive(Debug, Clone, Copy)]
enum Color {
    DarkRed = 3,
}
routinekit::db_enum!(Color, Bits32 { DarkRed });

fn snake_conventions() -> ConventionSet {
    ConventionSet::default().with_casing(CasingRule::LowerSnake)
}

// =========================================================================
// Convention formatting
// =========================================================================

#[test]
fn test_format_has_prefix_suffix_and_casing() {
    let names = ["UserId", "userAccount", "HTTPServer", "order_line", "Item2Price"];
    for rule in [
        CasingRule::LowerSnake,
        CasingRule::UpperSnake,
        CasingRule::Camel,
        CasingRule::Pascal,
        CasingRule::Kebab,
    ] {
        let convention = Convention::new()
            .with_prefix("x_")
            .with_suffix("_v")
            .with_casing(rule);
        for name in names {
            let formatted = convention.format(name);
            assert!(formatted.starts_with("x_"), "{} / {:?}", formatted, rule);
            assert!(formatted.ends_with("_v"), "{} / {:?}", formatted, rule);
            let core = &formatted[2..formatted.len() - 2];
            assert!(rule.is_satisfied_by(core), "{} / {:?}", core, rule);
        }
    }
}

#[test]
fn test_format_and_ensure_with_short_words_and_acronyms() {
    let names = [
        "x_y_coordinate",
        "A_B_C",
        "a",
        "getHTTPResponse",
        "IOStream",
        "pos_x",
        "v_2_b",
        "user_id_v2",
        "iOS",
    ];
    for rule in [
        CasingRule::LowerSnake,
        CasingRule::UpperSnake,
        CasingRule::Kebab,
        CasingRule::Camel,
        CasingRule::Pascal,
        CasingRule::Lower,
        CasingRule::Upper,
    ] {
        let convention = Convention::new().with_prefix("p_").with_casing(rule);
        for name in names {
            let formatted = convention.format(name);
            assert!(
                rule.is_satisfied_by(&formatted[2..]),
                "{} / {:?}",
                formatted,
                rule
            );
            let once = convention.ensure(name);
            assert_eq!(once, formatted, "{:?}", rule);
            assert_eq!(convention.ensure(&once), once, "{:?}", rule);
        }
    }
}

#[test]
fn test_format_leaves_conformant_core_alone() {
    let convention = Convention::new().with_casing(CasingRule::Camel);
    assert_eq!(convention.format("userId"), "userId");
    assert_eq!(convention.format("UserId"), "userId");
}

#[test]
fn test_ensure_twice_equals_once() {
    let convention = Convention::new()
        .with_prefix("usp_")
        .with_casing(CasingRule::LowerSnake);
    let once = convention.ensure("UserGetById");
    assert_eq!(once, "usp_user_get_by_id");
    assert_eq!(convention.ensure(&once), once);
    assert!(convention.conforms(&once));
}

#[test]
fn test_table_name_is_schema_qualified() {
    let options = RepositoryOptions::default()
        .with_schema("sales")
        .with_conventions(snake_conventions());
    let repository = Repository::new(Arc::new(options));
    assert_eq!(repository.table_name("OrderLine"), "sales.order_line");
    assert_eq!(repository.column_name("CreatedAt"), "created_at");
}

// =========================================================================
// Enum resolution
// =========================================================================

#[test]
fn test_enum_name_format() {
    let mut conventions = ConventionSet::default();
    conventions.enum_value.naming = Convention::new()
        .with_prefix("st_")
        .with_casing(CasingRule::UpperSnake);
    let resolver = EnumResolver::new(&conventions.enum_value);

    let value = EnumValue::of(&Status::Active);
    assert_eq!(resolver.resolve_type(&value), WireType::String);
    assert_eq!(
        resolver.resolve_value(&value),
        ParamValue::String("st_ACTIVE".to_string())
    );
    assert_eq!(
        resolver.resolve_value(&EnumValue::of(&Status::Inactive)),
        ParamValue::String("st_INACTIVE".to_string())
    );
}

#[test]
fn test_enum_ordinal_widths() {
    let mut conventions = ConventionSet::default();
    conventions.enum_value.value_format = EnumValueFormat::Ordinal;
    let resolver = EnumResolver::new(&conventions.enum_value);

    let cases = [
        (EnumValue::of(&Status::Active), WireType::Byte, ParamValue::U8(1)),
        (EnumValue::of(&Priority::Low), WireType::Int16, ParamValue::I16(10)),
        (
            EnumValue::of(&Region::EuropeWest),
            WireType::Int64,
            ParamValue::I64(1 << 33),
        ),
        (EnumValue::of(&Color::DarkRed), WireType::Int32, ParamValue::I32(3)),
    ];
    for (value, wire_type, expected) in cases {
        assert_eq!(resolver.resolve_type(&value), wire_type);
        assert_eq!(resolver.resolve_value(&value), expected);
    }
}

// =========================================================================
// Parameter building
// =========================================================================

#[test]
fn test_scenario_parameter_prefix_and_casing() {
    let mut conventions = snake_conventions();
    conventions.parameter.naming.prefix = Some("p_".to_string());
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);

    let params = builder
        .build(&Fields::new().with("UserId", "abc"))
        .unwrap();
    let param = params.get("p_user_id").unwrap();
    assert_eq!(param.value, Some(ParamValue::String("abc".to_string())));
    assert_eq!(param.wire_type, None);
}

#[test]
fn test_scenario_byte_enum_ordinal() {
    let mut conventions = ConventionSet::default();
    conventions.enum_value.value_format = EnumValueFormat::Ordinal;
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);

    let params = builder
        .build(&Fields::new().with("Status", Value::enumeration(&Status::Active)))
        .unwrap();
    let param = params.get("Status").unwrap();
    assert_eq!(param.wire_type.map(|w| w.as_str()), Some("byte"));
    assert_eq!(param.value, Some(ParamValue::U8(1)));
}

#[test]
fn test_parameter_order_follows_fields() {
    let conventions = snake_conventions();
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);

    let fields = Fields::new()
        .with("Zeta", 1i32)
        .with_null("Alpha")
        .with("Mid", true);
    let params = builder.build(&fields).unwrap();
    assert_eq!(params.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    assert!(params.get("alpha").unwrap().is_null());
}

#[test]
fn test_parameter_name_conflict() {
    let conventions = snake_conventions();
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);

    let result = builder.build(&Fields::new().with("UserId", 1i32).with("user_id", 2i32));
    match result {
        Err(DbError::ParameterConflict { name, first, second }) => {
            assert_eq!(name, "user_id");
            assert_eq!(first, "UserId");
            assert_eq!(second, "user_id");
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[test]
fn test_offset_datetime_normalized_to_utc() {
    let conventions = ConventionSet {
        date_time_offset_format: DateTimeOffsetFormat::Utc,
        ..ConventionSet::default()
    };
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);

    let local = FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .unwrap();
    let params = builder
        .build(&Fields::new().with("At", Value::DateTimeOffset(local)))
        .unwrap();
    let param = params.get("At").unwrap();
    assert_eq!(param.wire_type, Some(WireType::DateTimeOffset));
    match &param.value {
        Some(ParamValue::DateTimeOffset(v)) => {
            assert_eq!(v.offset().local_minus_utc(), 0);
            assert_eq!(v.to_utc(), Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        }
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_plain_mapping_for_logging() {
    let conventions = snake_conventions();
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);

    let params = builder
        .build(&Fields::new().with("UserId", 5i64).with_null("Note"))
        .unwrap();
    let mapping = to_plain_mapping(&params);
    assert_eq!(mapping["user_id"], serde_json::json!(5));
    assert_eq!(mapping["note"], serde_json::Value::Null);
}

// =========================================================================
// Routine statement resolution
// =========================================================================

#[test]
fn test_scenario_named_function_call() {
    let mut conventions = snake_conventions();
    conventions.routine.naming.prefix = Some("sf_".to_string());
    conventions.parameter.naming.prefix = Some("p_".to_string());
    conventions.parameter.placeholder = PlaceholderFormatter::new(|_, _, name, _| {
        let bare = name.strip_prefix("p_").unwrap_or(name);
        format!("{} => @{}", bare, bare)
    });

    let options = RepositoryOptions::default()
        .with_schema("auth")
        .with_conventions(conventions);
    let repository = Repository::new(Arc::new(options));

    let command = repository
        .plan(
            &RoutineCall::function("UserGetById").with_fields(Fields::new().with("UserId", "abc")),
        )
        .unwrap();
    assert_eq!(command.kind, CommandKind::Text);
    assert_eq!(
        command.text,
        "select * from auth.sf_user_get_by_id(user_id => @user_id)"
    );
    assert_eq!(command.parameters.names().collect::<Vec<_>>(), vec!["p_user_id"]);
}

#[test]
fn test_function_argument_count_matches_parameters() {
    let conventions = snake_conventions();
    let json = JsonSettings::default();
    let builder = ParameterBuilder::new(&conventions, &json);
    let resolver = RoutineResolver::new(None, &conventions);

    let params = builder
        .build(&Fields::new().with("A", 1i32).with("B", 2i32).with_null("C"))
        .unwrap();
    let text = resolver.resolve_command_text(
        "ReportBuild",
        &params,
        Some(RoutineKind::StoredFunction),
    );
    assert_eq!(text, "select * from report_build(@a, @b, @c)");
}

#[test]
fn test_empty_function_call() {
    let conventions = ConventionSet::default();
    let resolver = RoutineResolver::new(Some("ops"), &conventions);
    let text = resolver.resolve_command_text(
        "Cleanup",
        &Default::default(),
        Some(RoutineKind::StoredFunction),
    );
    assert_eq!(text, "select * from ops.Cleanup()");
}

#[test]
fn test_procedure_is_name_alone() {
    let mut conventions = snake_conventions();
    conventions.routine.naming.prefix = Some("usp_".to_string());
    let json = JsonSettings::default();
    let params = ParameterBuilder::new(&conventions, &json)
        .build(&Fields::new().with("UserId", 1i32))
        .unwrap();
    let resolver = RoutineResolver::new(Some("auth"), &conventions);

    assert_eq!(
        resolver.resolve_command_kind(None),
        CommandKind::StoredProcedure
    );
    assert_eq!(
        resolver.resolve_command_text("UserSave", &params, None),
        "auth.usp_user_save"
    );
}
