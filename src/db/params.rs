//! Placeholder rewriting and parameter binding.
//!
//! Commands carry `@name` placeholders. Before execution they are rewritten to the
//! driver's positional syntax and the referenced values are bound in placeholder order:
//!
//! - PostgreSQL: `$n`, one index per distinct name, reused on repetition
//! - MySQL / SQLite: `?`, one binding per occurrence
//!
//! Quoted literals, quoted identifiers, comments and `@@` system variables are copied
//! unchanged, as are `@name` tokens that match no parameter.

use crate::config::DatabaseType;
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, CommandKind, ParamValue, ParameterDescriptor, ParameterSet, TypedArray, WireType,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::HashMap;
use uuid::Uuid;

/// Positional placeholder syntax of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Numbered,
    /// `?`
    Question,
}

impl PlaceholderStyle {
    pub fn for_database(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::PostgreSQL => Self::Numbered,
            DatabaseType::MySQL | DatabaseType::SQLite => Self::Question,
        }
    }
}

/// One value to bind. A `None` value binds NULL, typed from `wire_type` where the
/// driver needs it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding<'a> {
    pub value: Option<&'a ParamValue>,
    pub wire_type: Option<WireType>,
}

impl<'a> From<&'a ParameterDescriptor> for Binding<'a> {
    fn from(param: &'a ParameterDescriptor) -> Self {
        Self {
            value: param.value.as_ref(),
            wire_type: param.wire_type,
        }
    }
}

/// Driver-ready SQL and the values to bind, in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared<'a> {
    pub sql: String,
    pub values: Vec<Binding<'a>>,
}

/// Turn a resolved command into driver SQL for `db_type`.
pub fn prepare<'a>(command: &'a Command, db_type: DatabaseType) -> DbResult<Prepared<'a>> {
    let style = PlaceholderStyle::for_database(db_type);
    match command.kind {
        CommandKind::Text => Ok(rewrite_placeholders(
            &command.text,
            &command.parameters,
            style,
        )),
        CommandKind::StoredProcedure => {
            if !db_type.supports_procedures() {
                return Err(DbError::unsupported(format!(
                    "{} has no stored procedures; call '{}' as a function or statement instead",
                    db_type, command.text
                )));
            }
            Ok(procedure_call(&command.text, &command.parameters, style))
        }
    }
}

/// `CALL name(p1, p2, ...)` with every parameter in set order.
pub fn procedure_call<'a>(
    name: &str,
    parameters: &'a ParameterSet,
    style: PlaceholderStyle,
) -> Prepared<'a> {
    let args = (1..=parameters.len())
        .map(|i| match style {
            PlaceholderStyle::Numbered => format!("${}", i),
            PlaceholderStyle::Question => "?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    Prepared {
        sql: format!("CALL {}({})", name, args),
        values: parameters.iter().map(Binding::from).collect(),
    }
}

/// Rewrite `@name` placeholders that match a parameter.
pub fn rewrite_placeholders<'a>(
    sql: &str,
    parameters: &'a ParameterSet,
    style: PlaceholderStyle,
) -> Prepared<'a> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<Binding<'a>> = Vec::new();
    let mut numbered: HashMap<&str, usize> = HashMap::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = find_closing(&chars, i + 1, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_comment_end(&chars, i + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            '@' if chars.get(i + 1) == Some(&'@') => {
                out.push_str("@@");
                i += 2;
            }
            '@' => {
                let start = i + 1;
                let (name, end) = placeholder_name(&chars, start, parameters);

                match parameters.get(&name) {
                    Some(param) if !name.is_empty() => {
                        match style {
                            PlaceholderStyle::Numbered => {
                                let next = numbered.len() + 1;
                                let index = *numbered.entry(param.name.as_str()).or_insert_with(|| {
                                    values.push(Binding::from(param));
                                    next
                                });
                                out.push('$');
                                out.push_str(&index.to_string());
                            }
                            PlaceholderStyle::Question => {
                                values.push(Binding::from(param));
                                out.push('?');
                            }
                        }
                    }
                    _ => {
                        out.push('@');
                        out.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Prepared { sql: out, values }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// The placeholder name starting at `start` and the index just past it.
///
/// Kebab-cased names (`@user-id`) extend across a `-` only as far as a parameter has
/// that name, so `@count-1` still reads as `@count` minus one.
fn placeholder_name(chars: &[char], start: usize, parameters: &ParameterSet) -> (String, usize) {
    let mut ends = Vec::new();
    let mut end = start;
    loop {
        while end < chars.len() && is_identifier_char(chars[end]) {
            end += 1;
        }
        ends.push(end);
        let continues = chars.get(end) == Some(&'-')
            && chars.get(end + 1).is_some_and(|&c| is_identifier_char(c));
        if !continues {
            break;
        }
        end += 1;
    }

    for &end in ends.iter().skip(1).rev() {
        let name: String = chars[start..end].iter().collect();
        if parameters.get(&name).is_some() {
            return (name, end);
        }
    }
    (chars[start..ends[0]].iter().collect(), ends[0])
}

/// Index just past the closing quote; doubled quotes are consumed as a close/reopen pair.
fn find_closing(chars: &[char], from: usize, quote: char) -> usize {
    chars[from..]
        .iter()
        .position(|&c| c == quote)
        .map_or(chars.len(), |p| from + p + 1)
}

fn find_block_comment_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

// =============================================================================
// Binding
// =============================================================================

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    binding: Binding<'_>,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    let Some(value) = binding.value else {
        return bind_postgres_null(query, binding.wire_type);
    };
    match value {
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::I8(v) => query.bind(*v as i16),
        ParamValue::I16(v) => query.bind(*v),
        ParamValue::I32(v) => query.bind(*v),
        ParamValue::I64(v) => query.bind(*v),
        ParamValue::U8(v) => query.bind(*v as i16),
        ParamValue::U16(v) => query.bind(*v as i32),
        ParamValue::U32(v) => query.bind(*v as i64),
        ParamValue::U64(v) => match i64::try_from(*v) {
            Ok(v) => query.bind(v),
            Err(_) => query.bind(Decimal::from(*v)),
        },
        ParamValue::F32(v) => query.bind(*v),
        ParamValue::F64(v) => query.bind(*v),
        ParamValue::Decimal(v) => query.bind(*v),
        ParamValue::String(v) => query.bind(v.clone()),
        ParamValue::Bytes(v) => query.bind(v.clone()),
        ParamValue::Uuid(v) => query.bind(*v),
        ParamValue::Date(v) => query.bind(*v),
        ParamValue::Time(v) => query.bind(*v),
        ParamValue::DateTime(v) => query.bind(*v),
        ParamValue::DateTimeOffset(v) => query.bind(v.to_utc()),
        ParamValue::Array(array) => match array {
            TypedArray::Bool(v) => query.bind(v.clone()),
            TypedArray::I8(v) => query.bind(v.iter().map(|&x| x as i16).collect::<Vec<_>>()),
            TypedArray::I16(v) => query.bind(v.clone()),
            TypedArray::I32(v) => query.bind(v.clone()),
            TypedArray::I64(v) => query.bind(v.clone()),
            TypedArray::U8(v) => query.bind(v.iter().map(|&x| x as i16).collect::<Vec<_>>()),
            TypedArray::U16(v) => query.bind(v.iter().map(|&x| x as i32).collect::<Vec<_>>()),
            TypedArray::U32(v) => query.bind(v.iter().map(|&x| x as i64).collect::<Vec<_>>()),
            TypedArray::U64(v) => {
                query.bind(v.iter().map(|&x| Decimal::from(x)).collect::<Vec<_>>())
            }
            TypedArray::F32(v) => query.bind(v.clone()),
            TypedArray::F64(v) => query.bind(v.clone()),
            TypedArray::Decimal(v) => query.bind(v.clone()),
            TypedArray::String(v) => query.bind(v.clone()),
        },
        ParamValue::List(_) | ParamValue::Json(_) => query.bind(Json(value.to_json())),
    }
}

/// PostgreSQL checks the type of every parameter, so a NULL carries the declared wire
/// type. Without one it goes out as text.
fn bind_postgres_null<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    wire_type: Option<WireType>,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match wire_type {
        None | Some(WireType::String) => query.bind(None::<String>),
        Some(WireType::Boolean) => query.bind(None::<bool>),
        Some(WireType::Byte | WireType::Int16) => query.bind(None::<i16>),
        Some(WireType::Int32) => query.bind(None::<i32>),
        Some(WireType::Int64) => query.bind(None::<i64>),
        Some(WireType::Single) => query.bind(None::<f32>),
        Some(WireType::Double) => query.bind(None::<f64>),
        Some(WireType::Decimal) => query.bind(None::<Decimal>),
        Some(WireType::Binary) => query.bind(None::<Vec<u8>>),
        Some(WireType::Guid) => query.bind(None::<Uuid>),
        Some(WireType::Date) => query.bind(None::<NaiveDate>),
        Some(WireType::Time) => query.bind(None::<NaiveTime>),
        Some(WireType::DateTime) => query.bind(None::<NaiveDateTime>),
        Some(WireType::DateTimeOffset) => query.bind(None::<DateTime<Utc>>),
        Some(WireType::Json) => query.bind(None::<Json<serde_json::Value>>),
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    binding: Binding<'_>,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    let Some(value) = binding.value else {
        return query.bind(None::<String>);
    };
    match value {
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::I8(v) => query.bind(*v),
        ParamValue::I16(v) => query.bind(*v),
        ParamValue::I32(v) => query.bind(*v),
        ParamValue::I64(v) => query.bind(*v),
        ParamValue::U8(v) => query.bind(*v),
        ParamValue::U16(v) => query.bind(*v),
        ParamValue::U32(v) => query.bind(*v),
        ParamValue::U64(v) => query.bind(*v),
        ParamValue::F32(v) => query.bind(*v),
        ParamValue::F64(v) => query.bind(*v),
        ParamValue::Decimal(v) => query.bind(*v),
        ParamValue::String(v) => query.bind(v.clone()),
        ParamValue::Bytes(v) => query.bind(v.clone()),
        ParamValue::Uuid(v) => query.bind(v.to_string()),
        ParamValue::Date(v) => query.bind(*v),
        ParamValue::Time(v) => query.bind(*v),
        ParamValue::DateTime(v) => query.bind(*v),
        ParamValue::DateTimeOffset(v) => query.bind(v.to_utc()),
        // No array type; sent as JSON text
        ParamValue::Array(array) => query.bind(array.to_json().to_string()),
        ParamValue::List(_) | ParamValue::Json(_) => query.bind(Json(value.to_json())),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    binding: Binding<'_>,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    let Some(value) = binding.value else {
        return query.bind(None::<String>);
    };
    match value {
        ParamValue::Bool(v) => query.bind(*v),
        ParamValue::I8(v) => query.bind(*v),
        ParamValue::I16(v) => query.bind(*v),
        ParamValue::I32(v) => query.bind(*v),
        ParamValue::I64(v) => query.bind(*v),
        ParamValue::U8(v) => query.bind(*v),
        ParamValue::U16(v) => query.bind(*v),
        ParamValue::U32(v) => query.bind(*v),
        ParamValue::U64(v) => match i64::try_from(*v) {
            Ok(v) => query.bind(v),
            Err(_) => query.bind(v.to_string()),
        },
        ParamValue::F32(v) => query.bind(*v),
        ParamValue::F64(v) => query.bind(*v),
        // SQLite has no decimal or uuid type, store as text
        ParamValue::Decimal(v) => query.bind(v.to_string()),
        ParamValue::Uuid(v) => query.bind(v.to_string()),
        ParamValue::String(v) => query.bind(v.clone()),
        ParamValue::Bytes(v) => query.bind(v.clone()),
        ParamValue::Date(v) => query.bind(*v),
        ParamValue::Time(v) => query.bind(*v),
        ParamValue::DateTime(v) => query.bind(*v),
        ParamValue::DateTimeOffset(v) => query.bind(v.to_rfc3339()),
        ParamValue::Array(array) => query.bind(array.to_json().to_string()),
        ParamValue::List(_) | ParamValue::Json(_) => query.bind(value.to_json().to_string()),
    }
}
