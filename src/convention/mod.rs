//! Naming conventions.
//!
//! A [`Convention`] turns a simple identifier into its final database name by applying
//! an optional casing rule and wrapping the result in an optional prefix and suffix.
//! Specialised conventions add routine kind defaults, parameter placeholder syntax and
//! enum encoding. A [`ConventionSet`] groups one convention per object kind.

pub mod casing;

pub use casing::CasingRule;

use crate::models::{ParamValue, RoutineKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Prefix, suffix and casing applied to a simple identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Convention {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub casing: Option<CasingRule>,
}

impl Convention {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn with_casing(mut self, casing: CasingRule) -> Self {
        self.casing = Some(casing);
        self
    }

    /// Format a simple name: re-case it unless it already conforms, then wrap it in
    /// prefix and suffix.
    pub fn format(&self, simple_name: &str) -> String {
        let core = match self.casing {
            Some(rule) if !rule.is_satisfied_by(simple_name) => rule.apply(simple_name),
            _ => simple_name.to_string(),
        };

        let prefix = self.prefix.as_deref().unwrap_or_default();
        let suffix = self.suffix.as_deref().unwrap_or_default();
        let mut out = String::with_capacity(prefix.len() + core.len() + suffix.len());
        out.push_str(prefix);
        out.push_str(&core);
        out.push_str(suffix);
        out
    }

    /// Whether `name` already looks like the output of [`format`](Self::format): it
    /// carries the prefix and suffix and the part between them satisfies the casing.
    pub fn conforms(&self, name: &str) -> bool {
        let prefix = self.prefix.as_deref().unwrap_or_default();
        let suffix = self.suffix.as_deref().unwrap_or_default();

        let Some(rest) = name.strip_prefix(prefix) else {
            return false;
        };
        let Some(core) = rest.strip_suffix(suffix) else {
            return false;
        };
        if core.is_empty() && !(prefix.is_empty() && suffix.is_empty()) {
            return false;
        }

        self.casing.is_none_or(|rule| rule.is_satisfied_by(core))
    }

    /// Format `name` unless it already conforms.
    ///
    /// Unlike `format`, applying `ensure` repeatedly never stacks prefixes or suffixes.
    pub fn ensure(&self, name: &str) -> String {
        if self.conforms(name) {
            name.to_string()
        } else {
            self.format(name)
        }
    }

    /// Format a name and qualify it with a schema.
    pub fn format_qualified(&self, schema: Option<&str>, simple_name: &str) -> String {
        qualify(schema, &self.format(simple_name))
    }
}

/// Prepend `schema.` when a non-empty schema is given.
pub fn qualify(schema: Option<&str>, name: &str) -> String {
    match schema.map(str::trim).filter(|s| !s.is_empty()) {
        Some(schema) => format!("{}.{}", schema, name),
        None => name.to_string(),
    }
}

/// Routine naming plus the routine kind used when a call does not specify one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutineConvention {
    pub naming: Convention,
    pub default_kind: RoutineKind,
}

impl RoutineConvention {
    pub fn format(&self, simple_name: &str) -> String {
        self.naming.format(simple_name)
    }

    /// The explicit kind if given, otherwise the configured default.
    pub fn effective_kind(&self, kind: Option<RoutineKind>) -> RoutineKind {
        kind.unwrap_or(self.default_kind)
    }
}

type PlaceholderFn = dyn Fn(&str, RoutineKind, &str, Option<&ParamValue>) -> String + Send + Sync;

/// Produces the text of one argument inside a generated function call.
///
/// Arguments are `(routine_name, routine_kind, parameter_name, parameter_value)`.
#[derive(Clone)]
pub struct PlaceholderFormatter(Arc<PlaceholderFn>);

impl PlaceholderFormatter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, RoutineKind, &str, Option<&ParamValue>) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// `@name`
    pub fn positional() -> Self {
        Self::new(|_, _, name, _| format!("@{}", name))
    }

    /// `name => @name`
    pub fn named() -> Self {
        Self::new(|_, _, name, _| format!("{} => @{}", name, name))
    }

    pub fn format(
        &self,
        routine_name: &str,
        routine_kind: RoutineKind,
        parameter_name: &str,
        value: Option<&ParamValue>,
    ) -> String {
        (self.0)(routine_name, routine_kind, parameter_name, value)
    }
}

impl Default for PlaceholderFormatter {
    fn default() -> Self {
        Self::positional()
    }
}

impl fmt::Debug for PlaceholderFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaceholderFormatter")
    }
}

/// Formatters compare by identity.
impl PartialEq for PlaceholderFormatter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Parameter naming plus the placeholder syntax used in function calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterConvention {
    pub naming: Convention,
    pub placeholder: PlaceholderFormatter,
}

impl ParameterConvention {
    pub fn format(&self, simple_name: &str) -> String {
        self.naming.format(simple_name)
    }
}

/// How enum values are sent to the database.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EnumValueFormat {
    /// Formatted variant name as text
    #[default]
    Name,
    /// Numeric code at the enum's storage width
    Ordinal,
}

/// Enum naming plus the value format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumConvention {
    pub naming: Convention,
    pub value_format: EnumValueFormat,
}

/// Normalization applied to date/time values that carry an offset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum DateTimeOffsetFormat {
    #[default]
    Utc,
    Local,
}

/// One convention per object kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConventionSet {
    pub table: Convention,
    pub column: Convention,
    pub routine: RoutineConvention,
    pub parameter: ParameterConvention,
    pub enum_value: EnumConvention,
    pub date_time_offset_format: DateTimeOffsetFormat,
}

impl ConventionSet {
    /// Apply the same casing rule to every object kind.
    pub fn with_casing(mut self, casing: CasingRule) -> Self {
        self.table.casing = Some(casing);
        self.column.casing = Some(casing);
        self.routine.naming.casing = Some(casing);
        self.parameter.naming.casing = Some(casing);
        self.enum_value.naming.casing = Some(casing);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snake(prefix: &str, suffix: &str) -> Convention {
        Convention::new()
            .with_prefix(prefix)
            .with_suffix(suffix)
            .with_casing(CasingRule::LowerSnake)
    }

    #[test]
    fn test_format_wraps_and_cases() {
        let c = snake("p_", "_in");
        assert_eq!(c.format("UserId"), "p_user_id_in");
    }

    #[test]
    fn test_format_without_casing_keeps_name() {
        let c = Convention::new().with_prefix("t_");
        assert_eq!(c.format("UserAccount"), "t_UserAccount");
        assert_eq!(Convention::new().format("AsIs"), "AsIs");
    }

    #[test]
    fn test_format_keeps_conformant_casing() {
        let c = Convention::new().with_casing(CasingRule::LowerSnake);
        assert_eq!(c.format("user_id"), "user_id");
    }

    #[test]
    fn test_format_is_not_idempotent_but_ensure_is() {
        let c = snake("p_", "");
        let once = c.format("UserId");
        assert_eq!(c.format(&once), "p_p_user_id");
        assert_eq!(c.ensure(&once), once);
        assert_eq!(c.ensure(&c.ensure("UserId")), "p_user_id");
    }

    #[test]
    fn test_ensure_with_single_letter_words() {
        let c = Convention::new()
            .with_prefix("p_")
            .with_casing(CasingRule::Pascal);
        let once = c.ensure("x_y_coordinate");
        assert_eq!(once, "p_XyCoordinate");
        assert!(c.conforms(&once));
        assert_eq!(c.ensure(&once), once);
    }

    #[test]
    fn test_conforms() {
        let c = snake("sf_", "");
        assert!(c.conforms("sf_user_get"));
        assert!(!c.conforms("user_get"));
        assert!(!c.conforms("sf_UserGet"));
        assert!(!c.conforms("sf_"));
        assert!(Convention::new().conforms("Anything"));
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(Some("auth"), "users"), "auth.users");
        assert_eq!(qualify(Some(""), "users"), "users");
        assert_eq!(qualify(None, "users"), "users");
        let c = Convention::new().with_casing(CasingRule::LowerSnake);
        assert_eq!(c.format_qualified(Some("auth"), "UserRole"), "auth.user_role");
    }

    #[test]
    fn test_clone_is_independent() {
        let original = ConventionSet::default().with_casing(CasingRule::LowerSnake);
        let mut copy = original.clone();
        copy.parameter.naming.prefix = Some("p_".to_string());
        copy.routine.default_kind = RoutineKind::StoredFunction;

        assert_eq!(original.parameter.naming.prefix, None);
        assert_eq!(original.routine.default_kind, RoutineKind::StoredProcedure);
        assert_ne!(original, copy);
    }

    #[test]
    fn test_placeholder_formatters() {
        let kind = RoutineKind::StoredFunction;
        assert_eq!(
            PlaceholderFormatter::positional().format("f", kind, "id", None),
            "@id"
        );
        assert_eq!(
            PlaceholderFormatter::named().format("f", kind, "id", None),
            "id => @id"
        );
    }

    #[test]
    fn test_effective_kind() {
        let rc = RoutineConvention {
            default_kind: RoutineKind::StoredFunction,
            ..Default::default()
        };
        assert_eq!(rc.effective_kind(None), RoutineKind::StoredFunction);
        assert_eq!(
            rc.effective_kind(Some(RoutineKind::StoredProcedure)),
            RoutineKind::StoredProcedure
        );
    }
}
