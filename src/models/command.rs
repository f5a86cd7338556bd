//! Command, routine and execution-context models.

use crate::error::{DbError, DbResult};
use crate::models::parameter::ParameterSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One result row: column name to value, in column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Kind of stored routine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    #[default]
    StoredProcedure,
    StoredFunction,
}

impl std::fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoredProcedure => write!(f, "stored_procedure"),
            Self::StoredFunction => write!(f, "stored_function"),
        }
    }
}

/// How the execution capability interprets command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Text,
    StoredProcedure,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::StoredProcedure => write!(f, "stored_procedure"),
        }
    }
}

/// A fully resolved command, ready for the execution capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: ParameterSet,
}

impl Command {
    pub fn text(text: impl Into<String>, parameters: ParameterSet) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            parameters,
        }
    }
}

/// Row cardinality expected from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fetch {
    /// At least one row; the first is returned
    First,
    /// First row if any
    FirstOrDefault,
    /// Exactly one row
    Single,
    /// Zero or one row
    SingleOrDefault,
    All,
}

impl Fetch {
    /// Maximum number of rows an implementation needs to read to decide the outcome.
    pub fn row_limit(&self) -> usize {
        match self {
            Self::First | Self::FirstOrDefault => 1,
            Self::Single | Self::SingleOrDefault => 2,
            Self::All => usize::MAX,
        }
    }

    /// Enforce this cardinality on rows read from the database.
    ///
    /// Execution capabilities call this; the orchestrator never pre-validates row counts.
    pub fn apply(&self, mut rows: Vec<Row>) -> DbResult<Vec<Row>> {
        match self {
            Self::All => Ok(rows),
            Self::First => {
                if rows.is_empty() {
                    return Err(DbError::NoRows);
                }
                rows.truncate(1);
                Ok(rows)
            }
            Self::FirstOrDefault => {
                rows.truncate(1);
                Ok(rows)
            }
            Self::Single => match rows.len() {
                0 => Err(DbError::NoRows),
                1 => Ok(rows),
                found => Err(DbError::MultipleRows { found }),
            },
            Self::SingleOrDefault => match rows.len() {
                0 | 1 => Ok(rows),
                found => Err(DbError::MultipleRows { found }),
            },
        }
    }
}

/// Raw result of one execution, before typed decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    RowsAffected(u64),
    Rows(Vec<Row>),
    ResultSets(Vec<Vec<Row>>),
}

impl ExecutionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RowsAffected(_) => "rows_affected",
            Self::Rows(_) => "rows",
            Self::ResultSets(_) => "result_sets",
        }
    }
}

/// Pending call, handed to the pre-execution hook.
#[derive(Debug, Clone, PartialEq)]
pub struct PreExecutionContext {
    /// Name as supplied by the caller (the statement text for ad-hoc statements)
    pub simple_name: String,
    /// Convention-formatted, schema-qualified name
    pub resolved_name: String,
    /// `None` for ad-hoc statements
    pub routine_kind: Option<RoutineKind>,
    pub parameters: ParameterSet,
}

/// Completed call, handed to the post-execution hook.
#[derive(Debug, Clone, PartialEq)]
pub struct PostExecutionContext {
    pub simple_name: String,
    pub resolved_name: String,
    pub routine_kind: Option<RoutineKind>,
    pub parameters: ParameterSet,
    pub result: ExecutionOutcome,
}

impl PostExecutionContext {
    pub(crate) fn new(pre: PreExecutionContext, result: ExecutionOutcome) -> Self {
        Self {
            simple_name: pre.simple_name,
            resolved_name: pre.resolved_name,
            routine_kind: pre.routine_kind,
            parameters: pre.parameters,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".to_string(), JsonValue::from(i as i64));
                row
            })
            .collect()
    }

    #[test]
    fn test_fetch_first() {
        assert!(matches!(Fetch::First.apply(rows(0)), Err(DbError::NoRows)));
        assert_eq!(Fetch::First.apply(rows(3)).unwrap().len(), 1);
        assert!(Fetch::FirstOrDefault.apply(rows(0)).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_single() {
        assert!(matches!(Fetch::Single.apply(rows(0)), Err(DbError::NoRows)));
        assert!(matches!(
            Fetch::Single.apply(rows(2)),
            Err(DbError::MultipleRows { found: 2 })
        ));
        assert_eq!(Fetch::Single.apply(rows(1)).unwrap().len(), 1);
        assert!(Fetch::SingleOrDefault.apply(rows(0)).unwrap().is_empty());
        assert!(Fetch::SingleOrDefault.apply(rows(2)).is_err());
    }

    #[test]
    fn test_row_limits() {
        assert_eq!(Fetch::First.row_limit(), 1);
        assert_eq!(Fetch::SingleOrDefault.row_limit(), 2);
        assert_eq!(Fetch::All.row_limit(), usize::MAX);
    }

    #[test]
    fn test_default_routine_kind() {
        assert_eq!(RoutineKind::default(), RoutineKind::StoredProcedure);
        assert_eq!(RoutineKind::StoredFunction.to_string(), "stored_function");
    }
}
