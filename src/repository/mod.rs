//! Execution orchestrator.
//!
//! A [`Repository`] turns an ad-hoc [`Statement`] or a named [`RoutineCall`] into a
//! resolved [`Command`], runs it on a connection and decodes the rows with serde.
//!
//! Every call follows the same sequence:
//!
//! 1. acquire a connection from the configured [`ConnectionSource`], opening it if closed
//! 2. build the parameter set and pending call context
//! 3. run the pre-execution hook
//! 4. resolve command text and kind, emit a log event at the configured level
//! 5. delegate to the connection with the call's cancellation token
//! 6. run the post-execution hook, whose outcome is the final result
//! 7. on failure, give the exception handler a chance to replace the error
//! 8. close the connection if step 1 created it
//!
//! Row cardinality for the single-row variants is enforced by the connection.

pub mod connection;
pub mod hooks;
pub mod unit_of_work;

pub use connection::{ConnectionFactory, ConnectionSource, DbConnection, SharedConnection, share};
pub use hooks::{ExceptionHandler, Hooks, PostExecutionHook, PreExecutionHook};
pub use unit_of_work::UnitOfWork;

use crate::convention::qualify;
use crate::error::{DbError, DbResult};
use crate::marshal::{ParameterBuilder, RoutineResolver, to_plain_mapping};
use crate::models::{
    Command, ExecutionOutcome, Fetch, Fields, ParameterSet, PostExecutionContext,
    PreExecutionContext, RoutineKind, Row, ToFields,
};
use crate::options::{OptionsRegistry, RepositoryOptions};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// An ad-hoc SQL statement with `@name` parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub fields: Fields,
    pub cancel: CancellationToken,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            fields: Fields::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_fields(mut self, fields: impl ToFields) -> Self {
        self.fields = fields.to_fields();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Invocation of a stored routine by simple name.
#[derive(Debug, Clone)]
pub struct RoutineCall {
    pub name: String,
    pub fields: Fields,
    /// `None` uses the routine convention's default kind
    pub kind: Option<RoutineKind>,
    pub cancel: CancellationToken,
}

impl RoutineCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Fields::new(),
            kind: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(name).with_kind(RoutineKind::StoredFunction)
    }

    pub fn procedure(name: impl Into<String>) -> Self {
        Self::new(name).with_kind(RoutineKind::StoredProcedure)
    }

    pub fn with_fields(mut self, fields: impl ToFields) -> Self {
        self.fields = fields.to_fields();
        self
    }

    pub fn with_kind(mut self, kind: RoutineKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl From<&str> for RoutineCall {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Result sets of a multi-result call, read front to back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipleResults {
    sets: VecDeque<Vec<Row>>,
}

impl MultipleResults {
    pub fn new(sets: Vec<Vec<Row>>) -> Self {
        Self { sets: sets.into() }
    }

    /// Decode the next result set.
    pub fn read<T: DeserializeOwned>(&mut self) -> DbResult<Vec<T>> {
        let rows = self
            .sets
            .pop_front()
            .ok_or_else(|| DbError::invalid_input("No more result sets to read"))?;
        rows.into_iter().map(decode_row).collect()
    }

    /// Decode the first row of the next result set, if any.
    pub fn read_first_or_default<T: DeserializeOwned>(&mut self) -> DbResult<Option<T>> {
        Ok(self.read::<T>()?.into_iter().next())
    }

    pub fn remaining(&self) -> usize {
        self.sets.len()
    }

    pub fn is_consumed(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn into_raw(self) -> Vec<Vec<Row>> {
        self.sets.into()
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Execute,
    Query(Fetch),
    Multiple,
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Query(_) => "query",
            Self::Multiple => "query_multiple",
        }
    }
}

/// A call before parameters are built.
struct Pending {
    simple_name: String,
    resolved_name: String,
    routine_kind: Option<RoutineKind>,
    routine: bool,
    fields: Fields,
    cancel: CancellationToken,
}

/// Orchestrates convention resolution, marshalling and execution for one repository.
#[derive(Clone)]
pub struct Repository {
    options: Arc<RepositoryOptions>,
    source: Option<ConnectionSource>,
    hooks: Hooks,
}

impl Repository {
    pub fn new(options: Arc<RepositoryOptions>) -> Self {
        Self {
            options,
            source: None,
            hooks: Hooks::default(),
        }
    }

    /// A repository configured with the options registered for `R`.
    pub fn for_type<R: 'static>(registry: &OptionsRegistry) -> DbResult<Self> {
        Ok(Self::new(registry.resolve::<R>()?))
    }

    /// Request a fresh connection per call from `factory`.
    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.source = Some(ConnectionSource::Factory(factory));
        self
    }

    /// Run every call on a caller-owned connection.
    pub fn with_connection(mut self, connection: SharedConnection) -> Self {
        self.source = Some(ConnectionSource::Supplied(connection));
        self
    }

    pub(crate) fn with_unit_of_work(mut self, connection: SharedConnection) -> Self {
        self.source = Some(ConnectionSource::UnitOfWork(connection));
        self
    }

    pub fn with_pre_execution<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut PreExecutionContext) + Send + Sync + 'static,
    {
        self.hooks.pre_execution = Some(Arc::new(hook));
        self
    }

    pub fn with_post_execution<F>(mut self, hook: F) -> Self
    where
        F: Fn(PostExecutionContext) -> ExecutionOutcome + Send + Sync + 'static,
    {
        self.hooks.post_execution = Some(Arc::new(hook));
        self
    }

    pub fn with_exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.hooks.exception_handler = Some(Arc::new(handler));
        self
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn source(&self) -> Option<&ConnectionSource> {
        self.source.as_ref()
    }

    /// Schema-qualified table name for composing ad-hoc SQL.
    pub fn table_name(&self, simple_name: &str) -> String {
        qualify(
            self.options.schema(),
            &self.options.conventions.table.format(simple_name),
        )
    }

    pub fn column_name(&self, simple_name: &str) -> String {
        self.options.conventions.column.format(simple_name)
    }

    pub fn routine_name(&self, simple_name: &str) -> String {
        self.resolver().resolve_name(simple_name)
    }

    pub fn build_parameters(&self, fields: &Fields) -> DbResult<ParameterSet> {
        ParameterBuilder::new(&self.options.conventions, &self.options.json).build(fields)
    }

    pub fn resolver(&self) -> RoutineResolver<'_> {
        RoutineResolver::new(self.options.schema(), &self.options.conventions)
    }

    /// The command a routine call resolves to, without executing it.
    pub fn plan(&self, call: &RoutineCall) -> DbResult<Command> {
        let parameters = self.build_parameters(&call.fields)?;
        let resolver = self.resolver();
        Ok(Command {
            text: resolver.resolve_command_text(&call.name, &parameters, call.kind),
            kind: resolver.resolve_command_kind(call.kind),
            parameters,
        })
    }

    // --- ad-hoc statements ---

    pub async fn execute_sql(&self, statement: impl Into<Statement>) -> DbResult<u64> {
        let outcome = self.run(self.statement(statement), Operation::Execute).await?;
        rows_affected(outcome)
    }

    pub async fn get_first_sql<T: DeserializeOwned>(
        &self,
        statement: impl Into<Statement>,
    ) -> DbResult<T> {
        let rows = self.query(self.statement(statement), Fetch::First).await?;
        first(rows)?.ok_or(DbError::NoRows)
    }

    pub async fn get_first_or_default_sql<T: DeserializeOwned>(
        &self,
        statement: impl Into<Statement>,
    ) -> DbResult<Option<T>> {
        let rows = self
            .query(self.statement(statement), Fetch::FirstOrDefault)
            .await?;
        first(rows)
    }

    pub async fn get_single_sql<T: DeserializeOwned>(
        &self,
        statement: impl Into<Statement>,
    ) -> DbResult<T> {
        let rows = self.query(self.statement(statement), Fetch::Single).await?;
        first(rows)?.ok_or(DbError::NoRows)
    }

    pub async fn get_single_or_default_sql<T: DeserializeOwned>(
        &self,
        statement: impl Into<Statement>,
    ) -> DbResult<Option<T>> {
        let rows = self
            .query(self.statement(statement), Fetch::SingleOrDefault)
            .await?;
        first(rows)
    }

    pub async fn get_many_sql<T: DeserializeOwned>(
        &self,
        statement: impl Into<Statement>,
    ) -> DbResult<Vec<T>> {
        let rows = self.query(self.statement(statement), Fetch::All).await?;
        rows.into_iter().map(decode_row).collect()
    }

    pub async fn get_multiple_sql(
        &self,
        statement: impl Into<Statement>,
    ) -> DbResult<MultipleResults> {
        let outcome = self.run(self.statement(statement), Operation::Multiple).await?;
        result_sets(outcome)
    }

    // --- routines ---

    pub async fn execute_routine(&self, call: impl Into<RoutineCall>) -> DbResult<u64> {
        let outcome = self.run(self.routine(call), Operation::Execute).await?;
        rows_affected(outcome)
    }

    pub async fn get_first_routine<T: DeserializeOwned>(
        &self,
        call: impl Into<RoutineCall>,
    ) -> DbResult<T> {
        let rows = self.query(self.routine(call), Fetch::First).await?;
        first(rows)?.ok_or(DbError::NoRows)
    }

    pub async fn get_first_or_default_routine<T: DeserializeOwned>(
        &self,
        call: impl Into<RoutineCall>,
    ) -> DbResult<Option<T>> {
        let rows = self.query(self.routine(call), Fetch::FirstOrDefault).await?;
        first(rows)
    }

    pub async fn get_single_routine<T: DeserializeOwned>(
        &self,
        call: impl Into<RoutineCall>,
    ) -> DbResult<T> {
        let rows = self.query(self.routine(call), Fetch::Single).await?;
        first(rows)?.ok_or(DbError::NoRows)
    }

    pub async fn get_single_or_default_routine<T: DeserializeOwned>(
        &self,
        call: impl Into<RoutineCall>,
    ) -> DbResult<Option<T>> {
        let rows = self.query(self.routine(call), Fetch::SingleOrDefault).await?;
        first(rows)
    }

    pub async fn get_many_routine<T: DeserializeOwned>(
        &self,
        call: impl Into<RoutineCall>,
    ) -> DbResult<Vec<T>> {
        let rows = self.query(self.routine(call), Fetch::All).await?;
        rows.into_iter().map(decode_row).collect()
    }

    pub async fn get_multiple_routine(
        &self,
        call: impl Into<RoutineCall>,
    ) -> DbResult<MultipleResults> {
        let outcome = self.run(self.routine(call), Operation::Multiple).await?;
        result_sets(outcome)
    }

    // --- internals ---

    fn statement(&self, statement: impl Into<Statement>) -> Pending {
        let statement = statement.into();
        Pending {
            simple_name: statement.sql.clone(),
            resolved_name: statement.sql,
            routine_kind: None,
            routine: false,
            fields: statement.fields,
            cancel: statement.cancel,
        }
    }

    fn routine(&self, call: impl Into<RoutineCall>) -> Pending {
        let call = call.into();
        Pending {
            resolved_name: self.routine_name(&call.name),
            simple_name: call.name,
            routine_kind: Some(self.resolver().effective_kind(call.kind)),
            routine: true,
            fields: call.fields,
            cancel: call.cancel,
        }
    }

    async fn query(&self, pending: Pending, fetch: Fetch) -> DbResult<Vec<Row>> {
        match self.run(pending, Operation::Query(fetch)).await? {
            ExecutionOutcome::Rows(rows) => Ok(rows),
            other => Err(unexpected_outcome("rows", &other)),
        }
    }

    async fn run(&self, pending: Pending, op: Operation) -> DbResult<ExecutionOutcome> {
        self.run_inner(pending, op)
            .await
            .map_err(|e| self.hooks.translate(e))
    }

    async fn run_inner(&self, pending: Pending, op: Operation) -> DbResult<ExecutionOutcome> {
        let source = self.source.as_ref().ok_or(DbError::NoConnectionSource)?;
        let mut lease = source
            .acquire(self.options.connection_key.as_deref())
            .await?;

        let result = self.dispatch(lease.connection_mut(), pending, op).await;
        lease.release().await;
        result
    }

    async fn dispatch(
        &self,
        connection: &mut dyn DbConnection,
        pending: Pending,
        op: Operation,
    ) -> DbResult<ExecutionOutcome> {
        let parameters = self.build_parameters(&pending.fields)?;
        let mut ctx = PreExecutionContext {
            simple_name: pending.simple_name,
            resolved_name: pending.resolved_name,
            routine_kind: pending.routine_kind,
            parameters,
        };
        self.hooks.before(&mut ctx);

        let command = if pending.routine {
            let (kind, text) = self.resolver().command_for(&ctx);
            Command {
                text,
                kind,
                parameters: ctx.parameters.clone(),
            }
        } else {
            Command::text(ctx.resolved_name.clone(), ctx.parameters.clone())
        };
        self.log_command(&command, op);

        let cancel = &pending.cancel;
        let outcome = match op {
            Operation::Execute => {
                ExecutionOutcome::RowsAffected(connection.execute(&command, cancel).await?)
            }
            Operation::Query(fetch) => {
                ExecutionOutcome::Rows(connection.query(&command, fetch, cancel).await?)
            }
            Operation::Multiple => {
                ExecutionOutcome::ResultSets(connection.query_multiple(&command, cancel).await?)
            }
        };

        Ok(self.hooks.after(PostExecutionContext::new(ctx, outcome)))
    }

    fn log_command(&self, command: &Command, op: Operation) {
        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    $level,
                    operation = op.name(),
                    command_kind = %command.kind,
                    command_text = %command.text,
                    parameters = %JsonValue::Object(to_plain_mapping(&command.parameters)),
                    "Executing command"
                )
            };
        }

        let level = self.options.log_level;
        if level == Level::ERROR {
            emit!(Level::ERROR);
        } else if level == Level::WARN {
            emit!(Level::WARN);
        } else if level == Level::INFO {
            emit!(Level::INFO);
        } else if level == Level::DEBUG {
            emit!(Level::DEBUG);
        } else {
            emit!(Level::TRACE);
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("schema", &self.options.schema)
            .field("source", &self.source)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Decode one row, falling back to the lone column value for scalar targets.
pub fn decode_row<T: DeserializeOwned>(row: Row) -> DbResult<T> {
    let single = if row.len() == 1 {
        row.values().next().cloned()
    } else {
        None
    };

    match serde_json::from_value(JsonValue::Object(row)) {
        Ok(value) => Ok(value),
        Err(e) => match single {
            Some(value) => serde_json::from_value(value).map_err(|_| DbError::from(e)),
            None => Err(e.into()),
        },
    }
}

fn first<T: DeserializeOwned>(rows: Vec<Row>) -> DbResult<Option<T>> {
    rows.into_iter().next().map(decode_row).transpose()
}

fn rows_affected(outcome: ExecutionOutcome) -> DbResult<u64> {
    match outcome {
        ExecutionOutcome::RowsAffected(n) => Ok(n),
        other => Err(unexpected_outcome("rows_affected", &other)),
    }
}

fn result_sets(outcome: ExecutionOutcome) -> DbResult<MultipleResults> {
    match outcome {
        ExecutionOutcome::ResultSets(sets) => Ok(MultipleResults::new(sets)),
        other => Err(unexpected_outcome("result_sets", &other)),
    }
}

fn unexpected_outcome(expected: &str, actual: &ExecutionOutcome) -> DbError {
    DbError::internal(format!(
        "Post-execution hook returned {} where {} was expected",
        actual.kind(),
        expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn row(pairs: &[(&str, JsonValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    #[test]
    fn test_decode_struct() {
        let user: User =
            decode_row(row(&[("id", 1.into()), ("name", "ann".into())])).unwrap();
        assert_eq!(
            user,
            User {
                id: 1,
                name: "ann".to_string()
            }
        );
    }

    #[test]
    fn test_decode_scalar_from_single_column() {
        let count: i64 = decode_row(row(&[("count", 5.into())])).unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_decode_failure_is_serialization_error() {
        let err = decode_row::<User>(row(&[("id", "x".into())])).unwrap_err();
        assert!(matches!(err, DbError::Serialization { .. }));
    }

    #[test]
    fn test_multiple_results_reading() {
        let mut results = MultipleResults::new(vec![
            vec![row(&[("n", 1.into())]), row(&[("n", 2.into())])],
            vec![],
        ]);
        assert_eq!(results.remaining(), 2);
        assert_eq!(results.read::<i64>().unwrap(), vec![1, 2]);
        assert_eq!(results.read_first_or_default::<i64>().unwrap(), None);
        assert!(results.is_consumed());
        assert!(results.read::<i64>().is_err());
    }

    #[test]
    fn test_names_for_ad_hoc_sql() {
        let mut options = RepositoryOptions::default().with_schema("auth");
        options.conventions = options
            .conventions
            .with_casing(crate::convention::CasingRule::LowerSnake);
        let repo = Repository::new(Arc::new(options));

        assert_eq!(repo.table_name("UserRole"), "auth.user_role");
        assert_eq!(repo.column_name("CreatedAt"), "created_at");
        assert_eq!(repo.routine_name("UserGet"), "auth.user_get");
    }

    #[tokio::test]
    async fn test_no_connection_source() {
        let repo = Repository::new(Arc::new(RepositoryOptions::default()));
        let err = repo.execute_sql("delete from t").await.unwrap_err();
        assert!(matches!(err, DbError::NoConnectionSource));
    }
}
