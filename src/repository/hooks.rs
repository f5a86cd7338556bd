//! Customization seams around each call.

use crate::error::DbError;
use crate::models::{ExecutionOutcome, PostExecutionContext, PreExecutionContext};
use std::sync::Arc;

/// Inspect or rewrite a pending call before dispatch.
pub type PreExecutionHook = Arc<dyn Fn(&mut PreExecutionContext) + Send + Sync>;

/// Produce the final outcome of a completed call.
pub type PostExecutionHook = Arc<dyn Fn(PostExecutionContext) -> ExecutionOutcome + Send + Sync>;

/// Translates execution failures into application errors.
///
/// Returning `None` re-raises the original error unchanged.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, error: &DbError) -> Option<DbError>;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&DbError) -> Option<DbError> + Send + Sync,
{
    fn handle(&self, error: &DbError) -> Option<DbError> {
        self(error)
    }
}

/// Hooks and handler attached to a repository.
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_execution: Option<PreExecutionHook>,
    pub post_execution: Option<PostExecutionHook>,
    pub exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl Hooks {
    pub(crate) fn before(&self, ctx: &mut PreExecutionContext) {
        if let Some(hook) = &self.pre_execution {
            hook(ctx);
        }
    }

    /// Default: the outcome passes through.
    pub(crate) fn after(&self, ctx: PostExecutionContext) -> ExecutionOutcome {
        match &self.post_execution {
            Some(hook) => hook(ctx),
            None => ctx.result,
        }
    }

    pub(crate) fn translate(&self, error: DbError) -> DbError {
        let Some(handler) = &self.exception_handler else {
            return error;
        };
        match handler.handle(&error) {
            Some(replacement) => {
                tracing::debug!(original = %error, replacement = %replacement, "Exception translated");
                replacement
            }
            None => error,
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_execution", &self.pre_execution.is_some())
            .field("post_execution", &self.post_execution.is_some())
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterSet;

    fn pre() -> PreExecutionContext {
        PreExecutionContext {
            simple_name: "x".to_string(),
            resolved_name: "x".to_string(),
            routine_kind: None,
            parameters: ParameterSet::new(),
        }
    }

    #[test]
    fn test_default_hooks_pass_through() {
        let hooks = Hooks::default();
        let mut ctx = pre();
        hooks.before(&mut ctx);
        assert_eq!(ctx, pre());

        let out = hooks.after(PostExecutionContext::new(ctx, ExecutionOutcome::RowsAffected(3)));
        assert_eq!(out, ExecutionOutcome::RowsAffected(3));
        assert!(matches!(hooks.translate(DbError::NoRows), DbError::NoRows));
    }

    #[test]
    fn test_closure_handler() {
        let hooks = Hooks {
            exception_handler: Some(Arc::new(|e: &DbError| {
                e.is_cardinality()
                    .then(|| DbError::invalid_input("not found"))
            })),
            ..Default::default()
        };
        assert!(matches!(
            hooks.translate(DbError::NoRows),
            DbError::InvalidInput { .. }
        ));
        assert!(matches!(
            hooks.translate(DbError::internal("boom")),
            DbError::Internal { .. }
        ));
    }
}
