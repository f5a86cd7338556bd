//! Routine statement resolution.
//!
//! Stored procedures are dispatched by name and the execution capability supplies the
//! call syntax. Stored functions are issued as `select * from name(args)` text commands,
//! with one placeholder per bound parameter in set order.

use crate::convention::{ConventionSet, qualify};
use crate::models::{CommandKind, ParameterSet, PreExecutionContext, RoutineKind};

#[derive(Debug, Clone, Copy)]
pub struct RoutineResolver<'a> {
    schema: Option<&'a str>,
    conventions: &'a ConventionSet,
}

impl<'a> RoutineResolver<'a> {
    pub fn new(schema: Option<&'a str>, conventions: &'a ConventionSet) -> Self {
        Self {
            schema,
            conventions,
        }
    }

    /// Convention-formatted, schema-qualified routine name.
    pub fn resolve_name(&self, simple_name: &str) -> String {
        qualify(self.schema, &self.conventions.routine.format(simple_name))
    }

    pub fn effective_kind(&self, kind: Option<RoutineKind>) -> RoutineKind {
        self.conventions.routine.effective_kind(kind)
    }

    pub fn resolve_command_kind(&self, kind: Option<RoutineKind>) -> CommandKind {
        match self.effective_kind(kind) {
            RoutineKind::StoredFunction => CommandKind::Text,
            RoutineKind::StoredProcedure => CommandKind::StoredProcedure,
        }
    }

    pub fn resolve_command_text(
        &self,
        simple_name: &str,
        parameters: &ParameterSet,
        kind: Option<RoutineKind>,
    ) -> String {
        let name = self.resolve_name(simple_name);
        self.command_text_for(name, parameters, self.effective_kind(kind))
    }

    /// Command kind and text for a pending call, taking the resolved name and
    /// parameters as they stand after the pre-execution hook.
    pub fn command_for(&self, ctx: &PreExecutionContext) -> (CommandKind, String) {
        let kind = self.effective_kind(ctx.routine_kind);
        let text = self.command_text_for(ctx.resolved_name.clone(), &ctx.parameters, kind);
        (self.resolve_command_kind(Some(kind)), text)
    }

    fn command_text_for(&self, name: String, parameters: &ParameterSet, kind: RoutineKind) -> String {
        match kind {
            RoutineKind::StoredProcedure => name,
            RoutineKind::StoredFunction => {
                let placeholder = &self.conventions.parameter.placeholder;
                let args = parameters
                    .iter()
                    .map(|p| placeholder.format(&name, kind, &p.name, p.value.as_ref()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("select * from {}({})", name, args)
            }
        }
    }
}
