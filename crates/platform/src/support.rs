use async_trait::async_trait;
use marshal_engine::{ApiError, Failure, Params, WorkflowScope, WorkflowTask};
use serde_json::Value;

pub(crate) fn object(value: Value) -> Params {
	marshal_engine::params(value)
}

/// Reads `field` as a string, rendering numeric ids.
pub(crate) fn text(field: &'static str) -> impl Fn(&Value) -> Option<String> {
	move |value| match value.get(field)? {
		Value::String(s) => Some(s.clone()),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

/// Reads the `id` from the output of an earlier step.
///
/// Yields `null` when that step was skipped; a step that ran but returned no
/// id fails the workflow with `missing_id`.
pub(crate) struct RequireId(pub &'static str);

#[async_trait]
impl WorkflowTask for RequireId {
	async fn run(&self, scope: &WorkflowScope<'_>) -> Result<Value, Failure> {
		let Some(output) = scope.output(self.0) else {
			return Ok(Value::Null);
		};
		match text("id")(output) {
			Some(id) => Ok(Value::String(id)),
			None => Err(Failure::Validation(
				ApiError::validation("missing_id", format!("step '{}' returned no id", self.0)).with_context("step", Value::String(self.0.into())),
			)),
		}
	}
}
