//! Service scaling and status polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marshal_engine::middleware::{Body, UpsertEntity, Validate};
use marshal_engine::{
	Action, ApiError, Command, EffectError, Engine, Failure, OperationStatus, Params, PollStart, WaitError, WaitOptions, Workflow, WorkflowScope,
	WorkflowTask,
};
use serde_json::{Map, Value, json};

use crate::support::{object, text};

/// `GET /services/:id`
pub fn fetch_service() -> Command {
	Command::get("fetch-service", "/services/:id").with(UpsertEntity("services"))
}

/// `POST /services/:service_id/operations` with type `scale`.
pub fn create_scale_operation() -> Command {
	Command::post("create-scale-operation", "/services/:service_id/operations")
		.with(Validate(|p: &Params| match p.get("container_count").and_then(Value::as_u64) {
			Some(count) if count >= 1 => Ok(()),
			_ => Err(Failure::validation("invalid_container_count", "container count must be at least 1")),
		}))
		.with(Body(|p: &Params| {
			json!({
				"type": "scale",
				"container_count": p.get("container_count"),
				"container_size": p.get("container_size"),
			})
		}))
		.with(UpsertEntity("operations"))
}

/// Waits for the operation created by an earlier step.
///
/// Output is the terminal operation record. A `failed` operation fails the
/// step with `operation_failed`.
pub struct WaitForOperation {
	step: &'static str,
	interval: Option<Duration>,
	options: WaitOptions,
}

impl WaitForOperation {
	/// Waits for the operation whose id is in the output of `step`.
	pub fn after(step: &'static str) -> Self {
		Self {
			step,
			interval: None,
			options: WaitOptions::default(),
		}
	}

	/// Overrides the configured poll interval.
	#[must_use]
	pub fn every(mut self, interval: Duration) -> Self {
		self.interval = Some(interval);
		self
	}

	#[must_use]
	pub fn within(mut self, timeout: Duration) -> Self {
		self.options.timeout = Some(timeout);
		self
	}
}

#[async_trait]
impl WorkflowTask for WaitForOperation {
	async fn run(&self, scope: &WorkflowScope<'_>) -> Result<Value, Failure> {
		let engine = scope.engine();
		let Some(id) = scope.output(self.step).and_then(text("id")) else {
			return Err(Failure::validation("missing_operation", format!("step '{}' produced no operation id", self.step)));
		};
		let interval = self.interval.unwrap_or_else(|| engine.config().operation_poll_interval());

		let operation = engine.wait_for_operation(&id, interval, false, self.options.clone()).await.map_err(|err| match err {
			WaitError::DeadlineExceeded { .. } => Failure::Timeout,
			WaitError::Cancelled { .. } => Failure::Cancelled,
		})?;

		if operation.status == OperationStatus::Failed {
			return Err(Failure::Domain(
				ApiError::new(422, "operation_failed", format!("{} operation {} failed", operation.kind, operation.id))
					.with_context("operation_id", json!(operation.id))
					.with_context("aborted", json!(operation.aborted))
					.with_context("cancelled", json!(operation.cancelled)),
			));
		}
		serde_json::to_value(&operation).map_err(|err| Failure::transport(err.to_string()))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleService {
	pub service_id: String,
	pub container_count: u32,
	/// Container memory in MB; `None` keeps the current size.
	pub container_size: Option<u32>,
}

/// Create a scale operation and wait for it.
///
/// Success meta is `{operation_id, status}`.
pub fn scale_service(request: ScaleService, wait: WaitForOperation) -> Workflow {
	let scale = Arc::new(create_scale_operation());
	Workflow::new(format!("scale-service-{}", request.service_id))
		.command(
			"operation",
			scale.invoke(object(json!({
				"service_id": request.service_id,
				"container_count": request.container_count,
				"container_size": request.container_size,
			}))),
		)
		.task("wait", wait)
		.finish(|scope: &WorkflowScope<'_>| {
			let mut meta = Map::new();
			meta.insert("operation_id".into(), json!(scope.output("wait").and_then(text("id"))));
			meta.insert("status".into(), scope.output("wait").and_then(|op| op.get("status")).cloned().unwrap_or(Value::Null));
			Ok(meta)
		})
}

/// Action kind that stops [`poll_service`] for `service_id`.
pub fn poll_cancel_kind(service_id: &str) -> String {
	format!("services/{service_id}/poll/cancel")
}

/// Re-fetches the service every `interval` until [`stop_polling_service`].
///
/// Each service gets its own poll; polling the same service twice is a no-op.
pub fn poll_service(engine: &Engine, service_id: &str, interval: Duration) -> PollStart {
	let command = Command::get(format!("poll-service-{service_id}"), "/services/:id").with(UpsertEntity("services"));
	let invocation = Arc::new(command).invoke(object(json!({ "id": service_id })));
	engine.poll(invocation, interval, poll_cancel_kind(service_id))
}

pub fn stop_polling_service(engine: &Engine, service_id: &str) -> Result<(), EffectError> {
	engine.dispatch(Action::signal(poll_cancel_kind(service_id)))
}
