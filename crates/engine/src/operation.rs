//! Backend operations and the wait-until-terminal primitive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, params};
use crate::engine::Engine;
use crate::error::Failure;
use crate::middleware::UpsertEntity;
use crate::transport::until;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Queued,
	Running,
	Succeeded,
	Failed,
	/// Any status this client does not know. Never terminal.
	#[serde(other)]
	Unknown,
}

impl OperationStatus {
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed)
	}
}

/// Client-side mirror of a backend-tracked long-running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
	pub id: String,
	#[serde(default)]
	pub resource_type: String,
	#[serde(default)]
	pub resource_id: String,
	/// deploy, provision, scale, restore, configure, ...
	#[serde(rename = "type", default)]
	pub kind: String,
	pub status: OperationStatus,
	#[serde(default)]
	pub cancelled: bool,
	#[serde(default)]
	pub aborted: bool,
	#[serde(default)]
	pub created_at: String,
	#[serde(default)]
	pub updated_at: String,
}

impl Operation {
	pub const fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Parses an operation record from response data.
	pub fn from_value(data: &Value) -> Result<Self, Failure> {
		let mut data = data.clone();
		// Backends send numeric ids.
		if let Some(id) = data.get_mut("id").filter(|id| id.is_number()) {
			*id = Value::String(id.to_string());
		}
		if let Some(id) = data.get_mut("resource_id").filter(|id| id.is_number()) {
			*id = Value::String(id.to_string());
		}
		serde_json::from_value(data).map_err(|err| Failure::transport(format!("invalid operation record: {err}")))
	}
}

/// Read-only projection of operations fetched so far.
///
/// A terminal record is never overwritten.
#[derive(Debug, Clone, Default)]
pub struct OperationProjection {
	records: Arc<RwLock<HashMap<String, Operation>>>,
}

impl OperationProjection {
	pub fn get(&self, id: &str) -> Option<Operation> {
		self.records.read().get(id).cloned()
	}

	/// Records `operation` unless the stored copy is already terminal.
	///
	/// Returns the copy now stored.
	pub fn record(&self, operation: Operation) -> Operation {
		let mut records = self.records.write();
		match records.get(&operation.id) {
			Some(stored) if stored.is_terminal() => stored.clone(),
			_ => {
				records.insert(operation.id.clone(), operation.clone());
				operation
			}
		}
	}
}

/// Where [`wait_for_operation`] reads operations from.
#[async_trait]
pub trait OperationSource: Send + Sync {
	/// Fetches the current record from the backend.
	async fn fetch(&self, id: &str) -> Result<Operation, Failure>;
	/// Reads the local projection without fetching.
	fn cached(&self, id: &str) -> Option<Operation>;
}

/// `GET /operations/:id`, upserting into the `operations` entity.
pub fn fetch_operation() -> Command {
	Command::get("fetch-operation", "/operations/:id").with(UpsertEntity("operations"))
}

/// Operation source backed by an engine and [`fetch_operation`].
#[derive(Debug, Clone)]
pub struct CommandOperationSource {
	engine: Engine,
	command: Arc<Command>,
}

impl CommandOperationSource {
	pub fn new(engine: Engine) -> Self {
		Self {
			engine,
			command: Arc::new(fetch_operation()),
		}
	}
}

#[async_trait]
impl OperationSource for CommandOperationSource {
	async fn fetch(&self, id: &str) -> Result<Operation, Failure> {
		let invocation = self.command.invoke(params(serde_json::json!({ "id": id })));
		let response = self.engine.run(invocation).await.into_response()?;
		let operation = Operation::from_value(&response)?;
		Ok(self.engine.operations().record(operation))
	}

	fn cached(&self, id: &str) -> Option<Operation> {
		self.engine.operations().get(id)
	}
}

/// Bounds on [`wait_for_operation`]. The default waits indefinitely.
#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
	pub timeout: Option<Duration>,
	pub cancel: Option<CancellationToken>,
}

impl WaitOptions {
	pub fn timeout(timeout: Duration) -> Self {
		Self {
			timeout: Some(timeout),
			cancel: None,
		}
	}

	#[must_use]
	pub fn cancel_on(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
	#[error("operation {id} did not finish before the deadline")]
	DeadlineExceeded { id: String },
	#[error("wait for operation {id} was cancelled")]
	Cancelled { id: String },
}

/// Waits until operation `id` reaches `succeeded` or `failed`.
///
/// Each round reads the operation (from the projection only when
/// `skip_fetch` is set) and returns it if terminal, otherwise sleeps
/// `interval`. Fetch failures are logged and count as non-terminal rounds.
pub async fn wait_for_operation(source: &dyn OperationSource, id: &str, interval: Duration, skip_fetch: bool, options: WaitOptions) -> Result<Operation, WaitError> {
	let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
	let cancel = options.cancel.unwrap_or_default();
	let mut round = 0u64;

	loop {
		round += 1;
		let read = async {
			if skip_fetch {
				return source.cached(id);
			}
			match source.fetch(id).await {
				Ok(operation) => Some(operation),
				Err(failure) => {
					tracing::warn!(operation = id, round, error = %failure, "engine.operation.fetch_failed");
					None
				}
			}
		};
		let current = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(WaitError::Cancelled { id: id.to_string() }),
			_ = until(deadline) => return Err(WaitError::DeadlineExceeded { id: id.to_string() }),
			current = read => current,
		};

		match current {
			Some(operation) if operation.is_terminal() => {
				tracing::debug!(operation = id, status = ?operation.status, rounds = round, "engine.operation.terminal");
				return Ok(operation);
			}
			current => {
				tracing::trace!(operation = id, status = ?current.map(|op| op.status), round, "engine.operation.pending");
			}
		}

		tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(WaitError::Cancelled { id: id.to_string() }),
			_ = until(deadline) => return Err(WaitError::DeadlineExceeded { id: id.to_string() }),
			_ = tokio::time::sleep(interval) => {}
		}
	}
}

impl Engine {
	/// [`wait_for_operation`] against this engine's backend.
	pub async fn wait_for_operation(&self, id: &str, interval: Duration, skip_fetch: bool, options: WaitOptions) -> Result<Operation, WaitError> {
		let source = CommandOperationSource::new(self.clone());
		wait_for_operation(&source, id, interval, skip_fetch, options).await
	}
}
