//! In-process fakes for exercising engines in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::action::{Action, ActionSink, SinkError};
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineBuilder};
use crate::error::TransportError;
use crate::request::{Method, RawResponse, Request};
use crate::transport::Transport;

/// Base URL used by [`config`].
pub const BASE_URL: &str = "https://api.test";

/// Default configuration pointed at [`BASE_URL`].
pub fn config() -> EngineConfig {
	EngineConfig {
		base_url: BASE_URL.into(),
		..EngineConfig::default()
	}
}

/// Builder for an engine backed by `transport` and [`config`].
pub fn engine(transport: &Arc<ScriptedTransport>) -> EngineBuilder {
	Engine::builder(config(), Arc::clone(transport) as Arc<dyn Transport>)
}

type Reply = Result<RawResponse, TransportError>;

/// Transport replaying scripted replies per `(method, path)`.
///
/// Each route pops its replies in order; the last one repeats. Unscripted
/// routes answer 404 without a structured body. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
	routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
	sent: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Queues `reply` for `method path`.
	pub fn route(&self, method: Method, path: &str, reply: Reply) -> &Self {
		self.routes.lock().entry((method, path.to_string())).or_default().push_back(reply);
		self
	}

	/// Queues a JSON reply with `status`.
	pub fn reply(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
		self.route(method, path, Ok(RawResponse::json(status, &body)))
	}

	/// Queues a structured error reply.
	pub fn fail(&self, method: Method, path: &str, code: u16, error: &str, message: &str) -> &Self {
		self.reply(
			method,
			path,
			code,
			serde_json::json!({ "code": code, "error": error, "message": message, "exception_context": {} }),
		)
	}

	/// Every request sent so far, in order.
	pub fn requests(&self) -> Vec<Request> {
		self.sent.lock().clone()
	}

	/// Requests sent to `method path`.
	pub fn requests_to(&self, method: Method, path: &str) -> Vec<Request> {
		self.sent.lock().iter().filter(|r| r.method == method && r.path() == path).cloned().collect()
	}

	pub fn count(&self, method: Method, path: &str) -> usize {
		self.requests_to(method, path).len()
	}
}

#[async_trait]
impl Transport for ScriptedTransport {
	async fn send(&self, request: &Request) -> Result<RawResponse, TransportError> {
		self.sent.lock().push(request.clone());
		let mut routes = self.routes.lock();
		let Some(queue) = routes.get_mut(&(request.method, request.path())) else {
			return Ok(RawResponse::new(404, "not found"));
		};
		let reply = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
		reply.unwrap_or_else(|| Ok(RawResponse::new(404, "not found")))
	}
}

/// Sink recording applied actions, optionally failing once at one position.
#[derive(Debug, Default)]
pub struct RecordingSink {
	applied: Mutex<Vec<Action>>,
	fail_at: Mutex<Option<usize>>,
}

impl RecordingSink {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// The `index`-th action applied from now on fails once.
	pub fn fail_once_at(&self, index: usize) {
		let applied = self.applied.lock().len();
		*self.fail_at.lock() = Some(applied + index);
	}

	pub fn applied(&self) -> Vec<Action> {
		self.applied.lock().clone()
	}
}

impl ActionSink for RecordingSink {
	fn apply(&self, action: &Action) -> Result<(), SinkError> {
		let mut applied = self.applied.lock();
		let mut fail_at = self.fail_at.lock();
		if *fail_at == Some(applied.len()) {
			*fail_at = None;
			return Err(SinkError {
				kind: action.kind().to_string(),
				reason: "sink unavailable".into(),
			});
		}
		applied.push(action.clone());
		Ok(())
	}
}
