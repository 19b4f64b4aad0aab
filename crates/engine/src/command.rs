//! Command definitions and their parameterized invocations.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::CachePolicy;
use crate::chain::Middleware;
use crate::middleware::{Cached, RequireElevation};
use crate::request::{Method, Params};

/// A named unit of remote work: a request template plus ordered middleware.
#[derive(Clone)]
pub struct Command {
	id: String,
	method: Method,
	path: String,
	middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Command {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Command")
			.field("id", &self.id)
			.field("method", &self.method)
			.field("path", &self.path)
			.field("middleware", &self.middleware.len())
			.finish()
	}
}

impl Command {
	/// Creates a command. `path` may contain `:name` segments filled from params.
	pub fn new(id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			method,
			path: path.into(),
			middleware: Vec::new(),
		}
	}

	pub fn get(id: impl Into<String>, path: impl Into<String>) -> Self {
		Self::new(id, Method::Get, path)
	}

	pub fn post(id: impl Into<String>, path: impl Into<String>) -> Self {
		Self::new(id, Method::Post, path)
	}

	pub fn put(id: impl Into<String>, path: impl Into<String>) -> Self {
		Self::new(id, Method::Put, path)
	}

	pub fn delete(id: impl Into<String>, path: impl Into<String>) -> Self {
		Self::new(id, Method::Delete, path)
	}

	/// Appends a middleware. Middleware run in the order they were added.
	#[must_use]
	pub fn with(mut self, middleware: impl Middleware) -> Self {
		self.middleware.push(Arc::new(middleware));
		self
	}

	/// Declares that the command requires an elevated credential.
	#[must_use]
	pub fn elevated(self) -> Self {
		self.with(RequireElevation)
	}

	/// Enables response caching under `policy`.
	#[must_use]
	pub fn cached(self, policy: CachePolicy) -> Self {
		self.with(Cached(policy))
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub const fn method(&self) -> Method {
		self.method
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub(crate) fn middleware(&self) -> &[Arc<dyn Middleware>] {
		&self.middleware
	}

	/// Starts an invocation with `params`.
	pub fn invoke(self: &Arc<Self>, params: Params) -> Invocation {
		Invocation::new(Arc::clone(self), params)
	}
}

/// One parameterized call of a [`Command`].
#[derive(Debug, Clone)]
pub struct Invocation {
	command: Arc<Command>,
	params: Params,
	loader_id: Option<String>,
	timeout: Option<Duration>,
	cancel: Option<CancellationToken>,
}

impl Invocation {
	pub fn new(command: Arc<Command>, params: Params) -> Self {
		Self {
			command,
			params,
			loader_id: None,
			timeout: None,
			cancel: None,
		}
	}

	/// Reports to `id` instead of the request key.
	#[must_use]
	pub fn loader(mut self, id: impl Into<String>) -> Self {
		self.loader_id = Some(id.into());
		self
	}

	/// Overrides the configured request deadline.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Cancels the in-flight request when `token` fires.
	#[must_use]
	pub fn cancel_on(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}

	pub fn command(&self) -> &Arc<Command> {
		&self.command
	}

	pub fn params(&self) -> &Params {
		&self.params
	}

	pub fn loader_id(&self) -> Option<&str> {
		self.loader_id.as_deref()
	}

	pub(crate) fn timeout_override(&self) -> Option<Duration> {
		self.timeout
	}

	pub(crate) fn cancel_token(&self) -> Option<&CancellationToken> {
		self.cancel.as_ref()
	}

	/// Identity of this invocation: the command id, plus its parameters in
	/// canonical key order when there are any.
	pub fn request_key(&self) -> String {
		if self.params.is_empty() {
			return self.command.id.clone();
		}
		format!("{}{}", self.command.id, Value::Object(self.params.clone()))
	}
}

/// Builds a [`Params`] object from a JSON object literal.
///
/// Non-object values produce empty params.
pub fn params(value: Value) -> Params {
	match value {
		Value::Object(map) => map,
		_ => Params::new(),
	}
}
