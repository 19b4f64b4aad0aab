//! Per-invocation record threaded through a command's middleware chain.

use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::action::Action;
use crate::cache::CachePolicy;
use crate::command::Invocation;
use crate::error::Failure;
use crate::request::{Params, Request, Response, expand_path};

/// Mutable state of one command invocation.
///
/// Exactly one context exists per in-flight invocation. It is owned by the
/// running chain and handed back to the caller when the chain completes.
#[derive(Debug)]
pub struct Context {
	command_id: String,
	request_key: String,
	loader_id: String,
	/// Invocation parameters.
	pub params: Params,
	/// Outbound request. Middleware may replace it before calling `next`.
	pub request: Request,
	/// Whether the command needs an elevated credential.
	pub elevated: bool,
	/// Cache policy; `None` disables the cache for this invocation.
	pub cache: Option<CachePolicy>,
	/// Set by the transport step, or by middleware that short-circuits.
	pub response: Option<Response>,
	/// Side effects applied in order once the chain unwinds.
	pub side_effects: Vec<Action>,
	/// Merged into the loader row on success.
	pub meta: Map<String, Value>,
	/// Loader message on success.
	pub message: Option<String>,
	pub(crate) cache_hit: bool,
	pub(crate) attempts: u32,
	pub(crate) cancel: CancellationToken,
	pub(crate) deadline: Option<Instant>,
}

impl Context {
	/// Builds the context for `invocation`. A path expansion failure is
	/// returned alongside so the caller can record it without running the chain.
	pub(crate) fn build(invocation: &Invocation, base: &Url, default_timeout: Option<std::time::Duration>) -> (Self, Option<Failure>) {
		let command = invocation.command();
		let (url, failure) = match expand_path(base, command.path(), invocation.params()) {
			Ok(url) => (url, None),
			Err(failure) => (command.path().to_string(), Some(failure)),
		};
		let request_key = invocation.request_key();
		let ctx = Self {
			command_id: command.id().to_string(),
			loader_id: invocation.loader_id().map_or_else(|| request_key.clone(), str::to_string),
			request_key,
			params: invocation.params().clone(),
			request: Request::new(command.method(), url),
			elevated: false,
			cache: None,
			response: None,
			side_effects: Vec::new(),
			meta: Map::new(),
			message: None,
			cache_hit: false,
			attempts: 0,
			cancel: invocation.cancel_token().cloned().unwrap_or_default(),
			deadline: invocation.timeout_override().or(default_timeout).map(|timeout| Instant::now() + timeout),
		};
		(ctx, failure)
	}

	pub fn command_id(&self) -> &str {
		&self.command_id
	}

	/// Identity of this parameterized invocation.
	pub fn request_key(&self) -> &str {
		&self.request_key
	}

	/// Loader row this invocation reports to.
	pub fn loader_id(&self) -> &str {
		&self.loader_id
	}

	/// Response data when the invocation succeeded.
	pub fn data(&self) -> Option<&Value> {
		self.response.as_ref().and_then(|r| r.as_ref().ok())
	}

	pub fn failure(&self) -> Option<&Failure> {
		self.response.as_ref().and_then(|r| r.as_ref().err())
	}

	pub fn is_ok(&self) -> bool {
		matches!(self.response, Some(Ok(_)))
	}

	/// Whether the response was served from the cache.
	pub fn cache_hit(&self) -> bool {
		self.cache_hit
	}

	/// Number of times the transport step sent a request.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Appends a side effect.
	pub fn effect(&mut self, action: Action) {
		self.side_effects.push(action);
	}

	/// String parameter `name`, if present.
	pub fn param_str(&self, name: &str) -> Option<&str> {
		self.params.get(name).and_then(Value::as_str)
	}

	/// Consumes the context into its response.
	pub fn into_response(self) -> Response {
		self.response.unwrap_or_else(|| Err(Failure::transport("command produced no response")))
	}
}
