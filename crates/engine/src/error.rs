//! Failure taxonomy for command invocations.
//!
//! Every failure is recovered at the command boundary: it becomes the
//! `Err` side of [`crate::Response`] and the owning loader's `error` state.
//! Nothing in this module is ever raised past a command.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Structured error body returned by the control-plane API.
///
/// Validation and elevation failures reuse this shape so observers never need
/// to branch on where a failure came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
	/// HTTP-like status code.
	pub code: u16,
	/// Machine-readable token, e.g. `otp_token_required`.
	pub error: String,
	/// Human-readable message.
	pub message: String,
	/// Free-form diagnostic payload from the backend.
	#[serde(default)]
	pub exception_context: Map<String, Value>,
}

impl ApiError {
	pub fn new(code: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code,
			error: error.into(),
			message: message.into(),
			exception_context: Map::new(),
		}
	}

	/// Client-side validation failure with the conventional 422 code.
	pub fn validation(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self::new(422, error, message)
	}

	#[must_use]
	pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
		self.exception_context.insert(key.into(), value);
		self
	}

	fn meta(&self) -> Map<String, Value> {
		let mut meta = Map::new();
		meta.insert("error".into(), Value::String(self.error.clone()));
		meta.insert("code".into(), json!(self.code));
		meta.insert("exception_context".into(), Value::Object(self.exception_context.clone()));
		meta
	}
}

/// Why a command did not produce data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Failure {
	/// Network failure or an error status without a structured body.
	#[error("{message}")]
	Transport {
		/// Response status when one was received.
		status: Option<u16>,
		message: String,
	},
	/// Well-formed error body from the backend.
	#[error("{}", .0.message)]
	Domain(ApiError),
	/// Rejected on the client before any request was sent.
	#[error("{}", .0.message)]
	Validation(ApiError),
	/// The step-up sub-workflow required by the command failed.
	#[error("{}", .0.message)]
	Elevation(ApiError),
	/// The invocation deadline passed before a response arrived.
	#[error("request timed out")]
	Timeout,
	/// The invocation's cancellation token fired.
	#[error("request cancelled")]
	Cancelled,
}

impl Failure {
	pub fn transport(message: impl Into<String>) -> Self {
		Self::Transport {
			status: None,
			message: message.into(),
		}
	}

	pub fn validation(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Validation(ApiError::validation(error, message))
	}

	/// Wraps the failure of a step-up attempt so it is reported on the
	/// original command.
	pub fn elevation(cause: Failure) -> Self {
		match cause {
			Self::Domain(api) | Self::Validation(api) | Self::Elevation(api) => Self::Elevation(api),
			other => Self::Elevation(ApiError::new(401, "elevation_failed", other.to_string())),
		}
	}

	/// The structured error body, if this failure carries one.
	pub fn api_error(&self) -> Option<&ApiError> {
		match self {
			Self::Domain(api) | Self::Validation(api) | Self::Elevation(api) => Some(api),
			_ => None,
		}
	}

	/// Machine token for this failure, if any.
	pub fn token(&self) -> Option<&str> {
		match self {
			Self::Timeout => Some("timeout"),
			Self::Cancelled => Some("cancelled"),
			_ => self.api_error().map(|api| api.error.as_str()),
		}
	}

	/// Loader meta describing this failure.
	///
	/// Structured failures yield `error`, `code` and `exception_context`.
	/// Transport failures yield an empty object.
	pub fn meta(&self) -> Map<String, Value> {
		match self {
			Self::Domain(api) | Self::Validation(api) | Self::Elevation(api) => api.meta(),
			Self::Transport { .. } => Map::new(),
			Self::Timeout | Self::Cancelled => {
				let mut meta = Map::new();
				if let Some(token) = self.token() {
					meta.insert("error".into(), Value::String(token.to_string()));
				}
				meta
			}
		}
	}

	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Transport { .. })
	}
}

/// Failure reported by a [`crate::Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
	/// The connection could not be established or broke mid-request.
	#[error("network error: {0}")]
	Network(String),
	/// The transport gave up waiting.
	#[error("transport timed out")]
	TimedOut,
}

impl From<TransportError> for Failure {
	fn from(err: TransportError) -> Self {
		match err {
			TransportError::TimedOut => Self::Timeout,
			other => Self::transport(other.to_string()),
		}
	}
}
