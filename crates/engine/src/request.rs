//! Request and response descriptors at the transport boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{ApiError, Failure};

/// Parameters of one command invocation.
pub type Params = Map<String, Value>;

/// Decoded outcome of a command: response data or a failure.
pub type Response = Result<Value, Failure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	Get,
	Post,
	Put,
	Patch,
	Delete,
}

impl Method {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Patch => "PATCH",
			Self::Delete => "DELETE",
		}
	}
}

impl std::fmt::Display for Method {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outbound request descriptor. Middleware may rewrite any field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
	pub method: Method,
	pub url: String,
	pub headers: BTreeMap<String, String>,
	pub body: Option<Vec<u8>>,
}

impl Request {
	pub fn new(method: Method, url: impl Into<String>) -> Self {
		Self {
			method,
			url: url.into(),
			headers: BTreeMap::new(),
			body: None,
		}
	}

	/// Sets a JSON body and the matching content type.
	pub fn set_json(&mut self, body: &Value) {
		self.body = Some(body.to_string().into_bytes());
		self.headers.insert("content-type".into(), "application/json".into());
	}

	/// Parses the body as JSON. `None` when there is no body or it is not JSON.
	pub fn json(&self) -> Option<Value> {
		self.body.as_deref().and_then(|bytes| serde_json::from_slice(bytes).ok())
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
		self.headers.insert(name.to_ascii_lowercase(), value.into());
	}

	/// Path component of the URL, or the whole URL if it does not parse.
	pub fn path(&self) -> String {
		Url::parse(&self.url).map(|url| url.path().to_string()).unwrap_or_else(|_| self.url.clone())
	}
}

/// Undecoded reply from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
	pub status: u16,
	pub body: Vec<u8>,
}

impl RawResponse {
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, body: body.into() }
	}

	pub fn json(status: u16, body: &Value) -> Self {
		Self::new(status, body.to_string())
	}

	pub const fn is_success(&self) -> bool {
		self.status >= 200 && self.status < 300
	}

	/// Decodes into data or a failure.
	///
	/// Error statuses with a well-formed `{code, error, message}` body become
	/// [`Failure::Domain`]; anything else becomes [`Failure::Transport`].
	pub fn decode(self) -> Response {
		if self.is_success() {
			if self.body.iter().all(u8::is_ascii_whitespace) {
				return Ok(Value::Null);
			}
			return serde_json::from_slice(&self.body).map_err(|err| Failure::Transport {
				status: Some(self.status),
				message: format!("invalid response body: {err}"),
			});
		}

		match serde_json::from_slice::<ApiError>(&self.body) {
			Ok(api) => Err(Failure::Domain(api)),
			Err(_) => Err(Failure::Transport {
				status: Some(self.status),
				message: format!("request failed with status {}", self.status),
			}),
		}
	}
}

/// Expands `:name` segments of `template` from `params` onto `base`.
///
/// Segments are percent-encoded. A missing parameter is a validation failure,
/// so the request is never sent.
pub(crate) fn expand_path(base: &Url, template: &str, params: &Params) -> Result<String, Failure> {
	let mut url = base.clone();
	{
		let Ok(mut segments) = url.path_segments_mut() else {
			return Err(Failure::validation("invalid_url", format!("cannot append path to {base}")));
		};
		segments.pop_if_empty();
		for segment in template.split('/').filter(|s| !s.is_empty()) {
			match segment.strip_prefix(':') {
				Some(name) => {
					let value = match params.get(name) {
						Some(Value::String(s)) => s.clone(),
						Some(Value::Null) | None => {
							return Err(Failure::validation("missing_parameter", format!("missing path parameter '{name}'")));
						}
						Some(other) => other.to_string(),
					};
					segments.push(&value);
				}
				None => {
					segments.push(segment);
				}
			}
		}
	}
	Ok(url.to_string())
}
