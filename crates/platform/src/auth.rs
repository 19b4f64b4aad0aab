//! Token creation, elevation and the login workflow.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use marshal_engine::middleware::ParamsBody;
use marshal_engine::{
	Command, Context, Credential, Elevator, Engine, Failure, LoaderUpdate, Middleware, Next, Params, Scope, StepUp, Workflow, WorkflowScope, WorkflowTask,
};
use serde_json::{Value, json};

/// Loader and workflow id of [`login`].
pub const LOGIN: &str = "login";
/// Workflow id of [`elevate`].
pub const ELEVATE_TOKEN: &str = "elevate-token";

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_TTL_SECS: i64 = 3_600;

/// Parses a token response into a credential.
pub fn credential_from(data: &Value) -> Result<Credential, Failure> {
	let token = data
		.get("access_token")
		.and_then(Value::as_str)
		.ok_or_else(|| Failure::transport("token response has no access_token"))?;
	let scope = match data.get("scope").and_then(Value::as_str) {
		Some("elevated") => Scope::Elevated,
		_ => Scope::Manage,
	};
	let expires_in = data.get("expires_in").and_then(Value::as_i64).unwrap_or(DEFAULT_TTL_SECS);
	Ok(Credential::new(token, scope, Utc::now() + chrono::Duration::seconds(expires_in)))
}

/// Stores the credential from a successful token response.
struct StoreCredential;

#[async_trait]
impl Middleware for StoreCredential {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		next.run(ctx).await;
		let Some(data) = ctx.data() else {
			return Ok(());
		};
		let credential = credential_from(data)?;
		tracing::debug!(command = ctx.command_id(), scope = ?credential.scope, "platform.auth.stored");
		next.engine().credentials().store(credential);
		Ok(())
	}
}

/// `POST /tokens`
pub fn create_token() -> Command {
	Command::post("create-token", "/tokens").with(ParamsBody).with(StoreCredential)
}

/// `POST /tokens/elevate`
pub fn elevate_token() -> Command {
	Command::post("elevate-token", "/tokens/elevate").with(ParamsBody).with(StoreCredential)
}

/// Request parameters for exchanging `step` for an elevated token.
///
/// A WebAuthn assertion is passed through as received.
pub fn elevation_params(step: &StepUp, ttl_secs: u64) -> Params {
	let mut params = Params::new();
	match step {
		StepUp::Password { password } => {
			params.insert("password".into(), json!(password));
		}
		StepUp::Otp { password, otp } => {
			params.insert("password".into(), json!(password));
			params.insert("otp_token".into(), json!(otp));
		}
		StepUp::WebAuthn { password, assertion } => {
			params.insert("password".into(), json!(password));
			params.insert("webauthn".into(), assertion.clone());
		}
	}
	params.insert("scope".into(), json!("elevated"));
	params.insert("expires_in".into(), json!(ttl_secs));
	params
}

/// [`Elevator`] backed by [`elevate_token`].
pub struct TokenElevator {
	command: Arc<Command>,
}

impl Default for TokenElevator {
	fn default() -> Self {
		Self {
			command: Arc::new(elevate_token()),
		}
	}
}

#[async_trait]
impl Elevator for TokenElevator {
	async fn elevate(&self, engine: &Engine, step: &StepUp) -> Result<Credential, Failure> {
		let ttl = engine.config().elevation.token_ttl_secs;
		let data = engine.run(self.command.invoke(elevation_params(step, ttl))).await.into_response()?;
		credential_from(&data)
	}
}

/// Standalone step-up, e.g. from a "confirm your password" form.
pub fn elevate(step: StepUp) -> Workflow {
	let command = Arc::new(elevate_token());
	Workflow::new(ELEVATE_TOKEN).command_with("elevate", move |scope: &WorkflowScope<'_>| {
		let ttl = scope.engine().config().elevation.token_ttl_secs;
		Some(command.invoke(elevation_params(&step, ttl)))
	})
}

#[derive(Debug, Clone, PartialEq)]
pub enum SecondFactor {
	None,
	Otp(String),
	/// Assertion produced by the browser's WebAuthn ceremony.
	WebAuthn(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
	pub username: String,
	pub password: String,
	pub second_factor: SecondFactor,
}

impl LoginRequest {
	pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
			second_factor: SecondFactor::None,
		}
	}

	#[must_use]
	pub fn with_second_factor(mut self, second_factor: SecondFactor) -> Self {
		self.second_factor = second_factor;
		self
	}

	fn params(&self) -> Params {
		let mut params = Params::new();
		params.insert("username".into(), json!(self.username));
		params.insert("password".into(), json!(self.password));
		params.insert("scope".into(), json!("manage"));
		match &self.second_factor {
			SecondFactor::None => {}
			SecondFactor::Otp(code) => {
				params.insert("otp_token".into(), json!(code));
			}
			SecondFactor::WebAuthn(assertion) => {
				params.insert("webauthn".into(), assertion.clone());
			}
		}
		params
	}
}

/// Marks the configured shared auth loader (`loaders.auth`) successful.
struct MarkAuthenticated;

#[async_trait]
impl WorkflowTask for MarkAuthenticated {
	async fn run(&self, scope: &WorkflowScope<'_>) -> Result<Value, Failure> {
		let engine = scope.engine();
		let auth = &engine.config().loaders.auth;
		engine.loaders().success(auth, LoaderUpdate::default());
		tracing::debug!(loader = %auth, "platform.auth.authenticated");
		Ok(Value::Null)
	}
}

/// Logs in, then runs `continuation`.
///
/// Steps: create a token, elevate it with the same password (password-only
/// logins; a second factor was already consumed by the token), run the
/// continuation, then mark the login loader and the shared auth loader
/// (`loaders.auth` in the engine config) successful.
pub fn login(request: LoginRequest, continuation: impl WorkflowTask) -> Workflow {
	let token = Arc::new(create_token()).invoke(request.params());
	let elevate = Arc::new(elevate_token());
	let password_only = request.second_factor == SecondFactor::None;
	let password = request.password;

	Workflow::new(LOGIN)
		.command("token", token)
		.command_with("elevate", move |scope: &WorkflowScope<'_>| {
			if !password_only {
				return None;
			}
			let ttl = scope.engine().config().elevation.token_ttl_secs;
			let step = StepUp::Password { password: password.clone() };
			Some(elevate.invoke(elevation_params(&step, ttl)))
		})
		.task("continue", continuation)
		.task("authenticated", MarkAuthenticated)
}
