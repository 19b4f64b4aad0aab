//! Step-up re-authentication for commands that need an elevated credential.
//!
//! The [`ElevationGate`] chain step suspends a command in two situations:
//!
//! * the command declared itself elevated and the current credential is not;
//! * the backend rejected the request with one of the configured
//!   `elevation.required_tokens`.
//!
//! In both cases the [`ElevationManager`] asks the [`StepUpProvider`] for a
//! secret, exchanges it through the [`Elevator`], stores the new credential and
//! the original request is sent again unchanged. A failed step-up is reported
//! on the original command's loader.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{Middleware, Next};
use crate::context::Context;
use crate::credential::Credential;
use crate::engine::Engine;
use crate::error::{ApiError, Failure};

/// Secret supplied for a step-up attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepUp {
	Password { password: String },
	Otp { password: String, otp: String },
	/// WebAuthn ceremony result. `assertion` is forwarded without inspection.
	WebAuthn { password: String, assertion: Value },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepUpReason {
	/// First prompt for this step-up.
	Initial,
	/// The backend asked for a second factor, identified by `token`.
	SecondFactor { token: String },
}

/// What the provider is being asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepUpRequest {
	pub command_id: String,
	pub loader_id: String,
	pub reason: StepUpReason,
}

/// Supplies step-up secrets, typically by prompting the user.
#[async_trait]
pub trait StepUpProvider: Send + Sync + 'static {
	/// Returns `None` when the user declines.
	async fn challenge(&self, request: &StepUpRequest) -> Option<StepUp>;
}

/// Exchanges a step-up secret for an elevated credential.
#[async_trait]
pub trait Elevator: Send + Sync + 'static {
	async fn elevate(&self, engine: &Engine, step: &StepUp) -> Result<Credential, Failure>;
}

tokio::task_local! {
	/// Set while an [`Elevator`] runs, so its own commands bypass the gate.
	static STEPPING_UP: ();
}

fn stepping_up() -> bool {
	STEPPING_UP.try_with(|_| ()).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationState {
	NotElevated,
	Elevating,
	Elevated,
	ElevationFailed,
}

/// Runs step-ups and tracks their state per command id.
///
/// Step-ups are serialized. A waiter that acquires the gate after another
/// step-up finished re-checks the credential before prompting again.
pub struct ElevationManager {
	provider: Arc<dyn StepUpProvider>,
	elevator: Arc<dyn Elevator>,
	gate: tokio::sync::Mutex<()>,
	states: Mutex<HashMap<String, ElevationState>>,
}

impl std::fmt::Debug for ElevationManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ElevationManager").field("states", &*self.states.lock()).finish_non_exhaustive()
	}
}

impl ElevationManager {
	pub fn new(provider: Arc<dyn StepUpProvider>, elevator: Arc<dyn Elevator>) -> Self {
		Self {
			provider,
			elevator,
			gate: tokio::sync::Mutex::new(()),
			states: Mutex::new(HashMap::new()),
		}
	}

	/// Last known elevation state of `command_id`.
	pub fn state(&self, command_id: &str) -> ElevationState {
		self.states.lock().get(command_id).copied().unwrap_or(ElevationState::NotElevated)
	}

	fn set_state(&self, command_id: &str, state: ElevationState) {
		tracing::debug!(command = command_id, state = ?state, "engine.elevation.state");
		self.states.lock().insert(command_id.to_string(), state);
	}

	/// Ensures an elevated credential is stored.
	///
	/// `rejected` is the token the backend refused; a current credential
	/// with the same token is not trusted even if its scope says elevated.
	pub async fn ensure(&self, engine: &Engine, command_id: &str, loader_id: &str, rejected: Option<&str>) -> Result<(), Failure> {
		self.set_state(command_id, ElevationState::Elevating);
		let _serial = self.gate.lock().await;

		let usable = engine
			.credentials()
			.current()
			.is_some_and(|credential| credential.is_elevated() && rejected != Some(credential.token.as_str()));
		if usable {
			self.set_state(command_id, ElevationState::Elevated);
			return Ok(());
		}

		let second_factor = &engine.config().elevation.second_factor_tokens;
		let mut request = StepUpRequest {
			command_id: command_id.to_string(),
			loader_id: loader_id.to_string(),
			reason: StepUpReason::Initial,
		};
		loop {
			let Some(step) = self.provider.challenge(&request).await else {
				self.set_state(command_id, ElevationState::ElevationFailed);
				return Err(Failure::Elevation(ApiError::new(401, "elevation_cancelled", "elevation was cancelled")));
			};

			match STEPPING_UP.scope((), self.elevator.elevate(engine, &step)).await {
				Ok(credential) => {
					engine.credentials().store(credential);
					self.set_state(command_id, ElevationState::Elevated);
					return Ok(());
				}
				Err(failure) => {
					let token = failure.token().map(str::to_string);
					let retry = request.reason == StepUpReason::Initial && token.as_ref().is_some_and(|t| second_factor.contains(t));
					match token {
						Some(token) if retry => {
							tracing::debug!(command = command_id, token = %token, "engine.elevation.second_factor");
							request.reason = StepUpReason::SecondFactor { token };
						}
						_ => {
							tracing::warn!(command = command_id, error = %failure, "engine.elevation.failed");
							self.set_state(command_id, ElevationState::ElevationFailed);
							return Err(Failure::elevation(failure));
						}
					}
				}
			}
		}
	}
}

/// Built-in chain step enforcing elevation.
pub(crate) struct ElevationGate;

#[async_trait]
impl Middleware for ElevationGate {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		let engine = next.engine();
		if stepping_up() {
			next.run(ctx).await;
			return Ok(());
		}
		let needs_step_up = ctx.elevated && !engine.credentials().current().is_some_and(|c| c.is_elevated());
		let Some(manager) = engine.elevation() else {
			if needs_step_up {
				tracing::warn!(command = ctx.command_id(), "engine.elevation.unavailable");
				return Err(Failure::Elevation(ApiError::new(
					401,
					"elevation_unavailable",
					"command requires an elevated credential and no step-up is configured",
				)));
			}
			next.run(ctx).await;
			return Ok(());
		};

		if needs_step_up {
			manager.ensure(engine, ctx.command_id(), ctx.loader_id(), None).await?;
		}

		let original = ctx.request.clone();
		let sent_with = engine.credentials().current().map(|c| c.token);
		next.run(ctx).await;

		let required = &engine.config().elevation.required_tokens;
		let demanded = ctx.failure().and_then(Failure::token).is_some_and(|token| required.iter().any(|r| r == token));
		if !demanded {
			return Ok(());
		}

		tracing::debug!(command = ctx.command_id(), "engine.elevation.demanded");
		manager.ensure(engine, ctx.command_id(), ctx.loader_id(), sent_with.as_deref()).await?;
		ctx.request = original;
		ctx.response = None;
		next.run(ctx).await;
		Ok(())
	}
}
