//! Transport boundary and the terminal chain step that drives it.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::chain::{Middleware, Next};
use crate::context::Context;
use crate::error::{Failure, TransportError};
use crate::request::{RawResponse, Request};

/// Sends one request and returns the undecoded reply.
///
/// Error statuses are replies, not errors: only failures to obtain a reply at
/// all are reported as [`TransportError`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	async fn send(&self, request: &Request) -> Result<RawResponse, TransportError>;
}

/// Resolves at `deadline`, or never.
pub(crate) async fn until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending::<()>().await,
	}
}

/// Terminal chain step. Never calls `next`.
pub(crate) struct TransportStep;

#[async_trait]
impl Middleware for TransportStep {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		let transport = next.engine().transport();
		ctx.attempts += 1;
		tracing::debug!(
			command = ctx.command_id(),
			method = %ctx.request.method,
			url = %ctx.request.url,
			attempt = ctx.attempts,
			"engine.transport.send"
		);

		let cancel = ctx.cancel.clone();
		let deadline = ctx.deadline;
		let outcome = tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(Failure::Cancelled),
			_ = until(deadline) => Err(Failure::Timeout),
			reply = transport.send(&ctx.request) => match reply {
				Ok(raw) => raw.decode(),
				Err(err) => Err(Failure::from(err)),
			},
		};

		if let Err(failure) = &outcome {
			tracing::debug!(command = ctx.command_id(), error = %failure, "engine.transport.failed");
		}
		ctx.response = Some(outcome);
		Ok(())
	}
}
