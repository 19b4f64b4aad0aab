//! Cancellable fixed-interval re-invocation of a command.

use std::time::Duration;

use async_trait::async_trait;
use marshal_worker::{IntervalSpec, IntervalStart, IntervalTask, TaskClass, spawn_interval};
use tokio_util::sync::CancellationToken;

use crate::command::Invocation;
use crate::engine::Engine;

/// Outcome of [`Engine::poll`].
///
/// A second poll for a command id that already has a live supervisor spawns
/// nothing and reports [`IntervalStart::AlreadyRunning`].
pub type PollStart = IntervalStart;

struct PollTask {
	engine: Engine,
	invocation: Invocation,
}

#[async_trait]
impl IntervalTask for PollTask {
	async fn tick(&mut self, iteration: u64, cancel: CancellationToken) {
		let invocation = self.invocation.clone().cancel_on(cancel);
		let ctx = self.engine.run(invocation).await;
		tracing::trace!(command = ctx.command_id(), iteration, ok = ctx.is_ok(), "engine.poll.tick");
	}
}

impl Engine {
	/// Re-invokes `invocation` now and every `interval` after, until an
	/// action of kind `cancel_kind` is dispatched or the poll is cancelled.
	///
	/// Failed iterations update the loader and the loop keeps going. Polls are
	/// keyed by command id; polling again after the previous supervisor exited
	/// starts a fresh loop.
	pub fn poll(&self, invocation: Invocation, interval: Duration, cancel_kind: impl Into<String>) -> PollStart {
		let name = invocation.command().id().to_string();
		let stop = self.bus().watch_kind(cancel_kind).fired();
		let task = PollTask {
			engine: self.clone(),
			invocation,
		};
		spawn_interval(self.poll_registry(), IntervalSpec::new(name, TaskClass::Poll, interval), task, stop)
	}

	/// Cancels the live poll for `command_id`. Returns whether one was live.
	pub fn cancel_poll(&self, command_id: &str) -> bool {
		self.poll_registry().cancel(command_id)
	}

	pub fn is_polling(&self, command_id: &str) -> bool {
		self.poll_registry().is_active(command_id)
	}
}
