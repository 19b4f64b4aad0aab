use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::TaskClass;
use crate::registry::IntervalRegistry;
use crate::token::LoopToken;

/// One unit of repeated work driven by [`spawn_interval`].
#[async_trait]
pub trait IntervalTask: Send + 'static {
	/// Runs one iteration.
	///
	/// `cancel` fires if the loop is cancelled while the iteration is in flight.
	/// Iterations are never raced against the stop signal; the loop only checks
	/// for stop between iterations.
	async fn tick(&mut self, iteration: u64, cancel: CancellationToken);
}

/// Configuration for one supervised interval loop.
#[derive(Debug, Clone)]
pub struct IntervalSpec {
	pub(crate) name: String,
	pub(crate) class: TaskClass,
	pub(crate) period: Duration,
}

impl IntervalSpec {
	/// Creates a spec. `name` is the dedup key in the [`IntervalRegistry`].
	pub fn new(name: impl Into<String>, class: TaskClass, period: Duration) -> Self {
		Self {
			name: name.into(),
			class,
			period,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub const fn period(&self) -> Duration {
		self.period
	}
}

/// Why an interval loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalExit {
	/// The handle or registry requested cancellation.
	Cancelled,
	/// The stop signal future resolved.
	Stopped,
}

/// Handle to a running interval loop.
///
/// Dropping the handle does not stop the loop; use [`IntervalHandle::cancel`],
/// [`IntervalRegistry::cancel`], or the stop signal.
#[derive(Debug)]
pub struct IntervalHandle {
	name: String,
	token: LoopToken,
	join: JoinHandle<IntervalExit>,
}

impl IntervalHandle {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub const fn generation(&self) -> u64 {
		self.token.generation()
	}

	/// Requests cancellation. Takes effect between iterations.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.join.is_finished()
	}

	/// Waits for the loop to exit. Returns `None` if the loop task failed.
	pub async fn join(self) -> Option<IntervalExit> {
		self.join.await.ok()
	}
}

/// Result of [`spawn_interval`].
#[derive(Debug)]
#[must_use]
pub enum IntervalStart {
	Started(IntervalHandle),
	/// Another loop already holds the name; nothing was spawned.
	AlreadyRunning { generation: u64 },
}

impl IntervalStart {
	pub fn is_started(&self) -> bool {
		matches!(self, Self::Started(_))
	}

	pub fn into_handle(self) -> Option<IntervalHandle> {
		match self {
			Self::Started(handle) => Some(handle),
			Self::AlreadyRunning { .. } => None,
		}
	}
}

/// Spawns a loop running `task` immediately and then once per period until
/// cancelled or until `stop` resolves.
///
/// At most one loop per `spec.name` is live in `registry`; a second call while
/// one is live spawns nothing and returns [`IntervalStart::AlreadyRunning`].
pub fn spawn_interval<T, S>(registry: &IntervalRegistry, spec: IntervalSpec, mut task: T, stop: S) -> IntervalStart
where
	T: IntervalTask,
	S: Future<Output = ()> + Send + 'static,
{
	let token = match registry.claim(&spec.name, spec.class) {
		Ok(token) => token,
		Err(generation) => {
			tracing::debug!(interval = %spec.name, generation, "worker.interval.already_running");
			return IntervalStart::AlreadyRunning { generation };
		}
	};

	let loop_token = token.clone();
	let loop_registry = registry.clone();
	let name = spec.name.clone();
	let period = spec.period;
	let class = spec.class;

	let join = crate::spawn(class, async move {
		tokio::pin!(stop);
		let generation = loop_token.generation();
		let mut iteration = 0u64;
		tracing::debug!(interval = %name, class = %class, generation, period = ?period, "worker.interval.start");

		let exit = loop {
			tokio::select! {
				biased;
				_ = loop_token.cancelled() => break IntervalExit::Cancelled,
				_ = &mut stop => break IntervalExit::Stopped,
				_ = std::future::ready(()) => {}
			}

			task.tick(iteration, loop_token.for_iteration()).await;
			loop_registry.record_tick(&name, generation);
			tracing::trace!(interval = %name, generation, iteration, "worker.interval.tick");
			iteration = iteration.wrapping_add(1);

			tokio::select! {
				biased;
				_ = loop_token.cancelled() => break IntervalExit::Cancelled,
				_ = &mut stop => break IntervalExit::Stopped,
				_ = tokio::time::sleep(period) => {}
			}
		};

		loop_registry.release(&name, generation);
		tracing::debug!(interval = %name, generation, ticks = iteration, exit = ?exit, "worker.interval.exit");
		exit
	});

	IntervalStart::Started(IntervalHandle {
		name: spec.name,
		token,
		join,
	})
}
