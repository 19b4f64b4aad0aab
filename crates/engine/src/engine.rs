//! The engine: owner of every shared component and entry point for commands.

use std::sync::Arc;

use marshal_worker::IntervalRegistry;
use url::Url;

use crate::action::{Action, ActionBus, ActionSink, NullSink, SinkError};
use crate::cache::{CacheStep, ResponseCache};
use crate::chain::{Middleware, Next};
use crate::command::Invocation;
use crate::config::{ConfigError, EngineConfig};
use crate::context::Context;
use crate::credential::{Authorize, CredentialStore, MemoryCredentials};
use crate::elevation::{ElevationGate, ElevationManager, Elevator, StepUpProvider};
use crate::error::Failure;
use crate::journal::{ActionJournal, EffectError, MemoryJournal, PendingBatch, drive_batch};
use crate::loader::{LoaderStore, LoaderUpdate};
use crate::operation::OperationProjection;
use crate::transport::{Transport, TransportStep};

/// Shared handle to one engine instance. Clones share all state.
///
/// Nothing here is global: tests build an isolated engine per case.
#[derive(Clone)]
pub struct Engine {
	inner: Arc<Inner>,
}

struct Inner {
	config: EngineConfig,
	base_url: Url,
	transport: Arc<dyn Transport>,
	sink: Arc<dyn ActionSink>,
	journal: Arc<dyn ActionJournal>,
	credentials: Arc<dyn CredentialStore>,
	elevation: Option<ElevationManager>,
	loaders: LoaderStore,
	cache: ResponseCache,
	bus: ActionBus,
	polls: IntervalRegistry,
	operations: OperationProjection,
	builtins: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("base_url", &self.inner.base_url.as_str())
			.field("polls", &self.inner.polls)
			.finish_non_exhaustive()
	}
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
	config: EngineConfig,
	transport: Arc<dyn Transport>,
	sink: Arc<dyn ActionSink>,
	journal: Arc<dyn ActionJournal>,
	credentials: Arc<dyn CredentialStore>,
	step_up: Option<(Arc<dyn StepUpProvider>, Arc<dyn Elevator>)>,
	loaders: LoaderStore,
	bus: ActionBus,
}

impl EngineBuilder {
	#[must_use]
	pub fn sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
		self.sink = sink;
		self
	}

	#[must_use]
	pub fn journal(mut self, journal: Arc<dyn ActionJournal>) -> Self {
		self.journal = journal;
		self
	}

	#[must_use]
	pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
		self.credentials = credentials;
		self
	}

	/// Enables the elevation gate.
	#[must_use]
	pub fn elevation(mut self, provider: Arc<dyn StepUpProvider>, elevator: Arc<dyn Elevator>) -> Self {
		self.step_up = Some((provider, elevator));
		self
	}

	/// Shares an existing loader store, e.g. one the UI already observes.
	#[must_use]
	pub fn loaders(mut self, loaders: LoaderStore) -> Self {
		self.loaders = loaders;
		self
	}

	#[must_use]
	pub fn bus(mut self, bus: ActionBus) -> Self {
		self.bus = bus;
		self
	}

	pub fn build(self) -> Result<Engine, ConfigError> {
		let base_url = self.config.base_url()?;
		let cache = ResponseCache::new(self.config.cache.clone());
		let builtins: Vec<Arc<dyn Middleware>> = vec![Arc::new(CacheStep), Arc::new(ElevationGate), Arc::new(Authorize), Arc::new(TransportStep)];
		Ok(Engine {
			inner: Arc::new(Inner {
				config: self.config,
				base_url,
				transport: self.transport,
				sink: self.sink,
				journal: self.journal,
				credentials: self.credentials,
				elevation: self.step_up.map(|(provider, elevator)| ElevationManager::new(provider, elevator)),
				loaders: self.loaders,
				cache,
				bus: self.bus,
				polls: IntervalRegistry::new(),
				operations: OperationProjection::default(),
				builtins,
			}),
		})
	}
}

impl Engine {
	pub fn builder(config: EngineConfig, transport: Arc<dyn Transport>) -> EngineBuilder {
		EngineBuilder {
			config,
			transport,
			sink: Arc::new(NullSink),
			journal: Arc::new(MemoryJournal::new()),
			credentials: Arc::new(MemoryCredentials::new()),
			step_up: None,
			loaders: LoaderStore::new(),
			bus: ActionBus::default(),
		}
	}

	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	pub fn loaders(&self) -> &LoaderStore {
		&self.inner.loaders
	}

	pub fn cache(&self) -> &ResponseCache {
		&self.inner.cache
	}

	pub fn bus(&self) -> &ActionBus {
		&self.inner.bus
	}

	pub fn credentials(&self) -> &dyn CredentialStore {
		&*self.inner.credentials
	}

	pub fn elevation(&self) -> Option<&ElevationManager> {
		self.inner.elevation.as_ref()
	}

	pub fn operations(&self) -> &OperationProjection {
		&self.inner.operations
	}

	pub(crate) fn transport(&self) -> &dyn Transport {
		&*self.inner.transport
	}

	pub(crate) fn poll_registry(&self) -> &IntervalRegistry {
		&self.inner.polls
	}

	/// Runs one invocation to completion and returns its context.
	///
	/// The loader row is moved to `loading` before the chain runs and to
	/// `success` or `error` after side effects were applied. Failures never
	/// escape: they are in `ctx.response` and on the loader.
	pub async fn run(&self, invocation: Invocation) -> Context {
		let (mut ctx, failure) = Context::build(&invocation, &self.inner.base_url, self.inner.config.request_timeout());
		self.inner.loaders.start(ctx.loader_id());
		tracing::debug!(command = ctx.command_id(), key = ctx.request_key(), loader = ctx.loader_id(), "engine.command.start");

		match failure {
			Some(failure) => ctx.response = Some(Err(failure)),
			None => {
				let chain: Vec<Arc<dyn Middleware>> = invocation.command().middleware().iter().chain(self.inner.builtins.iter()).cloned().collect();
				Next::new(self, &chain).run(&mut ctx).await;
			}
		}
		if ctx.response.is_none() {
			ctx.response = Some(Err(Failure::transport("command produced no response")));
		}

		if !ctx.side_effects.is_empty()
			&& let Err(err) = self.apply(&ctx.side_effects)
		{
			tracing::warn!(command = ctx.command_id(), error = %err, "engine.effects.failed");
		}

		match &ctx.response {
			Some(Ok(_)) => {
				self.inner.loaders.success(
					ctx.loader_id(),
					LoaderUpdate {
						message: ctx.message.clone(),
						meta: ctx.meta.clone(),
					},
				);
				tracing::debug!(command = ctx.command_id(), cache_hit = ctx.cache_hit(), "engine.command.finish");
			}
			Some(Err(failure)) => {
				self.inner.loaders.error(ctx.loader_id(), LoaderUpdate::message(failure.to_string()).with_meta(failure.meta()));
				tracing::debug!(command = ctx.command_id(), error = %failure, "engine.command.failed");
			}
			None => {}
		}
		ctx
	}

	/// Applies and publishes one action outside any command.
	pub fn dispatch(&self, action: Action) -> Result<(), EffectError> {
		self.apply(std::slice::from_ref(&action))
	}

	/// Applies the unapplied tail of every batch left in the journal.
	///
	/// Returns the number of batches completed.
	pub fn resume_pending(&self) -> Result<usize, EffectError> {
		let pending = self.inner.journal.pending()?;
		let count = pending.len();
		for batch in &pending {
			tracing::info!(batch = batch.id, remaining = batch.remaining().len(), "engine.effects.resume");
			self.drive(batch)?;
		}
		Ok(count)
	}

	fn apply(&self, actions: &[Action]) -> Result<(), EffectError> {
		let id = self.inner.journal.begin(actions)?;
		let batch = PendingBatch {
			id,
			actions: actions.to_vec(),
			applied: 0,
		};
		self.drive(&batch)
	}

	fn drive(&self, batch: &PendingBatch) -> Result<(), EffectError> {
		drive_batch(&*self.inner.journal, batch, |action| self.apply_one(action))
	}

	fn apply_one(&self, action: &Action) -> Result<(), SinkError> {
		match action {
			Action::ResetLoader { id } => self.inner.loaders.reset(id),
			Action::Upsert { .. } | Action::Remove { .. } => self.inner.sink.apply(action)?,
			Action::Navigate { .. } | Action::Signal { .. } => {}
		}
		tracing::trace!(kind = action.kind(), "engine.effects.apply");
		self.inner.bus.publish(action.clone());
		Ok(())
	}
}
