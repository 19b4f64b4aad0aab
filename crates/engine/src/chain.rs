//! Chain-of-responsibility over a command's middleware.
//!
//! Each middleware receives the context and a [`Next`] for the remainder of
//! the chain. It may rewrite `ctx.request`, call [`Next::run`] (possibly more
//! than once), inspect `ctx.response` afterwards, and append side effects.
//! Returning without calling `next` short-circuits the chain.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::engine::Engine;
use crate::error::Failure;

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
	/// Handles one invocation.
	///
	/// Returning `Err` records the failure as the response; middleware earlier
	/// in the chain observe it exactly like a transport failure.
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure>;
}

/// The remainder of a middleware chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
	engine: &'a Engine,
	chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
	pub(crate) fn new(engine: &'a Engine, chain: &'a [Arc<dyn Middleware>]) -> Self {
		Self { engine, chain }
	}

	/// The engine running this chain.
	pub fn engine(&self) -> &'a Engine {
		self.engine
	}

	/// Runs the remainder of the chain against `ctx`.
	///
	/// An exhausted chain leaves the response untouched.
	pub async fn run(self, ctx: &mut Context) {
		let Some((head, rest)) = self.chain.split_first() else {
			return;
		};
		let next = Next {
			engine: self.engine,
			chain: rest,
		};
		if let Err(failure) = head.handle(ctx, next).await {
			ctx.response = Some(Err(failure));
		}
	}
}
