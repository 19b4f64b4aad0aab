//! Per-request-key memoization of successful responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::chain::{Middleware, Next};
use crate::config::CacheTimers;
use crate::context::Context;
use crate::error::Failure;

/// How long a cached success stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
	/// The configured short window, tens of seconds.
	Short,
	/// The configured long window, minutes.
	Long,
	Ttl(Duration),
}

impl CachePolicy {
	pub fn window(self, timers: &CacheTimers) -> Duration {
		match self {
			Self::Short => Duration::from_millis(timers.short_ms),
			Self::Long => Duration::from_millis(timers.long_ms),
			Self::Ttl(ttl) => ttl,
		}
	}
}

#[derive(Debug, Clone)]
struct Entry {
	data: Value,
	fetched_at: Instant,
}

/// Successful responses keyed by request key. Failures are never stored.
#[derive(Debug, Clone)]
pub struct ResponseCache {
	entries: Arc<Mutex<HashMap<String, Entry>>>,
	timers: CacheTimers,
}

impl ResponseCache {
	pub fn new(timers: CacheTimers) -> Self {
		Self {
			entries: Arc::new(Mutex::new(HashMap::new())),
			timers,
		}
	}

	/// Stored data for `key` if it was fetched within the policy's window.
	pub fn fresh(&self, key: &str, policy: CachePolicy) -> Option<Value> {
		let window = policy.window(&self.timers);
		let entries = self.entries.lock();
		let entry = entries.get(key)?;
		(entry.fetched_at.elapsed() < window).then(|| entry.data.clone())
	}

	pub fn store(&self, key: &str, data: Value) {
		self.entries.lock().insert(
			key.to_string(),
			Entry {
				data,
				fetched_at: Instant::now(),
			},
		);
	}

	pub fn invalidate(&self, key: &str) -> bool {
		self.entries.lock().remove(key).is_some()
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}
}

/// Built-in chain step: serve fresh entries without calling `next`, store
/// successes after it.
pub(crate) struct CacheStep;

#[async_trait]
impl Middleware for CacheStep {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		let Some(policy) = ctx.cache else {
			next.run(ctx).await;
			return Ok(());
		};

		let cache = next.engine().cache();
		if let Some(data) = cache.fresh(ctx.request_key(), policy) {
			tracing::debug!(command = ctx.command_id(), key = ctx.request_key(), "engine.cache.hit");
			ctx.cache_hit = true;
			ctx.response = Some(Ok(data));
			return Ok(());
		}

		next.run(ctx).await;
		if let Some(Ok(data)) = &ctx.response {
			cache.store(ctx.request_key(), data.clone());
		}
		Ok(())
	}
}
