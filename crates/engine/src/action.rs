//! Side-effect actions and the broadcast bus they are published on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

/// A side effect collected during a command and applied once its chain unwinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
	/// Insert or replace one entity in the resource store.
	Upsert { entity: String, id: String, data: Value },
	/// Remove one entity from the resource store.
	Remove { entity: String, id: String },
	/// Reset a loader row back to idle.
	ResetLoader { id: String },
	/// Navigation hint for the UI.
	Navigate { to: String },
	/// Named signal with no store effect, e.g. a poll cancellation sentinel.
	Signal {
		name: String,
		#[serde(default)]
		payload: Value,
	},
}

impl Action {
	pub fn upsert(entity: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
		Self::Upsert {
			entity: entity.into(),
			id: id.into(),
			data,
		}
	}

	pub fn signal(name: impl Into<String>) -> Self {
		Self::Signal {
			name: name.into(),
			payload: Value::Null,
		}
	}

	/// Action type string. Signals report their own name.
	pub fn kind(&self) -> &str {
		match self {
			Self::Upsert { .. } => "upsert",
			Self::Remove { .. } => "remove",
			Self::ResetLoader { .. } => "reset_loader",
			Self::Navigate { .. } => "navigate",
			Self::Signal { name, .. } => name.as_str(),
		}
	}
}

/// Error returned by an [`ActionSink`] that could not apply an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to apply {kind} action: {reason}")]
pub struct SinkError {
	pub kind: String,
	pub reason: String,
}

/// The resource store side effects are applied to.
pub trait ActionSink: Send + Sync + 'static {
	fn apply(&self, action: &Action) -> Result<(), SinkError>;
}

/// Sink that accepts and discards every action.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActionSink for NullSink {
	fn apply(&self, _action: &Action) -> Result<(), SinkError> {
		Ok(())
	}
}

/// Process-wide broadcast of applied and dispatched actions.
///
/// The broadcast channel is bounded and slow subscribers may lag. Waiters
/// that must not miss a kind use [`ActionBus::watch_kind`], which is latched
/// per kind and never drops a publish.
#[derive(Debug, Clone)]
pub struct ActionBus {
	tx: broadcast::Sender<Action>,
	kinds: Arc<Mutex<HashMap<String, watch::Sender<u64>>>>,
}

impl Default for ActionBus {
	fn default() -> Self {
		Self::new(256)
	}
}

impl ActionBus {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self {
			tx,
			kinds: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Action> {
		self.tx.subscribe()
	}

	/// Watches for the next publish of `kind` after this call.
	pub fn watch_kind(&self, kind: impl Into<String>) -> KindWatch {
		let kind = kind.into();
		let rx = self.kinds.lock().entry(kind.clone()).or_insert_with(|| watch::channel(0).0).subscribe();
		KindWatch { kind, rx }
	}

	pub fn publish(&self, action: Action) {
		{
			let mut kinds = self.kinds.lock();
			if let Some(latch) = kinds.get(action.kind()) {
				if latch.receiver_count() == 0 {
					kinds.remove(action.kind());
				} else {
					latch.send_modify(|seen| *seen = seen.wrapping_add(1));
				}
			}
		}
		let _ = self.tx.send(action);
	}
}

/// Pending wait for one action kind, created by [`ActionBus::watch_kind`].
#[derive(Debug)]
pub struct KindWatch {
	kind: String,
	rx: watch::Receiver<u64>,
}

impl KindWatch {
	pub fn kind(&self) -> &str {
		&self.kind
	}

	/// Resolves once `kind` was published after the watch was created.
	/// Never resolves if the bus is dropped first.
	pub async fn fired(mut self) {
		if self.rx.changed().await.is_err() {
			tracing::debug!(kind = %self.kind, "engine.bus.closed");
			std::future::pending::<()>().await;
		}
	}
}
