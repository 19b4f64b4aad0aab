//! Observable lifecycle state for commands and workflows.
//!
//! A loader row is keyed by id (a command's request key, a workflow id, or a
//! shared well-known id) and moves through
//! `idle → loading → {success, error} → loading → …`. Only
//! [`LoaderStore::start`], [`LoaderStore::success`], [`LoaderStore::error`]
//! and [`LoaderStore::reset`] write rows.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderStatus {
	#[default]
	Idle,
	Loading,
	Success,
	Error,
}

/// One stored loader row.
#[derive(Debug, Clone, PartialEq, Default)]
struct Loader {
	status: LoaderStatus,
	message: String,
	/// Unix millis of the last `start`, 0 if never.
	last_run: i64,
	/// Unix millis of the last `success`, 0 if never.
	last_success: i64,
	meta: Map<String, Value>,
}

/// Payload for [`LoaderStore::success`] and [`LoaderStore::error`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderUpdate {
	pub message: Option<String>,
	pub meta: Map<String, Value>,
}

impl LoaderUpdate {
	pub fn message(message: impl Into<String>) -> Self {
		Self {
			message: Some(message.into()),
			meta: Map::new(),
		}
	}

	pub fn meta(meta: Map<String, Value>) -> Self {
		Self { message: None, meta }
	}

	#[must_use]
	pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
		self.meta = meta;
		self
	}
}

/// Read-only projection of a loader row, as consumed by observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderView {
	pub id: String,
	pub status: LoaderStatus,
	pub message: String,
	pub meta: Map<String, Value>,
	pub last_run: i64,
	pub last_success: i64,
	pub is_idle: bool,
	pub is_loading: bool,
	pub is_success: bool,
	pub is_error: bool,
	/// Busy or idle without any prior success: the first-load spinner case.
	pub is_initial_loading: bool,
}

impl LoaderView {
	fn new(id: &str, loader: &Loader) -> Self {
		let is_idle = loader.status == LoaderStatus::Idle;
		let is_loading = loader.status == LoaderStatus::Loading;
		Self {
			id: id.to_string(),
			status: loader.status,
			message: loader.message.clone(),
			meta: loader.meta.clone(),
			last_run: loader.last_run,
			last_success: loader.last_success,
			is_idle,
			is_loading,
			is_success: loader.status == LoaderStatus::Success,
			is_error: loader.status == LoaderStatus::Error,
			is_initial_loading: (is_idle || is_loading) && loader.last_success == 0,
		}
	}

	/// Machine error token from `meta.error`, if any.
	pub fn error_token(&self) -> Option<&str> {
		self.meta.get("error").and_then(Value::as_str)
	}
}

/// Change notification published after every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderEvent {
	pub id: String,
	pub status: LoaderStatus,
}

/// Store of loader rows, shared by every component of one engine.
///
/// Clones share state. Tests create isolated stores per case.
#[derive(Debug, Clone)]
pub struct LoaderStore {
	rows: Arc<RwLock<HashMap<String, Loader>>>,
	events: broadcast::Sender<LoaderEvent>,
}

impl Default for LoaderStore {
	fn default() -> Self {
		Self::new()
	}
}

fn now_millis() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

impl LoaderStore {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(256);
		Self {
			rows: Arc::new(RwLock::new(HashMap::new())),
			events,
		}
	}

	/// Marks `id` as loading and stamps `last_run`.
	pub fn start(&self, id: &str) {
		self.write(id, |row| {
			row.status = LoaderStatus::Loading;
			row.last_run = now_millis().max(row.last_run);
		});
	}

	/// Marks `id` successful, stamps `last_success` and replaces `meta`.
	pub fn success(&self, id: &str, update: LoaderUpdate) {
		self.write(id, |row| {
			let now = now_millis();
			if row.status == LoaderStatus::Idle {
				row.last_run = now.max(row.last_run);
			}
			row.status = LoaderStatus::Success;
			row.last_success = now.max(row.last_success);
			row.message = update.message.unwrap_or_default();
			row.meta = update.meta;
		});
	}

	/// Marks `id` failed and replaces `meta`. Never touches `last_success`.
	pub fn error(&self, id: &str, update: LoaderUpdate) {
		self.write(id, |row| {
			if row.status == LoaderStatus::Idle {
				row.last_run = now_millis().max(row.last_run);
			}
			row.status = LoaderStatus::Error;
			row.message = update.message.unwrap_or_default();
			row.meta = update.meta;
		});
	}

	/// Returns `id` to idle, clearing message and meta. `last_success` is kept.
	pub fn reset(&self, id: &str) {
		self.write(id, |row| {
			row.status = LoaderStatus::Idle;
			row.message.clear();
			row.meta.clear();
		});
	}

	/// Current view of `id`. Unknown ids read as a fresh idle loader and are not created.
	pub fn get(&self, id: &str) -> LoaderView {
		let rows = self.rows.read();
		match rows.get(id) {
			Some(loader) => LoaderView::new(id, loader),
			None => LoaderView::new(id, &Loader::default()),
		}
	}

	/// Ids of every row written so far.
	pub fn ids(&self) -> Vec<String> {
		let mut ids: Vec<_> = self.rows.read().keys().cloned().collect();
		ids.sort();
		ids
	}

	pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
		self.events.subscribe()
	}

	fn write(&self, id: &str, f: impl FnOnce(&mut Loader)) {
		let status = {
			let mut rows = self.rows.write();
			let row = rows.entry(id.to_string()).or_default();
			f(row);
			row.status
		};
		tracing::trace!(loader = id, status = ?status, "engine.loader.write");
		let _ = self.events.send(LoaderEvent { id: id.to_string(), status });
	}
}
