use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::TaskClass;
use crate::token::{GenerationClock, LoopToken};

/// Snapshot for one live interval loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRecord {
	pub name: String,
	pub class: TaskClass,
	pub generation: u64,
	pub ticks: u64,
}

struct Slot {
	record: IntervalRecord,
	token: LoopToken,
}

/// Process-wide table of live interval loops keyed by name.
///
/// A name can be claimed by at most one loop at a time. Claims are released by
/// the loop itself when it exits, scoped to the generation that claimed it.
#[derive(Clone, Default)]
pub struct IntervalRegistry {
	inner: Arc<Mutex<HashMap<String, Slot>>>,
	clock: GenerationClock,
}

impl std::fmt::Debug for IntervalRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IntervalRegistry").field("live", &self.inner.lock().len()).finish()
	}
}

impl IntervalRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Claims `name` for a new loop.
	///
	/// Returns `Err(generation)` of the current holder when the name is taken.
	pub(crate) fn claim(&self, name: &str, class: TaskClass) -> Result<LoopToken, u64> {
		let mut guard = self.inner.lock();
		if let Some(slot) = guard.get(name) {
			return Err(slot.record.generation);
		}
		let token = self.clock.start();
		guard.insert(
			name.to_string(),
			Slot {
				record: IntervalRecord {
					name: name.to_string(),
					class,
					generation: token.generation(),
					ticks: 0,
				},
				token: token.clone(),
			},
		);
		Ok(token)
	}

	/// Releases `name` if it is still held by `generation`.
	pub(crate) fn release(&self, name: &str, generation: u64) {
		let mut guard = self.inner.lock();
		if guard.get(name).is_some_and(|slot| slot.record.generation == generation) {
			guard.remove(name);
		}
	}

	pub(crate) fn record_tick(&self, name: &str, generation: u64) {
		if let Some(slot) = self.inner.lock().get_mut(name)
			&& slot.record.generation == generation
		{
			slot.record.ticks = slot.record.ticks.wrapping_add(1);
		}
	}

	/// Requests cancellation of the loop registered under `name`.
	///
	/// Returns `false` when no loop holds the name.
	pub fn cancel(&self, name: &str) -> bool {
		match self.inner.lock().get(name) {
			Some(slot) => {
				slot.token.cancel();
				true
			}
			None => false,
		}
	}

	/// Returns whether a loop currently holds `name`.
	pub fn is_active(&self, name: &str) -> bool {
		self.inner.lock().contains_key(name)
	}

	/// Returns the record for `name`.
	pub fn get(&self, name: &str) -> Option<IntervalRecord> {
		self.inner.lock().get(name).map(|slot| slot.record.clone())
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<IntervalRecord> {
		let mut records: Vec<_> = self.inner.lock().values().map(|slot| slot.record.clone()).collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}
