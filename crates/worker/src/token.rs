use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Hands out loop generations, starting at 1.
#[derive(Debug, Default, Clone)]
pub(crate) struct GenerationClock {
	last: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Starts a new loop generation with a fresh cancellation root.
	pub(crate) fn start(&self) -> LoopToken {
		LoopToken {
			generation: self.last.fetch_add(1, Ordering::AcqRel).wrapping_add(1),
			cancel: CancellationToken::new(),
		}
	}
}

/// Cancellation for one interval loop, tagged with the generation that owns
/// its registry slot.
///
/// A loop that exits late only releases the slot if its generation still
/// matches, so it never evicts a restarted loop under the same name.
#[derive(Debug, Clone)]
pub(crate) struct LoopToken {
	generation: u64,
	cancel: CancellationToken,
}

impl LoopToken {
	pub(crate) const fn generation(&self) -> u64 {
		self.generation
	}

	pub(crate) fn cancel(&self) {
		self.cancel.cancel();
	}

	pub(crate) async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Token for a single iteration; fires when the loop is cancelled.
	pub(crate) fn for_iteration(&self) -> CancellationToken {
		self.cancel.child_token()
	}
}
