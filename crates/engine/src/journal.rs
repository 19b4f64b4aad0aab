//! Durable log of side-effect batches.
//!
//! A batch is recorded before its first action is applied and removed after
//! its last. The journal tracks how many actions of each batch have been
//! applied, so a process that dies mid-batch resumes at the first unapplied
//! action instead of re-running the command.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::action::{Action, SinkError};

pub type BatchId = u64;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
	#[error("I/O error on journal file {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },
	#[error("corrupt journal file {path}: {error}")]
	Corrupt { path: PathBuf, error: serde_json::Error },
	#[error("unknown batch {0}")]
	UnknownBatch(BatchId),
}

/// Why a batch could not be fully applied. The batch stays pending.
#[derive(Debug, thiserror::Error)]
pub enum EffectError {
	#[error(transparent)]
	Journal(#[from] JournalError),
	#[error("batch {batch} stopped at action {index}: {source}")]
	Sink {
		batch: BatchId,
		index: usize,
		#[source]
		source: SinkError,
	},
}

/// A batch that was started but not committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
	pub id: BatchId,
	pub actions: Vec<Action>,
	/// Number of leading actions already applied.
	pub applied: usize,
}

impl PendingBatch {
	pub fn remaining(&self) -> &[Action] {
		&self.actions[self.applied.min(self.actions.len())..]
	}
}

pub trait ActionJournal: Send + Sync + 'static {
	/// Records a new batch with nothing applied yet.
	fn begin(&self, actions: &[Action]) -> Result<BatchId, JournalError>;
	/// Records that the first `applied` actions of `batch` have been applied.
	fn advance(&self, batch: BatchId, applied: usize) -> Result<(), JournalError>;
	/// Drops a fully applied batch.
	fn commit(&self, batch: BatchId) -> Result<(), JournalError>;
	/// Uncommitted batches in begin order.
	fn pending(&self) -> Result<Vec<PendingBatch>, JournalError>;
}

/// In-process journal. Survives nothing, but keeps the batch protocol intact.
#[derive(Debug, Default)]
pub struct MemoryJournal {
	inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
	next: BatchId,
	batches: BTreeMap<BatchId, PendingBatch>,
}

impl MemoryJournal {
	pub fn new() -> Self {
		Self::default()
	}
}

impl ActionJournal for MemoryJournal {
	fn begin(&self, actions: &[Action]) -> Result<BatchId, JournalError> {
		let mut state = self.inner.lock();
		state.next += 1;
		let id = state.next;
		state.batches.insert(
			id,
			PendingBatch {
				id,
				actions: actions.to_vec(),
				applied: 0,
			},
		);
		Ok(id)
	}

	fn advance(&self, batch: BatchId, applied: usize) -> Result<(), JournalError> {
		let mut state = self.inner.lock();
		let entry = state.batches.get_mut(&batch).ok_or(JournalError::UnknownBatch(batch))?;
		entry.applied = applied;
		Ok(())
	}

	fn commit(&self, batch: BatchId) -> Result<(), JournalError> {
		self.inner.lock().batches.remove(&batch).map(|_| ()).ok_or(JournalError::UnknownBatch(batch))
	}

	fn pending(&self) -> Result<Vec<PendingBatch>, JournalError> {
		Ok(self.inner.lock().batches.values().cloned().collect())
	}
}

/// Journal persisted as one JSON file per batch under a directory.
///
/// Files are replaced through a temporary sibling and a rename, so a reader
/// never observes a half-written record.
#[derive(Debug)]
pub struct FileJournal {
	dir: PathBuf,
	next: Mutex<BatchId>,
}

const BATCH_PREFIX: &str = "batch-";
const BATCH_SUFFIX: &str = ".json";

impl FileJournal {
	/// Opens (creating if needed) a journal directory.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, JournalError> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir).map_err(|error| JournalError::Io { path: dir.clone(), error })?;
		let last = Self::batch_ids(&dir)?.into_iter().max().unwrap_or(0);
		Ok(Self { dir, next: Mutex::new(last) })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, batch: BatchId) -> PathBuf {
		self.dir.join(format!("{BATCH_PREFIX}{batch:020}{BATCH_SUFFIX}"))
	}

	fn batch_ids(dir: &Path) -> Result<Vec<BatchId>, JournalError> {
		let entries = std::fs::read_dir(dir).map_err(|error| JournalError::Io {
			path: dir.to_path_buf(),
			error,
		})?;
		let mut ids = Vec::new();
		for entry in entries {
			let entry = entry.map_err(|error| JournalError::Io {
				path: dir.to_path_buf(),
				error,
			})?;
			let name = entry.file_name();
			let Some(id) = name
				.to_str()
				.and_then(|n| n.strip_prefix(BATCH_PREFIX))
				.and_then(|n| n.strip_suffix(BATCH_SUFFIX))
				.and_then(|n| n.parse::<BatchId>().ok())
			else {
				continue;
			};
			ids.push(id);
		}
		ids.sort_unstable();
		Ok(ids)
	}

	fn write(&self, batch: &PendingBatch) -> Result<(), JournalError> {
		let path = self.path_for(batch.id);
		let tmp = path.with_extension("tmp");
		let bytes = serde_json::to_vec(batch).map_err(|error| JournalError::Corrupt { path: path.clone(), error })?;
		let io = |error| JournalError::Io { path: tmp.clone(), error };
		let mut file = std::fs::File::create(&tmp).map_err(io)?;
		file.write_all(&bytes).map_err(io)?;
		file.sync_all().map_err(io)?;
		drop(file);
		std::fs::rename(&tmp, &path).map_err(|error| JournalError::Io { path, error })
	}

	fn read(&self, batch: BatchId) -> Result<PendingBatch, JournalError> {
		let path = self.path_for(batch);
		let bytes = match std::fs::read(&path) {
			Ok(bytes) => bytes,
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Err(JournalError::UnknownBatch(batch)),
			Err(error) => return Err(JournalError::Io { path, error }),
		};
		serde_json::from_slice(&bytes).map_err(|error| JournalError::Corrupt { path, error })
	}
}

impl ActionJournal for FileJournal {
	fn begin(&self, actions: &[Action]) -> Result<BatchId, JournalError> {
		let id = {
			let mut next = self.next.lock();
			*next += 1;
			*next
		};
		self.write(&PendingBatch {
			id,
			actions: actions.to_vec(),
			applied: 0,
		})?;
		Ok(id)
	}

	fn advance(&self, batch: BatchId, applied: usize) -> Result<(), JournalError> {
		let mut record = self.read(batch)?;
		record.applied = applied;
		self.write(&record)
	}

	fn commit(&self, batch: BatchId) -> Result<(), JournalError> {
		let path = self.path_for(batch);
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => Err(JournalError::UnknownBatch(batch)),
			Err(error) => Err(JournalError::Io { path, error }),
		}
	}

	fn pending(&self) -> Result<Vec<PendingBatch>, JournalError> {
		Self::batch_ids(&self.dir)?.into_iter().map(|id| self.read(id)).collect()
	}
}

/// Applies `batch.remaining()` in order through `apply`, advancing the journal
/// after every action and committing at the end.
pub(crate) fn drive_batch(journal: &dyn ActionJournal, batch: &PendingBatch, mut apply: impl FnMut(&Action) -> Result<(), SinkError>) -> Result<(), EffectError> {
	for (index, action) in batch.actions.iter().enumerate().skip(batch.applied) {
		apply(action).map_err(|source| EffectError::Sink {
			batch: batch.id,
			index,
			source,
		})?;
		journal.advance(batch.id, index + 1)?;
	}
	journal.commit(batch.id)?;
	Ok(())
}
