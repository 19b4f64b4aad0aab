/// Classification attached to spawned worker tasks for tracing.
///
/// Only supervised poll loops run as background tasks today; commands and
/// workflows run on the caller's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TaskClass {
	/// Long-lived loops re-invoking a command on a fixed period.
	Poll,
}

impl TaskClass {
	/// Stable label used in tracing fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Poll => "poll",
		}
	}
}

impl std::fmt::Display for TaskClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
