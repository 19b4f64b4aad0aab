//! Worker primitives shared by the marshal engine.
//!
//! * [`TaskClass`]: classification attached to every spawned task for tracing.
//! * [`spawn`]: runtime entry for engine tasks.
//! * [`IntervalRegistry`] and [`spawn_interval`]: fixed-period supervised loops
//!   with at most one live loop per name and explicit cancellation.

mod class;
mod interval;
mod registry;
mod spawn;
mod token;

pub use class::TaskClass;
pub use interval::{IntervalExit, IntervalHandle, IntervalSpec, IntervalStart, IntervalTask, spawn_interval};
pub use registry::{IntervalRecord, IntervalRegistry};
pub use spawn::spawn;
