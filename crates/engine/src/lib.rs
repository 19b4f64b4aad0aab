//! Command and operation orchestration for control-plane clients.
//!
//! A [`Command`] is a request template plus ordered [`Middleware`]. Running
//! an [`Invocation`] through an [`Engine`] threads one [`Context`] through the
//! command's middleware and the built-in steps:
//!
//! ```text
//! command middleware → cache → elevation gate → authorize → transport
//! ```
//!
//! Each invocation reports to a loader row in the [`LoaderStore`]. On top of
//! single commands the engine provides:
//!
//! - **Polling**: [`Engine::poll`] re-invokes a command on a fixed interval
//!   until a cancel action is dispatched.
//! - **Operation tracking**: [`wait_for_operation`] waits for a backend
//!   [`Operation`] to reach a terminal status.
//! - **Elevation**: commands that need an elevated credential are suspended
//!   while the [`ElevationManager`] runs a step-up.
//! - **Workflows**: [`Workflow`] sequences commands, nested workflows and
//!   tasks with fail-fast semantics.
//!
//! Side effects collected by middleware are recorded in an [`ActionJournal`]
//! before they are applied, so an interrupted batch resumes through
//! [`Engine::resume_pending`].

pub mod action;
pub mod cache;
pub mod chain;
pub mod command;
pub mod config;
pub mod context;
pub mod credential;
pub mod elevation;
mod engine;
pub mod error;
pub mod journal;
pub mod loader;
pub mod middleware;
pub mod operation;
mod poll;
pub mod request;
#[doc(hidden)]
pub mod test_helpers;
pub mod transport;
pub mod workflow;

pub use action::{Action, ActionBus, ActionSink, KindWatch, NullSink, SinkError};
pub use cache::{CachePolicy, ResponseCache};
pub use chain::{Middleware, Next};
pub use command::{Command, Invocation, params};
pub use config::{ConfigError, EngineConfig};
pub use context::Context;
pub use credential::{Credential, CredentialStore, MemoryCredentials, Scope};
pub use elevation::{ElevationManager, ElevationState, Elevator, StepUp, StepUpProvider, StepUpReason, StepUpRequest};
pub use engine::{Engine, EngineBuilder};
pub use error::{ApiError, Failure, TransportError};
pub use journal::{ActionJournal, EffectError, FileJournal, JournalError, MemoryJournal, PendingBatch};
pub use loader::{LoaderEvent, LoaderStatus, LoaderStore, LoaderUpdate, LoaderView};
pub use marshal_worker::{IntervalExit, IntervalHandle};
pub use operation::{CommandOperationSource, Operation, OperationProjection, OperationSource, OperationStatus, WaitError, WaitOptions, wait_for_operation};
pub use poll::PollStart;
pub use request::{Method, Params, RawResponse, Request, Response};
pub use transport::Transport;
pub use workflow::{Outputs, Workflow, WorkflowScope, WorkflowTask};
