//! Ordered, fail-fast composition of commands, nested workflows and tasks.
//!
//! A workflow owns one loader row (its id). Steps run strictly in order. The
//! first failing step stops the workflow and its failure is reported on the
//! workflow loader with the step's message and meta unchanged. Steps that
//! already completed are not rolled back.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::command::Invocation;
use crate::engine::Engine;
use crate::error::Failure;
use crate::loader::LoaderUpdate;

/// Data produced by completed steps, keyed by step name.
pub type Outputs = Map<String, Value>;

/// Read access for steps to the engine and to earlier steps' outputs.
pub struct WorkflowScope<'a> {
	engine: &'a Engine,
	outputs: &'a Outputs,
}

impl<'a> WorkflowScope<'a> {
	pub fn engine(&self) -> &'a Engine {
		self.engine
	}

	/// Output of the step named `step`, absent if it was skipped.
	pub fn output(&self, step: &str) -> Option<&'a Value> {
		self.outputs.get(step)
	}

	/// String field `field` of `step`'s output. Numbers are rendered as strings.
	pub fn field(&self, step: &str, field: &str) -> Option<String> {
		match self.output(step)?.get(field)? {
			Value::String(s) => Some(s.clone()),
			Value::Number(n) => Some(n.to_string()),
			_ => None,
		}
	}

	pub fn outputs(&self) -> &'a Outputs {
		self.outputs
	}
}

/// Arbitrary async step, e.g. waiting for an operation or a caller continuation.
#[async_trait]
pub trait WorkflowTask: Send + Sync + 'static {
	async fn run(&self, scope: &WorkflowScope<'_>) -> Result<Value, Failure>;
}

type BuildInvocation = Box<dyn Fn(&WorkflowScope<'_>) -> Option<Invocation> + Send + Sync>;
type Finish = Box<dyn Fn(&WorkflowScope<'_>) -> Result<Map<String, Value>, Failure> + Send + Sync>;

enum StepKind {
	Command(BuildInvocation),
	Workflow(Workflow),
	Task(Box<dyn WorkflowTask>),
}

struct Step {
	name: String,
	kind: StepKind,
}

/// A single logical operation made of ordered steps.
pub struct Workflow {
	id: String,
	steps: Vec<Step>,
	finish: Option<Finish>,
	also_succeed: Vec<String>,
}

impl std::fmt::Debug for Workflow {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let steps: Vec<_> = self.steps.iter().map(|s| s.name.as_str()).collect();
		f.debug_struct("Workflow").field("id", &self.id).field("steps", &steps).finish_non_exhaustive()
	}
}

impl Workflow {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			steps: Vec::new(),
			finish: None,
			also_succeed: Vec::new(),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// Appends a fixed command invocation.
	#[must_use]
	pub fn command(self, name: impl Into<String>, invocation: Invocation) -> Self {
		self.command_with(name, move |_| Some(invocation.clone()))
	}

	/// Appends a command built from earlier outputs. Returning `None` skips it.
	#[must_use]
	pub fn command_with<F>(mut self, name: impl Into<String>, build: F) -> Self
	where
		F: Fn(&WorkflowScope<'_>) -> Option<Invocation> + Send + Sync + 'static,
	{
		self.steps.push(Step {
			name: name.into(),
			kind: StepKind::Command(Box::new(build)),
		});
		self
	}

	/// Appends a nested workflow. Its output is its success meta.
	#[must_use]
	pub fn workflow(mut self, name: impl Into<String>, workflow: Workflow) -> Self {
		self.steps.push(Step {
			name: name.into(),
			kind: StepKind::Workflow(workflow),
		});
		self
	}

	#[must_use]
	pub fn task(mut self, name: impl Into<String>, task: impl WorkflowTask) -> Self {
		self.steps.push(Step {
			name: name.into(),
			kind: StepKind::Task(Box::new(task)),
		});
		self
	}

	/// Assembles the success meta from step outputs. Without it the meta is empty.
	#[must_use]
	pub fn finish<F>(mut self, finish: F) -> Self
	where
		F: Fn(&WorkflowScope<'_>) -> Result<Map<String, Value>, Failure> + Send + Sync + 'static,
	{
		self.finish = Some(Box::new(finish));
		self
	}

	/// Also marks loader `id` successful when the workflow succeeds.
	#[must_use]
	pub fn also_succeed(mut self, id: impl Into<String>) -> Self {
		self.also_succeed.push(id.into());
		self
	}
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl Engine {
	/// Runs `workflow` and returns its success meta.
	///
	/// The workflow loader ends in `success` or `error` either way.
	pub async fn run_workflow(&self, workflow: &Workflow) -> Result<Map<String, Value>, Failure> {
		self.execute(workflow).await
	}

	fn execute<'a>(&'a self, workflow: &'a Workflow) -> BoxFuture<'a, Result<Map<String, Value>, Failure>> {
		Box::pin(async move {
			let loaders = self.loaders();
			loaders.start(&workflow.id);
			tracing::debug!(workflow = %workflow.id, steps = workflow.steps.len(), "engine.workflow.start");

			let mut outputs = Outputs::new();
			for (index, step) in workflow.steps.iter().enumerate() {
				match self.step(step, &outputs).await {
					Ok(Some(output)) => {
						outputs.insert(step.name.clone(), output);
					}
					Ok(None) => {
						tracing::debug!(workflow = %workflow.id, step = %step.name, "engine.workflow.skip");
					}
					Err(failure) => {
						tracing::warn!(workflow = %workflow.id, step = %step.name, index, error = %failure, "engine.workflow.failed");
						loaders.error(&workflow.id, LoaderUpdate::message(failure.to_string()).with_meta(failure.meta()));
						return Err(failure);
					}
				}
			}

			let scope = WorkflowScope {
				engine: self,
				outputs: &outputs,
			};
			let meta = match &workflow.finish {
				Some(finish) => match finish(&scope) {
					Ok(meta) => meta,
					Err(failure) => {
						loaders.error(&workflow.id, LoaderUpdate::message(failure.to_string()).with_meta(failure.meta()));
						return Err(failure);
					}
				},
				None => Map::new(),
			};

			loaders.success(&workflow.id, LoaderUpdate::meta(meta.clone()));
			for id in &workflow.also_succeed {
				loaders.success(id, LoaderUpdate::default());
			}
			tracing::debug!(workflow = %workflow.id, "engine.workflow.finish");
			Ok(meta)
		})
	}

	async fn step(&self, step: &Step, outputs: &Outputs) -> Result<Option<Value>, Failure> {
		match &step.kind {
			StepKind::Command(build) => {
				let invocation = {
					let scope = WorkflowScope { engine: self, outputs };
					build(&scope)
				};
				let Some(invocation) = invocation else {
					return Ok(None);
				};
				let ctx = self.run(invocation).await;
				ctx.into_response().map(Some)
			}
			StepKind::Workflow(nested) => self.execute(nested).await.map(|meta| Some(Value::Object(meta))),
			StepKind::Task(task) => {
				let scope = WorkflowScope { engine: self, outputs };
				task.run(&scope).await.map(Some)
			}
		}
	}
}
