//! App listing, configuration and deploys.

use std::collections::HashSet;
use std::sync::Arc;

use marshal_engine::middleware::{Body, UpsertEntity, Validate};
use marshal_engine::{ApiError, CachePolicy, Command, Failure, Params, Workflow, WorkflowScope};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::support::{object, text};

/// One `NAME=value` pair of an app configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
	pub name: String,
	pub value: String,
}

impl EnvVar {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}
}

/// `GET /apps`, fresh for the short cache window.
pub fn fetch_apps() -> Command {
	Command::get("fetch-apps", "/apps").cached(CachePolicy::Short).with(UpsertEntity("apps"))
}

/// `POST /apps/:app_id/configurations`
///
/// `env` and `database_env` are merged into one variable map; a name may
/// appear only once across both.
pub fn create_configuration() -> Command {
	Command::post("create-configuration", "/apps/:app_id/configurations")
		.with(Validate(reject_duplicate_names))
		.with(Body(|p: &Params| {
			let mut env = Map::new();
			for var in env_vars(p, "env").into_iter().chain(env_vars(p, "database_env")) {
				env.insert(var.name, Value::String(var.value));
			}
			json!({ "env": env })
		}))
		.with(UpsertEntity("configurations"))
}

/// `POST /apps/:app_id/operations` with type `deploy`.
pub fn create_deploy_operation() -> Command {
	Command::post("create-deploy-operation", "/apps/:app_id/operations")
		.with(Body(|p: &Params| {
			let mut body = json!({ "type": "deploy" });
			if let Some(image) = p.get("docker_ref").filter(|v| !v.is_null()) {
				body["docker_ref"] = image.clone();
			}
			body
		}))
		.with(UpsertEntity("operations"))
}

fn env_vars(params: &Params, field: &str) -> Vec<EnvVar> {
	params
		.get(field)
		.cloned()
		.and_then(|value| serde_json::from_value::<Vec<EnvVar>>(value).ok())
		.unwrap_or_default()
}

fn reject_duplicate_names(params: &Params) -> Result<(), Failure> {
	let mut seen = HashSet::new();
	for var in env_vars(params, "env").into_iter().chain(env_vars(params, "database_env")) {
		if !seen.insert(var.name.clone()) {
			return Err(Failure::Validation(
				ApiError::validation("duplicate_env_var", format!("{} is set more than once", var.name)).with_context("name", json!(var.name)),
			));
		}
	}
	Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeployApp {
	pub app_id: String,
	pub env: Vec<EnvVar>,
	/// Variables injected from a linked database, e.g. `DATABASE_URL`.
	pub database_env: Vec<EnvVar>,
	pub docker_image: Option<String>,
}

/// Write the configuration, then create the deploy operation.
///
/// Success meta is `{operation_id}`. The operation is not awaited; pair with
/// `WaitForOperation` when the caller needs the outcome.
pub fn deploy_app(request: DeployApp) -> Workflow {
	let configuration = Arc::new(create_configuration());
	let deploy = Arc::new(create_deploy_operation());

	Workflow::new(format!("deploy-app-{}", request.app_id))
		.command(
			"configuration",
			configuration.invoke(object(json!({
				"app_id": request.app_id,
				"env": request.env,
				"database_env": request.database_env,
			}))),
		)
		.command(
			"operation",
			deploy.invoke(object(json!({
				"app_id": request.app_id,
				"docker_ref": request.docker_image,
			}))),
		)
		.finish(|scope: &WorkflowScope<'_>| {
			let mut meta = Map::new();
			meta.insert("operation_id".into(), json!(scope.output("operation").and_then(text("id"))));
			Ok(meta)
		})
}
