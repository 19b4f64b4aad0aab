//! Reusable command middleware.
//!
//! Commands list these with [`crate::Command::with`]. Each one either rewrites
//! the context before calling the rest of the chain or reacts to the response
//! afterwards.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::action::Action;
use crate::cache::CachePolicy;
use crate::chain::{Middleware, Next};
use crate::context::Context;
use crate::error::Failure;
use crate::request::Params;

/// Marks the invocation as requiring an elevated credential.
#[derive(Debug, Clone, Copy)]
pub struct RequireElevation;

#[async_trait]
impl Middleware for RequireElevation {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		ctx.elevated = true;
		next.run(ctx).await;
		Ok(())
	}
}

/// Enables the response cache for the invocation.
#[derive(Debug, Clone, Copy)]
pub struct Cached(pub CachePolicy);

#[async_trait]
impl Middleware for Cached {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		ctx.cache = Some(self.0);
		next.run(ctx).await;
		Ok(())
	}
}

/// Builds the JSON request body from the invocation parameters.
pub struct Body<F>(pub F);

#[async_trait]
impl<F> Middleware for Body<F>
where
	F: Fn(&Params) -> Value + Send + Sync + 'static,
{
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		let body = (self.0)(&ctx.params);
		ctx.request.set_json(&body);
		next.run(ctx).await;
		Ok(())
	}
}

/// Sends the invocation parameters unchanged as the JSON body.
#[derive(Debug, Clone, Copy)]
pub struct ParamsBody;

#[async_trait]
impl Middleware for ParamsBody {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		let body = Value::Object(ctx.params.clone());
		ctx.request.set_json(&body);
		next.run(ctx).await;
		Ok(())
	}
}

/// Rejects the invocation before any request is sent when the check fails.
pub struct Validate<F>(pub F);

#[async_trait]
impl<F> Middleware for Validate<F>
where
	F: Fn(&Params) -> Result<(), Failure> + Send + Sync + 'static,
{
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		if let Err(failure) = (self.0)(&ctx.params) {
			tracing::debug!(command = ctx.command_id(), error = ?failure.token(), "engine.validate.rejected");
			return Err(failure);
		}
		next.run(ctx).await;
		Ok(())
	}
}

/// Sets a fixed request header.
#[derive(Debug, Clone)]
pub struct Header {
	name: String,
	value: String,
}

impl Header {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}
}

#[async_trait]
impl Middleware for Header {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		ctx.request.set_header(&self.name, self.value.clone());
		next.run(ctx).await;
		Ok(())
	}
}

/// Appends side effects derived from a successful response.
pub struct OnSuccess<F>(pub F);

#[async_trait]
impl<F> Middleware for OnSuccess<F>
where
	F: Fn(&Params, &Value) -> Vec<Action> + Send + Sync + 'static,
{
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		next.run(ctx).await;
		if let Some(Ok(data)) = &ctx.response {
			let actions = (self.0)(&ctx.params, data);
			ctx.side_effects.extend(actions);
		}
		Ok(())
	}
}

/// Upserts the response object into `entity`, keyed by its `id` field.
///
/// Array responses upsert each element.
#[derive(Debug, Clone)]
pub struct UpsertEntity(pub &'static str);

#[async_trait]
impl Middleware for UpsertEntity {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		next.run(ctx).await;
		let Some(Ok(data)) = &ctx.response else {
			return Ok(());
		};
		let items = match data {
			Value::Array(items) => items.iter().collect(),
			other => vec![other],
		};
		let actions: Vec<_> = items
			.into_iter()
			.filter_map(|item| {
				let id = entity_id(item)?;
				Some(Action::upsert(self.0, id, item.clone()))
			})
			.collect();
		ctx.side_effects.extend(actions);
		Ok(())
	}
}

fn entity_id(item: &Value) -> Option<String> {
	match item.get("id")? {
		Value::String(id) => Some(id.clone()),
		Value::Number(id) => Some(id.to_string()),
		_ => None,
	}
}

/// Merges loader meta derived from a successful response.
pub struct SuccessMeta<F>(pub F);

#[async_trait]
impl<F> Middleware for SuccessMeta<F>
where
	F: Fn(&Value) -> Map<String, Value> + Send + Sync + 'static,
{
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		next.run(ctx).await;
		if let Some(Ok(data)) = &ctx.response {
			let meta = (self.0)(data);
			ctx.meta.extend(meta);
		}
		Ok(())
	}
}

/// Sets the loader message reported on success.
#[derive(Debug, Clone)]
pub struct SuccessMessage(pub &'static str);

#[async_trait]
impl Middleware for SuccessMessage {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		next.run(ctx).await;
		if ctx.is_ok() {
			ctx.message = Some(self.0.to_string());
		}
		Ok(())
	}
}
