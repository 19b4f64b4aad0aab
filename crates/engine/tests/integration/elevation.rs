use std::sync::Arc;

use chrono::{Duration, Utc};
use marshal_engine::middleware::Body;
use marshal_engine::{Command, Credential, ElevationState, Method, Params, Scope, StepUp, StepUpReason};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::common::{PostElevator, QueuedProvider, build, manage_credential, object, password, setup, token_reply};

fn update_app() -> Arc<Command> {
	Arc::new(
		Command::put("update-app", "/apps/:id")
			.with(Body(|p: &Params| p.get("payload").cloned().unwrap_or(Value::Null)))
			.elevated(),
	)
}

fn payload() -> Value {
	json!({
		"handle": "web",
		"env": { "RAILS_ENV": "production", "EMPTY": "" },
		"containers": [{ "size": 1024, "count": 2 }],
		"note": "ünïcødé \"quoted\""
	})
}

#[tokio::test]
async fn elevated_command_is_sent_once_with_original_payload() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([password("hunter2")]);
	let engine = build(builder.credentials(manage_credential("manage-1")).elevation(provider.clone(), Arc::new(PostElevator)));
	transport.reply(Method::Post, "/tokens/elevate", 201, token_reply("elevated-1"));
	transport.reply(Method::Put, "/apps/1", 200, json!({ "id": 1 }));

	let ctx = engine.run(update_app().invoke(object(json!({ "id": "1", "payload": payload() })))).await;

	assert!(ctx.is_ok(), "unexpected failure: {:?}", ctx.failure());
	let sent = transport.requests_to(Method::Put, "/apps/1");
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].body.as_deref(), Some(payload().to_string().as_bytes()));
	assert_eq!(sent[0].header("authorization"), Some("Bearer elevated-1"));
	assert_eq!(provider.prompts().len(), 1);
	assert_eq!(provider.prompts()[0].loader_id, ctx.loader_id());
	assert_eq!(engine.elevation().map(|m| m.state("update-app")), Some(ElevationState::Elevated));

	let elevate = transport.requests_to(Method::Post, "/tokens/elevate");
	assert_eq!(elevate[0].json(), Some(json!({ "kind": "password", "password": "hunter2" })));
}

#[tokio::test]
async fn already_elevated_credential_skips_step_up() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([]);
	let elevated = Credential::new("elevated-0", Scope::Elevated, Utc::now() + Duration::minutes(10));
	let engine = build(
		builder
			.credentials(Arc::new(marshal_engine::MemoryCredentials::with(elevated)))
			.elevation(provider.clone(), Arc::new(PostElevator)),
	);
	transport.reply(Method::Put, "/apps/1", 200, json!({ "id": 1 }));

	let ctx = engine.run(update_app().invoke(object(json!({ "id": "1", "payload": payload() })))).await;

	assert!(ctx.is_ok());
	assert!(provider.prompts().is_empty());
	assert_eq!(transport.count(Method::Post, "/tokens/elevate"), 0);
}

#[tokio::test]
async fn backend_demand_replays_original_request_once() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([password("hunter2")]);
	let engine = build(builder.credentials(manage_credential("manage-1")).elevation(provider.clone(), Arc::new(PostElevator)));
	transport
		.fail(Method::Post, "/apps/1/restarts", 403, "insufficient_scope", "elevated token required")
		.reply(Method::Post, "/apps/1/restarts", 202, json!({ "id": 77 }));
	transport.reply(Method::Post, "/tokens/elevate", 201, token_reply("elevated-2"));
	let restart = Arc::new(Command::post("restart-app", "/apps/:id/restarts").with(Body(|_: &Params| json!({ "force": true }))));

	let ctx = engine.run(restart.invoke(object(json!({ "id": "1" })))).await;

	assert!(ctx.is_ok());
	let sent = transport.requests_to(Method::Post, "/apps/1/restarts");
	assert_eq!(sent.len(), 2);
	assert_eq!(sent[0].body, sent[1].body);
	assert_eq!(sent[0].header("authorization"), Some("Bearer manage-1"));
	assert_eq!(sent[1].header("authorization"), Some("Bearer elevated-2"));
	assert_eq!(provider.prompts().len(), 1);
	assert!(engine.loaders().get(ctx.loader_id()).is_success);
}

#[tokio::test]
async fn step_up_failure_is_reported_on_original_loader() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([password("wrong")]);
	let engine = build(builder.credentials(manage_credential("manage-1")).elevation(provider.clone(), Arc::new(PostElevator)));
	transport.fail(Method::Post, "/tokens/elevate", 401, "invalid_credentials", "password is incorrect");

	let ctx = engine.run(update_app().invoke(object(json!({ "id": "1", "payload": payload() })))).await;

	assert_eq!(transport.count(Method::Put, "/apps/1"), 0);
	assert_eq!(provider.prompts().len(), 1, "no automatic retry");
	let view = engine.loaders().get(ctx.loader_id());
	assert!(view.is_error);
	assert_eq!(view.message, "password is incorrect");
	assert_eq!(view.error_token(), Some("invalid_credentials"));
	assert_eq!(engine.elevation().map(|m| m.state("update-app")), Some(ElevationState::ElevationFailed));
}

#[tokio::test]
async fn declined_prompt_fails_without_sending() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([]);
	let engine = build(builder.credentials(manage_credential("manage-1")).elevation(provider, Arc::new(PostElevator)));

	let ctx = engine.run(update_app().invoke(object(json!({ "id": "1", "payload": payload() })))).await;

	assert!(transport.requests().is_empty());
	assert_eq!(engine.loaders().get(ctx.loader_id()).error_token(), Some("elevation_cancelled"));
}

#[tokio::test]
async fn second_factor_demand_prompts_again() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([
		password("hunter2"),
		StepUp::Otp {
			password: "hunter2".into(),
			otp: "123456".into(),
		},
	]);
	let engine = build(builder.credentials(manage_credential("manage-1")).elevation(provider.clone(), Arc::new(PostElevator)));
	transport
		.fail(Method::Post, "/tokens/elevate", 401, "otp_token_required", "one-time password required")
		.reply(Method::Post, "/tokens/elevate", 201, token_reply("elevated-3"));
	transport.reply(Method::Put, "/apps/1", 200, json!({ "id": 1 }));

	let ctx = engine.run(update_app().invoke(object(json!({ "id": "1", "payload": payload() })))).await;

	assert!(ctx.is_ok());
	let prompts = provider.prompts();
	assert_eq!(prompts.len(), 2);
	assert_eq!(prompts[0].reason, StepUpReason::Initial);
	assert_eq!(
		prompts[1].reason,
		StepUpReason::SecondFactor {
			token: "otp_token_required".into()
		}
	);
	let sent = transport.requests_to(Method::Put, "/apps/1");
	assert_eq!(sent[0].body.as_deref(), Some(payload().to_string().as_bytes()));
}

#[tokio::test]
async fn concurrent_step_ups_prompt_once() {
	let (transport, builder) = setup();
	let provider = QueuedProvider::new([password("hunter2")]);
	let engine = build(builder.credentials(manage_credential("manage-1")).elevation(provider.clone(), Arc::new(PostElevator)));
	transport.reply(Method::Post, "/tokens/elevate", 201, token_reply("elevated-4"));
	transport.reply(Method::Put, "/apps/1", 200, json!({ "id": 1 }));
	transport.reply(Method::Put, "/apps/2", 200, json!({ "id": 2 }));
	let command = update_app();

	let (a, b) = tokio::join!(
		engine.run(command.invoke(object(json!({ "id": "1", "payload": {} })))),
		engine.run(command.invoke(object(json!({ "id": "2", "payload": {} })))),
	);

	assert!(a.is_ok() && b.is_ok());
	assert_eq!(provider.prompts().len(), 1);
	assert_eq!(transport.count(Method::Post, "/tokens/elevate"), 1);
}

#[tokio::test]
async fn elevated_command_without_step_up_configured_is_not_sent() {
	let (transport, builder) = setup();
	let engine = build(builder.credentials(manage_credential("manage-1")));
	transport.reply(Method::Put, "/apps/1", 200, json!({ "id": 1 }));

	let ctx = engine.run(update_app().invoke(object(json!({ "id": "1", "payload": payload() })))).await;

	assert_eq!(ctx.failure().and_then(|f| f.token()), Some("elevation_unavailable"));
	assert!(transport.requests().is_empty());
	let view = engine.loaders().get(ctx.loader_id());
	assert!(view.is_error);
	assert_eq!(view.error_token(), Some("elevation_unavailable"));
}
