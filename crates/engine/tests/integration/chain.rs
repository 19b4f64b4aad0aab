use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marshal_engine::middleware::{Body, Header, OnSuccess, SuccessMeta, Validate};
use marshal_engine::{Action, Command, Context, Failure, Method, Middleware, Next, RawResponse, Request, Transport, TransportError};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Map, json};
use tokio_util::sync::CancellationToken;

use crate::common::{build, object, setup};

struct Trace {
	label: &'static str,
	log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Trace {
	async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Failure> {
		self.log.lock().push(format!("{}:before", self.label));
		ctx.request.set_header("x-trace", self.label);
		next.run(ctx).await;
		let outcome = if ctx.is_ok() { "ok" } else { "err" };
		self.log.lock().push(format!("{}:after:{outcome}", self.label));
		Ok(())
	}
}

#[tokio::test]
async fn middleware_runs_outward_in_and_unwinds_in_reverse() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Get, "/apps/1", 200, json!({ "id": 1, "handle": "web" }));

	let log = Arc::new(Mutex::new(Vec::new()));
	let command = Arc::new(
		Command::get("fetch-app", "/apps/:id")
			.with(Trace { label: "outer", log: Arc::clone(&log) })
			.with(Trace { label: "inner", log: Arc::clone(&log) }),
	);

	let ctx = engine.run(command.invoke(object(json!({ "id": "1" })))).await;

	assert!(ctx.is_ok());
	assert_eq!(*log.lock(), vec!["outer:before", "inner:before", "inner:after:ok", "outer:after:ok"]);
	let sent = transport.requests();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].header("x-trace"), Some("inner"));
	assert!(engine.loaders().get(ctx.loader_id()).is_success);
}

#[tokio::test]
async fn validation_short_circuits_before_any_request() {
	let (transport, builder) = setup();
	let engine = build(builder);
	let command = Arc::new(Command::post("create-db", "/accounts/:account/databases").with(Validate(|params: &marshal_engine::Params| {
		match params.get("handle").and_then(|h| h.as_str()) {
			Some(handle) if !handle.is_empty() => Ok(()),
			_ => Err(Failure::validation("handle_required", "a handle is required")),
		}
	})));

	let ctx = engine.run(command.invoke(object(json!({ "account": "a1", "handle": "" })))).await;

	assert!(transport.requests().is_empty());
	let view = engine.loaders().get(ctx.loader_id());
	assert!(view.is_error);
	assert_eq!(view.message, "a handle is required");
	assert_eq!(view.error_token(), Some("handle_required"));
	assert_eq!(view.meta.get("code"), Some(&json!(422)));
}

#[tokio::test]
async fn missing_path_parameter_is_a_validation_failure() {
	let (transport, builder) = setup();
	let engine = build(builder);
	let command = Arc::new(Command::get("fetch-operation", "/operations/:id"));

	let ctx = engine.run(command.invoke(object(json!({})))).await;

	assert!(matches!(ctx.failure(), Some(Failure::Validation(_))));
	assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn domain_and_transport_failures_are_distinguishable() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.fail(Method::Post, "/apps", 422, "handle_taken", "handle is already taken");
	transport.route(Method::Get, "/apps", Ok(RawResponse::new(503, "upstream unavailable")));

	let create = Arc::new(Command::post("create-app", "/apps").with(Body(|p: &marshal_engine::Params| json!({ "handle": p.get("handle") }))));
	let list = Arc::new(Command::get("fetch-apps", "/apps"));

	let created = engine.run(create.invoke(object(json!({ "handle": "web" })))).await;
	let listed = engine.run(list.invoke(object(json!({})))).await;

	let domain = engine.loaders().get(created.loader_id());
	assert_eq!(domain.error_token(), Some("handle_taken"));
	assert_eq!(domain.meta.get("code"), Some(&json!(422)));
	assert_eq!(domain.meta.get("exception_context"), Some(&json!({})));

	let generic = engine.loaders().get(listed.loader_id());
	assert!(generic.is_error);
	assert!(generic.meta.is_empty());
	assert!(matches!(listed.failure(), Some(Failure::Transport { status: Some(503), .. })));
}

#[tokio::test]
async fn success_meta_message_and_effects_follow_response() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Post, "/apps", 201, json!({ "id": 9, "handle": "web" }));
	let mut bus = engine.bus().subscribe();

	let command = Arc::new(
		Command::post("create-app", "/apps")
			.with(Header::new("X-Request-Source", "tests"))
			.with(SuccessMeta(|data: &serde_json::Value| {
				let mut meta = Map::new();
				meta.insert("app_id".into(), data["id"].clone());
				meta
			}))
			.with(OnSuccess(|_: &marshal_engine::Params, data: &serde_json::Value| {
				vec![Action::upsert("apps", data["id"].to_string(), data.clone()), Action::Navigate { to: "/apps/9".into() }]
			})),
	);

	let ctx = engine.run(command.invoke(object(json!({ "handle": "web" })))).await;

	let view = engine.loaders().get(ctx.loader_id());
	assert_eq!(view.meta.get("app_id"), Some(&json!(9)));
	assert_eq!(transport.requests()[0].header("x-request-source"), Some("tests"));
	assert_eq!(bus.recv().await.ok().map(|a| a.kind().to_string()), Some("upsert".into()));
	assert_eq!(bus.recv().await.ok(), Some(Action::Navigate { to: "/apps/9".into() }));
}

#[tokio::test]
async fn loader_hint_overrides_request_key() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Get, "/apps", 200, json!([]));
	let command = Arc::new(Command::get("fetch-apps", "/apps"));

	let ctx = engine.run(command.invoke(object(json!({ "page": 2 }))).loader("apps-page")).await;

	assert_eq!(ctx.loader_id(), "apps-page");
	assert!(engine.loaders().get("apps-page").is_success);
	assert!(engine.loaders().get(ctx.request_key()).is_idle);
}

/// Transport that never answers.
struct Silent;

#[async_trait]
impl Transport for Silent {
	async fn send(&self, _request: &Request) -> Result<RawResponse, TransportError> {
		std::future::pending().await
	}
}

#[tokio::test]
async fn success_after_failure_drops_stale_error_meta() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport
		.fail(Method::Get, "/apps/1", 401, "otp_token_required", "second factor required")
		.reply(Method::Get, "/apps/1", 200, json!({ "id": 1 }));
	let fetch = Arc::new(Command::get("fetch-app", "/apps/:id"));

	let first = engine.run(fetch.invoke(object(json!({ "id": "1" })))).await;
	assert_eq!(engine.loaders().get(first.loader_id()).error_token(), Some("otp_token_required"));

	let second = engine.run(fetch.invoke(object(json!({ "id": "1" })))).await;
	let view = engine.loaders().get(second.loader_id());
	assert!(view.is_success);
	assert_eq!(view.error_token(), None);
	assert!(view.meta.is_empty());
}

fn silent_engine() -> marshal_engine::Engine {
	crate::common::init_tracing();
	build(marshal_engine::Engine::builder(marshal_engine::test_helpers::config(), Arc::new(Silent)))
}

#[tokio::test(start_paused = true)]
async fn invocation_deadline_times_out_hung_request() {
	let engine = silent_engine();
	let command = Arc::new(Command::get("fetch-apps", "/apps"));

	let ctx = engine.run(command.invoke(object(json!({}))).timeout(Duration::from_millis(250))).await;

	assert_eq!(ctx.failure(), Some(&Failure::Timeout));
	assert_eq!(engine.loaders().get(ctx.loader_id()).error_token(), Some("timeout"));
}

#[tokio::test(start_paused = true)]
async fn cancel_token_aborts_in_flight_request() {
	let engine = silent_engine();
	let command = Arc::new(Command::get("fetch-apps", "/apps"));
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();

	let run = engine.run(command.invoke(object(json!({}))).cancel_on(cancel));
	let fire = async {
		tokio::time::sleep(Duration::from_millis(10)).await;
		trigger.cancel();
	};
	let (ctx, ()) = tokio::join!(run, fire);

	assert_eq!(ctx.failure(), Some(&Failure::Cancelled));
	assert!(engine.loaders().get(ctx.loader_id()).is_error);
}
