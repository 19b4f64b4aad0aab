use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use marshal_engine::test_helpers::{self, ScriptedTransport};
use marshal_engine::{Command, Credential, Engine, Failure, MemoryCredentials, Method, Scope, StepUp, Transport, WorkflowScope, WorkflowTask, params};
use marshal_platform::auth::{LOGIN, LoginRequest, SecondFactor, TokenElevator, elevate, login};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::common::{FixedProvider, build, init_tracing, setup, token};

/// Continuation recording the credential scope it ran under.
#[derive(Default, Clone)]
struct Landing {
	scope: Arc<Mutex<Option<Scope>>>,
}

#[async_trait]
impl WorkflowTask for Landing {
	async fn run(&self, scope: &WorkflowScope<'_>) -> Result<Value, Failure> {
		*self.scope.lock() = scope.engine().credentials().current().map(|c| c.scope);
		Ok(Value::Null)
	}
}

#[tokio::test]
async fn password_login_elevates_before_continuing() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Post, "/tokens", 201, token("manage-1", "manage"));
	transport.reply(Method::Post, "/tokens/elevate", 201, token("elevated-1", "elevated"));
	let landing = Landing::default();

	engine
		.run_workflow(&login(LoginRequest::password("ops@example.com", "hunter2"), landing.clone()))
		.await
		.expect("login should succeed");

	let elevate = transport.requests_to(Method::Post, "/tokens/elevate");
	assert_eq!(elevate.len(), 1);
	assert_eq!(elevate[0].header("authorization"), Some("Bearer manage-1"));
	assert_eq!(elevate[0].json(), Some(json!({ "password": "hunter2", "scope": "elevated", "expires_in": 1_800 })));
	assert_eq!(*landing.scope.lock(), Some(Scope::Elevated));
	assert!(engine.loaders().get(LOGIN).is_success);
	assert!(engine.loaders().get("auth").is_success);
}

#[tokio::test]
async fn second_factor_login_skips_elevation() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Post, "/tokens", 201, token("manage-2", "manage"));
	let request = LoginRequest::password("ops@example.com", "hunter2").with_second_factor(SecondFactor::Otp("654321".into()));

	engine.run_workflow(&login(request, Landing::default())).await.expect("login should succeed");

	assert_eq!(transport.count(Method::Post, "/tokens/elevate"), 0);
	let sent = transport.requests_to(Method::Post, "/tokens");
	assert_eq!(sent[0].json().and_then(|body| body.get("otp_token").cloned()), Some(json!("654321")));
	assert!(engine.loaders().get("auth").is_success);
}

#[tokio::test]
async fn rejected_password_fails_login_and_auth_loader_stays_idle() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.fail(Method::Post, "/tokens", 401, "invalid_credentials", "Invalid email or password");
	let landing = Landing::default();

	let failure = engine
		.run_workflow(&login(LoginRequest::password("ops@example.com", "wrong"), landing.clone()))
		.await
		.expect_err("login should fail");

	assert_eq!(failure.token(), Some("invalid_credentials"));
	assert_eq!(engine.loaders().get(LOGIN).message, "Invalid email or password");
	assert!(!engine.loaders().get("auth").is_success);
	assert_eq!(*landing.scope.lock(), None);
}

#[tokio::test]
async fn token_elevator_forwards_webauthn_assertion_verbatim() {
	let (transport, builder) = setup();
	let assertion = json!({
		"id": "cred-1",
		"rawId": "Y3JlZC0x",
		"type": "public-key",
		"response": { "authenticatorData": "SZYN5YgO", "clientDataJSON": "eyJ0eXBlIjoid2ViYXV0aG4uZ2V0In0", "signature": "MEUCIQ" }
	});
	let provider = FixedProvider::new(StepUp::WebAuthn {
		password: "hunter2".into(),
		assertion: assertion.clone(),
	});
	let manage = Credential::new("manage-3", Scope::Manage, Utc::now() + Duration::hours(1));
	let engine = build(
		builder
			.credentials(Arc::new(MemoryCredentials::with(manage)))
			.elevation(provider.clone(), Arc::new(TokenElevator::default())),
	);
	transport.reply(Method::Post, "/tokens/elevate", 201, token("elevated-3", "elevated"));
	transport.reply(Method::Delete, "/databases/2", 200, json!({ "id": 2 }));
	let deprovision = Arc::new(Command::delete("deprovision-database", "/databases/:id").elevated());

	let ctx = engine.run(deprovision.invoke(params(json!({ "id": "2" })))).await;

	assert!(ctx.is_ok(), "unexpected failure: {:?}", ctx.failure());
	assert_eq!(provider.prompts(), 1);
	let elevate = transport.requests_to(Method::Post, "/tokens/elevate");
	assert_eq!(elevate[0].json().and_then(|body| body.get("webauthn").cloned()), Some(assertion));
	let sent = transport.requests_to(Method::Delete, "/databases/2");
	assert_eq!(sent[0].header("authorization"), Some("Bearer elevated-3"));
}

#[tokio::test]
async fn standalone_elevate_stores_elevated_credential() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Post, "/tokens/elevate", 201, token("elevated-4", "elevated"));

	engine
		.run_workflow(&elevate(StepUp::Otp {
			password: "hunter2".into(),
			otp: "111222".into(),
		}))
		.await
		.expect("elevate should succeed");

	let current = engine.credentials().current().expect("credential should be stored");
	assert_eq!(current.token, "elevated-4");
	assert!(current.is_elevated());
}

#[tokio::test]
async fn login_marks_the_configured_auth_loader() {
	init_tracing();
	let transport = ScriptedTransport::new();
	let mut config = test_helpers::config();
	config.loaders.auth = "session".into();
	let engine = build(Engine::builder(config, Arc::clone(&transport) as Arc<dyn Transport>));
	transport.reply(Method::Post, "/tokens", 201, token("manage-5", "manage"));
	let request = LoginRequest::password("ops@example.com", "hunter2").with_second_factor(SecondFactor::Otp("000111".into()));

	engine.run_workflow(&login(request, Landing::default())).await.expect("login should succeed");

	assert!(engine.loaders().get("session").is_success);
	assert!(engine.loaders().get("auth").is_idle);
}
