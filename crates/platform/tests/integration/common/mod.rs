//! Common utilities for platform integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use marshal_engine::test_helpers::{self, ScriptedTransport};
use marshal_engine::{Engine, EngineBuilder, StepUp, StepUpProvider, StepUpRequest};
use parking_lot::Mutex;
use serde_json::{Value, json};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

pub fn setup() -> (Arc<ScriptedTransport>, EngineBuilder) {
	init_tracing();
	let transport = ScriptedTransport::new();
	let builder = test_helpers::engine(&transport);
	(transport, builder)
}

pub fn build(builder: EngineBuilder) -> Engine {
	builder.build().expect("test config should be valid")
}

/// Token response as returned by `POST /tokens` and `POST /tokens/elevate`.
pub fn token(access_token: &str, scope: &str) -> Value {
	json!({ "access_token": access_token, "scope": scope, "expires_in": 1_800 })
}

/// Provider answering every prompt with the same step-up.
pub struct FixedProvider {
	answer: StepUp,
	prompts: Mutex<usize>,
}

impl FixedProvider {
	pub fn new(answer: StepUp) -> Arc<Self> {
		Arc::new(Self {
			answer,
			prompts: Mutex::new(0),
		})
	}

	pub fn prompts(&self) -> usize {
		*self.prompts.lock()
	}
}

#[async_trait]
impl StepUpProvider for FixedProvider {
	async fn challenge(&self, _request: &StepUpRequest) -> Option<StepUp> {
		*self.prompts.lock() += 1;
		Some(self.answer.clone())
	}
}
