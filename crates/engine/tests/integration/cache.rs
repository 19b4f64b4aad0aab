use std::sync::Arc;
use std::time::Duration;

use marshal_engine::{CachePolicy, Command, Method};
use serde_json::json;

use crate::common::{build, object, setup};

#[tokio::test(start_paused = true)]
async fn fresh_entry_short_circuits_until_window_expires() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Get, "/apps", 200, json!([{ "id": 1 }]));
	let command = Arc::new(Command::get("fetch-apps", "/apps").cached(CachePolicy::Short));
	let window = Duration::from_millis(engine.config().cache.short_ms);

	let first = engine.run(command.invoke(object(json!({})))).await;
	tokio::time::advance(window / 2).await;
	let second = engine.run(command.invoke(object(json!({})))).await;

	assert_eq!(transport.count(Method::Get, "/apps"), 1);
	assert!(!first.cache_hit());
	assert!(second.cache_hit());
	assert_eq!(second.data(), Some(&json!([{ "id": 1 }])));

	tokio::time::advance(window).await;
	let third = engine.run(command.invoke(object(json!({})))).await;

	assert_eq!(transport.count(Method::Get, "/apps"), 2);
	assert!(!third.cache_hit());
	assert!(engine.loaders().get(third.loader_id()).is_success);
}

#[tokio::test(start_paused = true)]
async fn failures_are_never_cached() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport
		.fail(Method::Get, "/apps/7", 500, "internal", "backend exploded")
		.reply(Method::Get, "/apps/7", 200, json!({ "id": 7 }));
	let command = Arc::new(Command::get("fetch-app", "/apps/:id").cached(CachePolicy::Long));

	let failed = engine.run(command.invoke(object(json!({ "id": "7" })))).await;
	let retried = engine.run(command.invoke(object(json!({ "id": "7" })))).await;
	let cached = engine.run(command.invoke(object(json!({ "id": "7" })))).await;

	assert!(!failed.is_ok());
	assert!(retried.is_ok() && !retried.cache_hit());
	assert!(cached.cache_hit());
	assert_eq!(transport.count(Method::Get, "/apps/7"), 2);
}

#[tokio::test(start_paused = true)]
async fn entries_are_keyed_by_parameters() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Get, "/apps/1", 200, json!({ "id": 1 }));
	transport.reply(Method::Get, "/apps/2", 200, json!({ "id": 2 }));
	let command = Arc::new(Command::get("fetch-app", "/apps/:id").cached(CachePolicy::Ttl(Duration::from_secs(60))));

	engine.run(command.invoke(object(json!({ "id": "1" })))).await;
	let other = engine.run(command.invoke(object(json!({ "id": "2" })))).await;

	assert!(!other.cache_hit());
	assert_eq!(other.data(), Some(&json!({ "id": 2 })));
	assert_eq!(transport.requests().len(), 2);

	engine.cache().invalidate(other.request_key());
	let refetched = engine.run(command.invoke(object(json!({ "id": "2" })))).await;
	assert!(!refetched.cache_hit());
	assert_eq!(transport.requests().len(), 3);
}
