use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use marshal_engine::middleware::UpsertEntity;
use marshal_engine::{Action, Command, Engine, IntervalExit, Method, PollStart, RawResponse, Request, Transport, TransportError, test_helpers};
use serde_json::{Value, json};

use crate::common::{build, init_tracing, object, setup};

const INTERVAL: Duration = Duration::from_millis(100);

fn fetch_service() -> Arc<Command> {
	Arc::new(Command::get("fetch-service", "/services/:id"))
}

#[tokio::test(start_paused = true)]
async fn cancel_action_stops_further_invocations() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Get, "/services/4", 200, json!({ "id": 4, "status": "provisioning" }));

	let handle = engine
		.poll(fetch_service().invoke(object(json!({ "id": "4" }))), INTERVAL, "poll/service/cancel")
		.into_handle()
		.expect("first poll should start");

	tokio::time::sleep(INTERVAL * 2 + INTERVAL / 2).await;
	assert_eq!(transport.count(Method::Get, "/services/4"), 3);

	engine.dispatch(Action::signal("poll/service/cancel")).expect("dispatch should apply");
	tokio::time::sleep(INTERVAL * 5).await;

	assert_eq!(transport.count(Method::Get, "/services/4"), 3);
	assert_eq!(handle.join().await, Some(IntervalExit::Stopped));
	assert!(!engine.is_polling("fetch-service"));
}

#[tokio::test(start_paused = true)]
async fn second_poll_for_active_command_is_a_no_op() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport.reply(Method::Get, "/services/4", 200, json!({ "id": 4 }));
	let command = fetch_service();

	let first = engine.poll(command.invoke(object(json!({ "id": "4" }))), INTERVAL, "stop");
	let second = engine.poll(command.invoke(object(json!({ "id": "4" }))), INTERVAL, "stop");
	let first = first.into_handle().expect("first poll should start");
	let PollStart::AlreadyRunning { generation } = second else {
		panic!("second poll must not start a loop");
	};
	assert_eq!(generation, first.generation());

	tokio::time::sleep(INTERVAL * 2 + INTERVAL / 2).await;
	assert_eq!(transport.count(Method::Get, "/services/4"), 3);

	assert!(engine.cancel_poll("fetch-service"));
	assert_eq!(first.join().await, Some(IntervalExit::Cancelled));

	let restarted = engine
		.poll(command.invoke(object(json!({ "id": "4" }))), INTERVAL, "stop")
		.into_handle()
		.expect("poll should restart after cancellation");
	assert!(restarted.generation() > generation);
	restarted.cancel();
	assert_eq!(restarted.join().await, Some(IntervalExit::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn failing_iterations_update_loader_without_stopping() {
	let (transport, builder) = setup();
	let engine = build(builder);
	transport
		.fail(Method::Get, "/services/4", 404, "not_found", "service not found")
		.fail(Method::Get, "/services/4", 404, "not_found", "service not found")
		.reply(Method::Get, "/services/4", 200, json!({ "id": 4 }));
	let invocation = fetch_service().invoke(object(json!({ "id": "4" })));
	let key = invocation.request_key();

	let handle = engine.poll(invocation, INTERVAL, "stop").into_handle().expect("poll should start");

	tokio::time::sleep(INTERVAL / 2).await;
	let view = engine.loaders().get(&key);
	assert!(view.is_error);
	assert_eq!(view.error_token(), Some("not_found"));

	tokio::time::sleep(INTERVAL * 2).await;
	let view = engine.loaders().get(&key);
	assert!(view.is_success);
	assert_eq!(transport.count(Method::Get, "/services/4"), 3);

	engine.dispatch(Action::signal("stop")).expect("dispatch should apply");
	assert_eq!(handle.join().await, Some(IntervalExit::Stopped));
}

/// Transport answering every request late with a large service list.
struct SlowListing {
	calls: AtomicUsize,
	delay: Duration,
	items: usize,
}

#[async_trait]
impl Transport for SlowListing {
	async fn send(&self, _request: &Request) -> Result<RawResponse, TransportError> {
		tokio::time::sleep(self.delay).await;
		self.calls.fetch_add(1, Ordering::SeqCst);
		let items: Vec<Value> = (0..self.items).map(|id| json!({ "id": id })).collect();
		Ok(RawResponse::json(200, &Value::Array(items)))
	}
}

#[tokio::test(start_paused = true)]
async fn cancel_is_not_lost_behind_a_burst_of_effects() {
	init_tracing();
	let transport = Arc::new(SlowListing {
		calls: AtomicUsize::new(0),
		delay: INTERVAL * 2,
		items: 300,
	});
	let engine: Engine = build(Engine::builder(test_helpers::config(), Arc::clone(&transport) as Arc<dyn Transport>));
	let list = Arc::new(Command::get("list-services", "/services").with(UpsertEntity("services")));

	let handle = engine.poll(list.invoke(object(json!({}))), INTERVAL, "services/stop").into_handle().expect("poll should start");

	tokio::time::sleep(INTERVAL).await;
	engine.dispatch(Action::signal("services/stop")).expect("dispatch should apply");

	tokio::time::sleep(Duration::from_secs(2)).await;
	assert!(!engine.is_polling("list-services"));
	assert_eq!(transport.calls.load(Ordering::SeqCst), 1, "the in-flight tick finishes, no further ticks start");
	assert_eq!(handle.join().await, Some(IntervalExit::Stopped));
}
