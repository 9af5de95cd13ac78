use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cascade_protocol::cdp::methods;
use cascade_runtime::ProtocolChannel;
use serde_json::{Value, json};

use super::*;
use crate::completion::CompletionDetector;
use crate::snapshot::SnapshotEngine;
use crate::testing::{Call, FakeChannel, Reply, ide, install_snapshot, session};

struct Harness {
	coordinator: Coordinator,
	registry: Arc<SessionRegistry>,
	channel: Arc<FakeChannel>,
	events: tokio::sync::mpsc::UnboundedReceiver<Arc<str>>,
}

fn harness(extra: impl Fn(&Call) -> Option<Reply> + Send + Sync + 'static) -> Harness {
	let registry = Arc::new(SessionRegistry::new());
	let hub = Arc::new(BroadcastHub::new());
	let (_, events) = hub.subscribe();
	let channel = FakeChannel::new(ide(extra));
	let session = session("s1", Arc::clone(&channel));
	install_snapshot(&session, &["#cascade > button:nth-of-type(1)", "#cascade > button:nth-of-type(2)"]);
	registry.insert(session);

	let poller = Arc::new(Poller::new(
		Arc::clone(&registry),
		Arc::clone(&hub),
		SnapshotEngine::default(),
		CompletionDetector::default(),
	));
	let coordinator = Coordinator::new(Arc::clone(&registry), poller, hub, Tuning::default());
	Harness {
		coordinator,
		registry,
		channel,
		events,
	}
}

fn located(x: f64, y: f64) -> Reply {
	Reply::Value(json!({"found": true, "x": x, "y": y, "text": "Accept"}))
}

fn mouse_presses(channel: &FakeChannel) -> usize {
	channel.mouse_events().iter().filter(|e| *e == "mousePressed").count()
}

#[tokio::test]
async fn click_dispatches_native_events_at_located_center() {
	let h = harness(|call| (call.script.as_deref() == Some("locate")).then(|| located(40.0, 12.5)));

	h.coordinator.click("s1", Some(1)).await.unwrap();

	let locate = &h.channel.calls()[0];
	assert!(locate.params["expression"].as_str().unwrap().contains("nth-of-type(2)"));
	assert_eq!(h.channel.mouse_events(), vec!["mouseMoved", "mousePressed", "mouseReleased"]);
	let release = &h.channel.calls_to(methods::INPUT_DISPATCH_MOUSE_EVENT)[2];
	assert_eq!(release.params["x"], 40.0);
	assert_eq!(release.params["y"], 12.5);
}

#[tokio::test]
async fn invalid_index_is_rejected_before_any_protocol_call() {
	let h = harness(|_| None);

	let err = h.coordinator.click("s1", Some(5)).await.unwrap_err();
	assert!(matches!(err, Error::InvalidIndex { index: 5, len: 2 }));
	let err = h.coordinator.click("s1", None).await.unwrap_err();
	assert!(matches!(err, Error::MissingParameter("index")));
	let err = h.coordinator.open_popup("s1", Some(9)).await.unwrap_err();
	assert!(matches!(err, Error::InvalidIndex { .. }));
	assert!(h.channel.calls().is_empty());

	let err = h.coordinator.click("nope", Some(0)).await.unwrap_err();
	assert!(matches!(err, Error::SessionNotFound(_)));
}

#[tokio::test]
async fn unresolvable_path_is_element_not_found() {
	let h = harness(|call| (call.script.as_deref() == Some("locate")).then(|| Reply::Value(json!({"found": false}))));

	let err = h.coordinator.click("s1", Some(0)).await.unwrap_err();
	assert!(matches!(err, Error::ElementNotFound(ref p) if p.contains("nth-of-type(1)")));
	assert!(h.channel.mouse_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_popup_extraction_retries_exactly_once() {
	let h = harness(|call| match call.script.as_deref() {
		Some("locate") => Some(located(10.0, 10.0)),
		Some("overlay-signatures") => Some(Reply::Value(json!(["Files"]))),
		Some("extract-popup") => Some(Reply::Value(json!([]))),
		_ => None,
	});

	let items = h.coordinator.open_popup("s1", Some(0)).await.unwrap();
	assert!(items.is_empty());
	assert_eq!(h.channel.count_script("extract-popup"), 2);
	assert_eq!(h.channel.count_script("overlay-signatures"), 2);
	assert_eq!(mouse_presses(&h.channel), 2);
	assert!(h.channel.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn popup_items_on_first_pass_skip_the_retry() {
	let h = harness(|call| match call.script.as_deref() {
		Some("locate") => Some(located(10.0, 10.0)),
		Some("overlay-signatures") => Some(Reply::Value(json!([]))),
		Some("extract-popup") => Some(Reply::Value(json!([
			{"title": "Gemini 3 Pro", "badges": ["New"], "checked": true, "x": 100.0, "y": 200.0},
			{"title": "Claude Sonnet 4.5", "description": "Thinking", "x": 100.0, "y": 230.0}
		]))),
		_ => None,
	});

	let items = h.coordinator.open_popup("s1", Some(0)).await.unwrap();
	assert_eq!(items.len(), 2);
	assert!(items[0].checked);
	assert_eq!(items[1].description.as_deref(), Some("Thinking"));
	assert_eq!(h.channel.count_script("extract-popup"), 1);
	assert_eq!(mouse_presses(&h.channel), 1);
}

#[tokio::test(start_paused = true)]
async fn extraction_failure_sends_escape() {
	let h = harness(|call| match call.script.as_deref() {
		Some("locate") => Some(located(10.0, 10.0)),
		Some("overlay-signatures") => Some(Reply::Value(json!([]))),
		Some("extract-popup") => Some(Reply::Throw("TypeError: row.closest is not a function")),
		_ => None,
	});

	let err = h.coordinator.open_popup("s1", Some(0)).await.unwrap_err();
	assert!(matches!(err, Error::Evaluation(_)));
	assert_eq!(h.channel.keys(), vec!["keyDown:Escape", "keyUp:Escape"]);
}

#[tokio::test(start_paused = true)]
async fn selecting_an_item_clicks_then_dismisses() {
	let h = harness(|call| match call.script.as_deref() {
		Some("find-popup-item") if call.params["expression"].as_str().unwrap_or_default().contains("Fast") => {
			Some(located(120.0, 300.0))
		}
		Some("find-popup-item") => Some(Reply::Value(json!({"found": false}))),
		_ => None,
	});

	h.coordinator.select_popup_item("s1", Some("Fast".into())).await.unwrap();
	assert_eq!(h.channel.mouse_events(), vec!["mouseMoved", "mousePressed", "mouseReleased"]);
	assert_eq!(h.channel.keys(), vec!["keyDown:Escape", "keyUp:Escape"]);

	let err = h.coordinator.select_popup_item("s1", Some("Planning".into())).await.unwrap_err();
	assert!(matches!(err, Error::ElementNotFound(ref t) if t == "Planning"));
	let err = h.coordinator.select_popup_item("s1", Some("  ".into())).await.unwrap_err();
	assert!(matches!(err, Error::MissingParameter("title")));
}

fn scroll_reply(call: &Call) -> Option<Reply> {
	(call.script.as_deref() == Some("scroll"))
		.then(|| Reply::Value(json!({"found": true, "x": 200.0, "y": 400.0, "scrollTop": 900.0, "direction": 1})))
}

fn ratio(ratio: f64) -> ScrollRequest {
	ScrollRequest {
		scroll_top: None,
		ratio: Some(ratio),
	}
}

fn scroll_expressions(channel: &FakeChannel) -> Vec<String> {
	channel
		.calls()
		.into_iter()
		.filter(|c| c.script.as_deref() == Some("scroll"))
		.map(|c| c.params["expression"].as_str().unwrap_or_default().to_string())
		.collect()
}

#[tokio::test(start_paused = true)]
async fn rapid_scrolls_collapse_into_one_sync_with_the_last_position() {
	let h = harness(scroll_reply);

	for value in [0.25, 0.5, 0.75] {
		h.coordinator.scroll("phone", "s1", ratio(value)).unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;
	}
	tokio::time::sleep(Duration::from_secs(3)).await;

	let sent = scroll_expressions(&h.channel);
	assert_eq!(sent.len(), 1);
	assert!(sent[0].contains("0.75"));
	assert_eq!(h.channel.mouse_events(), vec!["mouseWheel"]);
	let wheel = &h.channel.calls_to(methods::INPUT_DISPATCH_MOUSE_EVENT)[0];
	assert_eq!(wheel.params["deltaY"], 1.0);
	// The forced refresh after the scroll captured once.
	assert_eq!(h.channel.count_script("capture"), 1);
}

#[tokio::test(start_paused = true)]
async fn requests_during_a_sync_are_drained_last_write_wins() {
	let h = harness(|call| match call.script.as_deref() {
		Some("scroll") => Some(Reply::After(
			Duration::from_secs(1),
			json!({"found": true, "x": 0.0, "y": 0.0, "scrollTop": 10.0, "direction": 0}),
		)),
		_ => None,
	});

	h.coordinator.scroll("phone", "s1", ratio(0.1)).unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;
	h.coordinator.scroll("phone", "s1", ratio(0.2)).unwrap();
	h.coordinator.scroll("phone", "s1", ratio(0.3)).unwrap();
	tokio::time::sleep(Duration::from_secs(5)).await;

	let sent = scroll_expressions(&h.channel);
	assert_eq!(sent.len(), 2);
	assert!(sent[0].contains("0.1"));
	assert!(sent[1].contains("0.3"));
	assert!(h.channel.mouse_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scroll_sync_is_scoped_per_client() {
	let h = harness(scroll_reply);
	h.coordinator.scroll("phone", "s1", ratio(0.2)).unwrap();
	h.coordinator.scroll("tablet", "s1", ratio(0.9)).unwrap();
	tokio::time::sleep(Duration::from_secs(3)).await;
	assert_eq!(scroll_expressions(&h.channel).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn scroll_state_is_pruned_for_removed_sessions_and_idle_pairs() {
	let h = harness(scroll_reply);
	let other = session("s2", FakeChannel::new(ide(scroll_reply)));
	h.registry.insert(other);

	h.coordinator.scroll("phone", "s1", ratio(0.2)).unwrap();
	h.coordinator.scroll("phone", "s2", ratio(0.4)).unwrap();
	h.coordinator.scroll("tablet", "s2", ratio(0.6)).unwrap();
	assert_eq!(h.coordinator.scroll_pairs(), 3);

	h.registry.remove("s2");
	assert_eq!(h.coordinator.prune_scroll(), 2);
	assert_eq!(h.coordinator.scroll_pairs(), 1);

	// Still syncing or recently used: kept.
	tokio::time::sleep(Duration::from_secs(3)).await;
	assert_eq!(h.coordinator.prune_scroll(), 0);

	tokio::time::sleep(Tuning::default().scroll_idle_ttl()).await;
	assert_eq!(h.coordinator.prune_scroll(), 1);
	assert_eq!(h.coordinator.scroll_pairs(), 0);
}

#[tokio::test]
async fn scroll_without_position_is_rejected() {
	let h = harness(|_| None);
	let err = h.coordinator.scroll("phone", "s1", ScrollRequest::default()).unwrap_err();
	assert!(matches!(err, Error::MissingParameter(_)));
	assert!(matches!(
		h.coordinator.scroll("phone", "gone", ratio(0.5)),
		Err(Error::SessionNotFound(_))
	));
}

#[tokio::test(start_paused = true)]
async fn watchdog_releases_a_stuck_sync() {
	let runs = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&runs);
	let sync = ScrollSync::new(
		Duration::from_millis(300),
		Duration::from_millis(2500),
		Arc::new(move |_: ScrollRequest| -> BoxFuture<'static, ()> {
			counter.fetch_add(1, Ordering::SeqCst);
			Box::pin(std::future::pending())
		}),
	);

	sync.request(ratio(0.5));
	tokio::time::sleep(Duration::from_millis(400)).await;
	assert!(sync.is_locked());
	sync.request(ratio(0.6));
	assert_eq!(sync.pending(), Some(ratio(0.6)));

	// The stuck first run is dropped, the pending position runs and gets stuck too.
	tokio::time::sleep(Duration::from_millis(2600)).await;
	assert_eq!(runs.load(Ordering::SeqCst), 2);
	tokio::time::sleep(Duration::from_millis(2600)).await;
	assert!(!sync.is_locked());

	sync.request(ratio(0.7));
	tokio::time::sleep(Duration::from_millis(400)).await;
	assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn send_message_clicks_send_button_or_presses_enter() {
	let h = harness(|call| match call.script.as_deref() {
		Some("insert-message") if call.params["expression"].as_str().unwrap_or_default().contains("with button") => {
			Some(Reply::Value(json!({"ok": true, "button": {"x": 300.0, "y": 700.0}})))
		}
		Some("insert-message") => Some(Reply::Value(json!({"ok": true, "button": null}))),
		_ => None,
	});

	h.coordinator.send_message("s1", Some("with button".into())).await.unwrap();
	assert_eq!(h.channel.mouse_events().len(), 3);
	assert!(h.channel.keys().is_empty());
	let insert = &h.channel.calls()[0];
	assert_eq!(insert.params["awaitPromise"], true);

	h.coordinator.send_message("s1", Some("plain".into())).await.unwrap();
	assert_eq!(h.channel.keys(), vec!["keyDown:Enter", "keyUp:Enter"]);

	let calls = h.channel.calls().len();
	let err = h.coordinator.send_message("s1", Some("   ".into())).await.unwrap_err();
	assert!(matches!(err, Error::MissingParameter("message")));
	assert_eq!(h.channel.calls().len(), calls);
}

#[tokio::test]
async fn missing_editor_is_reported() {
	let h = harness(|call| {
		(call.script.as_deref() == Some("insert-message"))
			.then(|| Reply::Value(json!({"ok": false, "reason": "no editor found"})))
	});
	let err = h.coordinator.send_message("s1", Some("hi".into())).await.unwrap_err();
	assert!(matches!(err, Error::ElementNotFound(ref r) if r == "no editor found"));
}

#[tokio::test]
async fn new_conversation_clicks_the_control() {
	let h = harness(|call| (call.script.as_deref() == Some("new-conversation")).then(|| located(20.0, 30.0)));
	h.coordinator.new_conversation("s1").await.unwrap();
	assert_eq!(h.channel.mouse_events().len(), 3);
}

#[tokio::test]
async fn close_session_drops_it_and_broadcasts_the_list() {
	let mut h = harness(|_| None);
	h.coordinator.close_session("s1").await.unwrap();

	assert_eq!(h.channel.calls_to(methods::PAGE_CLOSE).len(), 1);
	assert!(h.registry.is_empty());
	let frame = h.events.try_recv().unwrap();
	let event: Value = serde_json::from_str(&frame).unwrap();
	assert_eq!(event["type"], "cascade_list");
	assert_eq!(event["cascades"], json!([]));
}

#[tokio::test]
async fn kill_all_closes_every_window() {
	let h = harness(|_| None);
	let other = FakeChannel::new(ide(|_| None));
	h.registry.insert(session("s2", Arc::clone(&other)));

	assert_eq!(h.coordinator.kill_all().await, 2);
	assert!(h.registry.is_empty());
	assert!(!h.channel.is_open());
	assert_eq!(other.calls_to(methods::PAGE_CLOSE).len(), 1);
}

#[tokio::test]
async fn dismiss_sends_escape() {
	let h = harness(|_| None);
	h.coordinator.dismiss("s1").await.unwrap();
	assert_eq!(h.channel.keys(), vec!["keyDown:Escape", "keyUp:Escape"]);
}
