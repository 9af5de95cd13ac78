use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use cascade_protocol::Cascade;

use super::*;
use crate::mirror::layout::ScrollMetrics;

#[derive(Default)]
struct RecordingHost {
	scrolled: Vec<f64>,
}

impl MirrorHost for RecordingHost {
	fn scroll_metrics(&self) -> ScrollMetrics {
		ScrollMetrics::default()
	}

	fn set_scroll_top(&mut self, top: f64) {
		self.scrolled.push(top);
	}

	fn input_text(&mut self, _text: &str) {}
}

/// Serves a fixed snapshot per session after a per-session delay. Queued
/// replies take precedence, one per fetch.
#[derive(Default)]
struct FakeSource {
	snapshots: Mutex<HashMap<String, (Duration, Snapshot)>>,
	queued: Mutex<VecDeque<(Duration, Snapshot)>>,
	fetches: Mutex<Vec<String>>,
}

fn snapshot(id: &str, html: &str) -> Snapshot {
	Snapshot {
		html: html.to_string(),
		click_map: Vec::new(),
		has_feedback: false,
		fingerprint: None,
		hash: format!("{id}:{html}"),
		length: html.len(),
	}
}

impl FakeSource {
	fn serve(&self, id: &str, delay_ms: u64, html: &str) {
		self.snapshots
			.lock()
			.insert(id.to_string(), (Duration::from_millis(delay_ms), snapshot(id, html)));
	}

	fn queue(&self, id: &str, delay_ms: u64, html: &str) {
		self.queued
			.lock()
			.push_back((Duration::from_millis(delay_ms), snapshot(id, html)));
	}

	fn fetches(&self) -> Vec<String> {
		self.fetches.lock().clone()
	}
}

#[async_trait]
impl SnapshotSource for FakeSource {
	async fn fetch(&self, id: &str) -> Result<Option<Snapshot>> {
		self.fetches.lock().push(id.to_string());
		let queued = self.queued.lock().pop_front();
		let entry = queued.or_else(|| self.snapshots.lock().get(id).cloned());
		let Some((delay, snapshot)) = entry else {
			return Ok(None);
		};
		tokio::time::sleep(delay).await;
		Ok(Some(snapshot))
	}
}

fn client(source: &Arc<FakeSource>) -> MirrorClient<RecordingHost> {
	MirrorClient::new(Arc::clone(source) as Arc<dyn SnapshotSource>, RecordingHost::default())
}

fn html(client: &MirrorClient<RecordingHost>) -> String {
	client.with_view(|view| view.root().to_html())
}

fn cascade(id: &str) -> Cascade {
	Cascade {
		id: id.into(),
		title: "Agent".into(),
		window: "proj".into(),
		active: false,
		quota: None,
	}
}

#[tokio::test(start_paused = true)]
async fn select_fetches_and_applies() {
	let source = Arc::new(FakeSource::default());
	source.serve("a", 10, "<p>alpha</p>");
	let client = client(&source);

	client.select("a").await.unwrap();
	assert_eq!(html(&client), r#"<div id="chat-viewport"><p>alpha</p></div>"#);
	assert_eq!(client.active().as_deref(), Some("a"));
	// First load anchors.
	assert_eq!(client.with_host(|h| h.scrolled.len()), 1);
}

#[tokio::test(start_paused = true)]
async fn switching_sessions_discards_the_slow_fetch() {
	let source = Arc::new(FakeSource::default());
	source.serve("slow", 500, "<p>slow</p>");
	source.serve("fast", 10, "<p>fast</p>");
	let client = client(&source);

	let slow = client.select("slow");
	tokio::time::sleep(Duration::from_millis(50)).await;
	client.select("fast").await.unwrap();

	assert!(slow.await.unwrap_err().is_cancelled());
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert_eq!(html(&client), r#"<div id="chat-viewport"><p>fast</p></div>"#);
}

#[tokio::test(start_paused = true)]
async fn stale_generation_never_writes() {
	let source = Arc::new(FakeSource::default());
	source.serve("a", 300, "<p>old</p>");
	let client = client(&source);

	client.select("a").await.unwrap();
	source.serve("a", 300, "<p>new</p>");
	// A change fetch started before a reselect of the same session must not land.
	let change = client.on_change("a").unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	client.clear();
	let _ = change.await;

	assert_eq!(html(&client), r#"<div id="chat-viewport"></div>"#);
	assert_eq!(client.active(), None);
}

#[tokio::test(start_paused = true)]
async fn change_signals_for_other_sessions_are_ignored() {
	let source = Arc::new(FakeSource::default());
	source.serve("a", 0, "<p>a</p>");
	let client = client(&source);
	client.select("a").await.unwrap();

	assert!(client.on_change("b").is_none());
	let event = ServerEvent::SnapshotUpdate { cascade_id: "a".into() };
	client.handle_event(&event).unwrap().await.unwrap();
	assert_eq!(source.fetches(), vec!["a", "a"]);
}

#[tokio::test(start_paused = true)]
async fn cascade_list_selects_first_when_active_disappears() {
	let source = Arc::new(FakeSource::default());
	source.serve("a", 0, "<p>a</p>");
	source.serve("b", 0, "<p>b</p>");
	let client = client(&source);

	let list = ServerEvent::CascadeList {
		cascades: vec![cascade("a"), cascade("b")],
	};
	client.handle_event(&list).unwrap().await.unwrap();
	assert_eq!(client.active().as_deref(), Some("a"));
	assert!(client.handle_event(&list).is_none());

	let shrunk = ServerEvent::CascadeList {
		cascades: vec![cascade("b")],
	};
	client.handle_event(&shrunk).unwrap().await.unwrap();
	assert_eq!(client.active().as_deref(), Some("b"));
	assert_eq!(html(&client), r#"<div id="chat-viewport"><p>b</p></div>"#);

	assert!(client.handle_event(&ServerEvent::CascadeList { cascades: vec![] }).is_none());
	assert_eq!(client.active(), None);
}

#[tokio::test(start_paused = true)]
async fn missing_snapshot_leaves_view_empty() {
	let source = Arc::new(FakeSource::default());
	let client = client(&source);
	client.select("nothing").await.unwrap();
	assert_eq!(client.with_view(|v| v.last_hash().map(str::to_string)), None);
}

#[tokio::test(start_paused = true)]
async fn slow_older_change_fetch_does_not_overwrite_newer_one() {
	let source = Arc::new(FakeSource::default());
	source.queue("a", 0, "<p>v0</p>");
	source.queue("a", 100, "<p>v1</p>");
	source.queue("a", 10, "<p>v2</p>");
	let client = client(&source);

	client.select("a").await.unwrap();
	let older = client.on_change("a").unwrap();
	let newer = client.on_change("a").unwrap();
	newer.await.unwrap();
	assert_eq!(html(&client), r#"<div id="chat-viewport"><p>v2</p></div>"#);

	older.await.unwrap();
	assert_eq!(html(&client), r#"<div id="chat-viewport"><p>v2</p></div>"#);
	assert_eq!(source.fetches().len(), 3);
}
