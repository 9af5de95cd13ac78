//! Snapshot polling across all sessions.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cascade_protocol::{PushPayload, ServerEvent};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::completion::CompletionDetector;
use crate::error::Result;
use crate::hub::BroadcastHub;
use crate::notify::NotificationDispatcher;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::snapshot::{SnapshotEngine, SnapshotOutcome};

/// How long a pass waits for its sessions by default.
pub const DEFAULT_PASS_BUDGET: Duration = Duration::from_millis(800);

/// Tally of one polling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
	pub accepted: usize,
	pub rejected: usize,
	pub notified: usize,
	pub failed: usize,
	/// Started this pass but still running when the pass budget ran out.
	pub pending: usize,
	/// Not started because the previous poll of the session is still running.
	pub skipped: usize,
}

pub struct Poller {
	registry: Arc<SessionRegistry>,
	hub: Arc<BroadcastHub>,
	engine: SnapshotEngine,
	detector: CompletionDetector,
	notifier: Option<Arc<NotificationDispatcher>>,
	pass_budget: Duration,
	in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Clears a session's in-flight mark when its poll task ends.
struct InFlight {
	set: Arc<Mutex<HashSet<String>>>,
	id: String,
}

impl Drop for InFlight {
	fn drop(&mut self) {
		self.set.lock().remove(&self.id);
	}
}

impl Poller {
	pub fn new(
		registry: Arc<SessionRegistry>,
		hub: Arc<BroadcastHub>,
		engine: SnapshotEngine,
		detector: CompletionDetector,
	) -> Self {
		Self {
			registry,
			hub,
			engine,
			detector,
			notifier: None,
			pass_budget: DEFAULT_PASS_BUDGET,
			in_flight: Arc::new(Mutex::new(HashSet::new())),
		}
	}

	/// Caps how long [`poll_all`](Self::poll_all) waits for slow sessions.
	pub fn with_pass_budget(mut self, budget: Duration) -> Self {
		self.pass_budget = budget;
		self
	}

	pub fn with_notifier(mut self, notifier: Arc<NotificationDispatcher>) -> Self {
		self.notifier = Some(notifier);
		self
	}

	/// Polls every registered session, each in its own task.
	///
	/// A session whose previous poll is still running is skipped, and the pass
	/// stops waiting once the budget runs out. Polls that outlive the pass keep
	/// running and count as pending, so one hung session never delays the
	/// others.
	pub async fn poll_all(self: &Arc<Self>) -> PollOutcome {
		let mut outcome = PollOutcome::default();
		let mut tasks = Vec::new();
		for session in self.registry.list() {
			let id = session.id().to_string();
			if !self.in_flight.lock().insert(id.clone()) {
				debug!(target = "cascade.poll", session = %id, "previous poll still running");
				outcome.skipped += 1;
				continue;
			}
			let guard = InFlight {
				set: Arc::clone(&self.in_flight),
				id,
			};
			let poller = Arc::clone(self);
			tasks.push(tokio::spawn(async move {
				let _guard = guard;
				let result = poller.poll_session(&session).await;
				(session, result)
			}));
		}

		let deadline = Instant::now() + self.pass_budget;
		for task in tasks {
			match tokio::time::timeout_at(deadline, task).await {
				Ok(Ok((_, Ok((SnapshotOutcome::Accepted(_), notified))))) => {
					outcome.accepted += 1;
					outcome.notified += usize::from(notified);
				}
				Ok(Ok((_, Ok((SnapshotOutcome::Rejected { .. }, _))))) => outcome.rejected += 1,
				Ok(Ok((_, Ok((SnapshotOutcome::Unchanged, _))))) => {}
				Ok(Ok((session, Err(e)))) => {
					debug!(target = "cascade.poll", session = %session.id(), error = %e, "poll failed");
					outcome.failed += 1;
				}
				Ok(Err(e)) => {
					debug!(target = "cascade.poll", error = %e, "poll task aborted");
					outcome.failed += 1;
				}
				Err(_) => outcome.pending += 1,
			}
		}
		outcome
	}

	/// Captures one session and applies the result.
	///
	/// Returns the snapshot outcome and whether a completion notification fired.
	pub async fn poll_session(&self, session: &Arc<Session>) -> Result<(SnapshotOutcome, bool)> {
		let Some(raw) = session.capture().await? else {
			return Ok((SnapshotOutcome::Unchanged, false));
		};

		let (outcome, notify) = session.with_state(|state| {
			let outcome = self.engine.accept(&mut state.snapshot, raw);
			let notify = match &outcome {
				SnapshotOutcome::Accepted(snapshot) => {
					self.detector
						.observe(&mut state.completion, snapshot.fingerprint.as_deref(), Instant::now())
				}
				_ => false,
			};
			(outcome, notify)
		});

		match &outcome {
			SnapshotOutcome::Accepted(snapshot) => {
				debug!(target = "cascade.poll", session = %session.id(), length = snapshot.length, "snapshot updated");
				self.hub.broadcast(&ServerEvent::SnapshotUpdate {
					cascade_id: session.id().to_string(),
				});
			}
			SnapshotOutcome::Rejected { stable_count } => {
				debug!(target = "cascade.poll", session = %session.id(), stable_count, "short capture rejected");
			}
			SnapshotOutcome::Unchanged => {}
		}

		if notify {
			self.announce_completion(session);
		}
		Ok((outcome, notify))
	}

	/// Out-of-cadence poll of one session by id. Failures are only logged.
	pub async fn refresh(&self, id: &str) {
		let Some(session) = self.registry.get(id) else {
			return;
		};
		if let Err(e) = self.poll_session(&session).await {
			debug!(target = "cascade.poll", session = %id, error = %e, "forced refresh failed");
		}
	}

	fn announce_completion(&self, session: &Session) {
		let title = session.metadata().chat_title;
		info!(target = "cascade.poll", session = %session.id(), %title, "response complete");
		self.hub.broadcast(&ServerEvent::AiComplete {
			cascade_id: session.id().to_string(),
			title: title.clone(),
		});

		let Some(notifier) = self.notifier.clone() else {
			return;
		};
		let payload = PushPayload {
			title,
			body: "Response complete".to_string(),
			cascade_id: session.id().to_string(),
		};
		tokio::spawn(async move {
			match notifier.dispatch(&payload).await {
				Ok(report) => debug!(target = "cascade.notify", ?report, "push dispatched"),
				Err(e) => debug!(target = "cascade.notify", error = %e, "push dispatch failed"),
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use serde_json::{Value, json};

	use super::*;
	use crate::testing::{FakeChannel, Reply, ide, session};

	fn harness(channel: Arc<FakeChannel>) -> (Arc<Poller>, Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<Arc<str>>) {
		let registry = Arc::new(SessionRegistry::new());
		let hub = Arc::new(BroadcastHub::new());
		let (_, events) = hub.subscribe();
		let session = session("s1", channel);
		registry.insert(Arc::clone(&session));
		let poller = Poller::new(registry, hub, SnapshotEngine::default(), CompletionDetector::default());
		(Arc::new(poller), session, events)
	}

	fn types(events: &mut tokio::sync::mpsc::UnboundedReceiver<Arc<str>>) -> Vec<String> {
		let mut out = Vec::new();
		while let Ok(frame) = events.try_recv() {
			let value: Value = serde_json::from_str(&frame).unwrap();
			out.push(value["type"].as_str().unwrap().to_string());
		}
		out
	}

	/// Channel whose capture returns the html from `pages`, one per poll.
	fn paged(pages: Vec<Value>) -> Arc<FakeChannel> {
		let cursor = AtomicUsize::new(0);
		FakeChannel::new(ide(move |call| {
			(call.script.as_deref() == Some("capture")).then(|| {
				let i = cursor.fetch_add(1, Ordering::SeqCst).min(pages.len() - 1);
				Reply::Value(pages[i].clone())
			})
		}))
	}

	#[tokio::test]
	async fn accepted_snapshot_broadcasts_change_signal() {
		let (poller, session, mut events) = harness(paged(vec![
			json!({"html": "<p>one</p>", "clickMap": []}),
			json!({"html": "<p>one</p>", "clickMap": []}),
		]));

		let outcome = poller.poll_all().await;
		assert_eq!(outcome.accepted, 1);
		assert_eq!(types(&mut events), vec!["snapshot_update"]);
		assert_eq!(session.snapshot().unwrap().html, "<p>one</p>");

		let outcome = poller.poll_all().await;
		assert_eq!(outcome, PollOutcome::default());
		assert!(types(&mut events).is_empty());
	}

	#[tokio::test]
	async fn transient_truncation_keeps_previous_snapshot() {
		let long = "x".repeat(300);
		let (poller, session, mut events) = harness(paged(vec![
			json!({"html": long, "clickMap": []}),
			json!({"html": "", "clickMap": []}),
		]));

		poller.poll_all().await;
		types(&mut events);
		let outcome = poller.poll_all().await;
		assert_eq!(outcome.rejected, 1);
		assert!(types(&mut events).is_empty());
		assert_eq!(session.snapshot().unwrap().length, 300);
		assert_eq!(session.stable_count(), 1);
	}

	#[tokio::test]
	async fn new_fingerprint_announces_completion_once() {
		let (poller, _session, mut events) = harness(paged(vec![
			json!({"html": "<p>a</p>"}),
			json!({"html": "<p>b</p>", "hasFeedback": true, "fingerprint": "3:40:done"}),
			json!({"html": "<p>c</p>", "hasFeedback": true, "fingerprint": "3:40:done"}),
		]));

		poller.poll_all().await;
		let second = poller.poll_all().await;
		let third = poller.poll_all().await;
		assert_eq!(second.notified, 1);
		assert_eq!(third.notified, 0);
		assert_eq!(
			types(&mut events),
			vec!["snapshot_update", "snapshot_update", "ai_complete", "snapshot_update"]
		);
	}

	#[tokio::test]
	async fn failing_session_does_not_block_others() {
		let registry = Arc::new(SessionRegistry::new());
		let hub = Arc::new(BroadcastHub::new());
		registry.insert(session("bad", FakeChannel::new(|_| Reply::Err(cascade_runtime::Error::ChannelClosed))));
		let good = session("good", paged(vec![json!({"html": "<p>ok</p>"})]));
		registry.insert(Arc::clone(&good));

		let poller = Arc::new(Poller::new(registry, hub, SnapshotEngine::default(), CompletionDetector::default()));
		let outcome = poller.poll_all().await;
		assert_eq!(outcome.failed, 1);
		assert_eq!(outcome.accepted, 1);
		assert!(good.snapshot().is_some());
	}

	#[tokio::test]
	async fn missing_chat_container_is_a_noop() {
		let (poller, session, mut events) = harness(FakeChannel::new(ide(|_| None)));
		let outcome = poller.poll_all().await;
		assert_eq!(outcome, PollOutcome::default());
		assert!(session.snapshot().is_none());
		assert!(types(&mut events).is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn hung_session_does_not_stall_the_others() {
		let registry = Arc::new(SessionRegistry::new());
		let hub = Arc::new(BroadcastHub::new());
		let hung = FakeChannel::new(ide(|call| (call.script.as_deref() == Some("capture")).then_some(Reply::Hang)));
		registry.insert(session("hung", Arc::clone(&hung)));
		let counter = AtomicUsize::new(0);
		let good = session(
			"good",
			FakeChannel::new(ide(move |call| {
				(call.script.as_deref() == Some("capture")).then(|| {
					let n = counter.fetch_add(1, Ordering::SeqCst);
					Reply::Value(json!({ "html": format!("<p>{n}</p>") }))
				})
			})),
		);
		registry.insert(Arc::clone(&good));
		let poller = Arc::new(
			Poller::new(registry, hub, SnapshotEngine::default(), CompletionDetector::default())
				.with_pass_budget(Duration::from_secs(1)),
		);

		let first = poller.poll_all().await;
		assert_eq!((first.accepted, first.pending, first.skipped), (1, 1, 0));
		for _ in 0..4 {
			let next = poller.poll_all().await;
			assert_eq!((next.accepted, next.pending, next.skipped), (1, 0, 1));
		}

		assert_eq!(good.snapshot().unwrap().html, "<p>4</p>");
		assert_eq!(hung.count_script("capture"), 1);
	}
}
