//! Session selection and change-driven snapshot fetching for a mirror.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cascade_protocol::{ServerEvent, Snapshot};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use super::view::{ApplyOutcome, MirrorHost, MirrorView};
use crate::error::Result;

/// Where a mirror fetches full snapshots from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
	/// `None` when the session has no snapshot yet or is unknown.
	async fn fetch(&self, id: &str) -> Result<Option<Snapshot>>;
}

/// Fetches snapshots from a running bridge server.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
	client: reqwest::Client,
	base_url: String,
	token: Option<String>,
}

impl HttpSnapshotSource {
	pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
		Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			token: None,
		}
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
	async fn fetch(&self, id: &str) -> Result<Option<Snapshot>> {
		let mut request = self.client.get(format!("{}/snapshot/{id}", self.base_url));
		if let Some(token) = &self.token {
			request = request.bearer_auth(token);
		}
		let response = request.send().await?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		Ok(Some(response.error_for_status()?.json().await?))
	}
}

struct State<H> {
	active: Option<String>,
	view: MirrorView,
	host: H,
	/// Sequence number of the newest request whose response was applied.
	applied: u64,
}

/// Keeps one [`MirrorView`] in sync with the selected session.
///
/// Every selection bumps a generation counter. A fetch that completes after
/// its generation was superseded is dropped without touching the view.
/// Within a generation, each request takes a sequence number and a response
/// older than the last applied one is dropped, so overlapping change fetches
/// never roll the view back.
pub struct MirrorClient<H> {
	source: Arc<dyn SnapshotSource>,
	state: Arc<Mutex<State<H>>>,
	generation: Arc<AtomicU64>,
	sequence: AtomicU64,
	in_flight: Mutex<Vec<AbortHandle>>,
}

impl<H: MirrorHost + Send + 'static> MirrorClient<H> {
	pub fn new(source: Arc<dyn SnapshotSource>, host: H) -> Self {
		Self {
			source,
			state: Arc::new(Mutex::new(State {
				active: None,
				view: MirrorView::new(),
				host,
				applied: 0,
			})),
			generation: Arc::new(AtomicU64::new(0)),
			sequence: AtomicU64::new(0),
			in_flight: Mutex::new(Vec::new()),
		}
	}

	pub fn active(&self) -> Option<String> {
		self.state.lock().active.clone()
	}

	pub fn with_view<R>(&self, f: impl FnOnce(&MirrorView) -> R) -> R {
		f(&self.state.lock().view)
	}

	pub fn with_host<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
		f(&mut self.state.lock().host)
	}

	/// Switches to session `id`, cancelling any fetch for the previous one.
	pub fn select(&self, id: &str) -> JoinHandle<()> {
		self.cancel_in_flight();
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		{
			let mut state = self.state.lock();
			state.active = Some(id.to_string());
			state.view.reset();
		}
		debug!(target = "cascade.mirror", session = %id, generation, "session selected");
		self.fetch(id, generation)
	}

	/// Handles a change signal. Signals for other sessions are ignored.
	pub fn on_change(&self, id: &str) -> Option<JoinHandle<()>> {
		if self.state.lock().active.as_deref() != Some(id) {
			return None;
		}
		Some(self.fetch(id, self.generation.load(Ordering::SeqCst)))
	}

	/// Reacts to a push-channel event.
	///
	/// A cascade list that no longer contains the active session (or arrives
	/// before any selection) selects the first listed session.
	pub fn handle_event(&self, event: &ServerEvent) -> Option<JoinHandle<()>> {
		match event {
			ServerEvent::SnapshotUpdate { cascade_id } => self.on_change(cascade_id),
			ServerEvent::CascadeList { cascades } => {
				let active = self.active();
				if active.is_some_and(|id| cascades.iter().any(|c| c.id == id)) {
					return None;
				}
				match cascades.first() {
					Some(first) => Some(self.select(&first.id)),
					None => {
						self.clear();
						None
					}
				}
			}
			_ => None,
		}
	}

	fn cancel_in_flight(&self) {
		for handle in self.in_flight.lock().drain(..) {
			handle.abort();
		}
	}

	fn clear(&self) {
		self.cancel_in_flight();
		self.generation.fetch_add(1, Ordering::SeqCst);
		let mut state = self.state.lock();
		state.active = None;
		state.view.reset();
	}

	fn fetch(&self, id: &str, generation: u64) -> JoinHandle<()> {
		let source = Arc::clone(&self.source);
		let state = Arc::clone(&self.state);
		let current = Arc::clone(&self.generation);
		let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
		let id = id.to_string();

		let handle = tokio::spawn(async move {
			let snapshot = match source.fetch(&id).await {
				Ok(Some(snapshot)) => snapshot,
				Ok(None) => {
					debug!(target = "cascade.mirror", session = %id, "no snapshot yet");
					return;
				}
				Err(e) => {
					warn!(target = "cascade.mirror", session = %id, error = %e, "snapshot fetch failed");
					return;
				}
			};

			let mut guard = state.lock();
			let state = &mut *guard;
			if current.load(Ordering::SeqCst) != generation || state.active.as_deref() != Some(id.as_str()) {
				debug!(target = "cascade.mirror", session = %id, generation, "stale fetch dropped");
				return;
			}
			if sequence < state.applied {
				debug!(target = "cascade.mirror", session = %id, sequence, applied = state.applied, "superseded fetch dropped");
				return;
			}
			state.applied = sequence;
			if let ApplyOutcome::Patched { stats, .. } = state.view.apply(&snapshot, &mut state.host) {
				debug!(target = "cascade.mirror", session = %id, kept = stats.kept, "mirror updated");
			}
		});

		let mut in_flight = self.in_flight.lock();
		in_flight.retain(|h| !h.is_finished());
		in_flight.push(handle.abort_handle());
		handle
	}
}

#[cfg(test)]
mod tests;
