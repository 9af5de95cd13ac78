//! Single-flight, last-write-wins scroll synchronization.

use std::sync::Arc;
use std::time::Duration;

use cascade_protocol::ScrollRequest;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Applies one scroll position to the IDE.
pub type SyncFn = Arc<dyn Fn(ScrollRequest) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug)]
struct State {
	/// A sync is in flight.
	locked: bool,
	/// Latest position not yet sent. Older values are overwritten.
	pending: Option<ScrollRequest>,
	/// Bumped on every request; a debounce timer only fires for the latest one.
	generation: u64,
	/// Last request or finished sync.
	touched: Instant,
}

impl State {
	fn new() -> Self {
		Self {
			locked: false,
			pending: None,
			generation: 0,
			touched: Instant::now(),
		}
	}
}

struct Inner {
	state: Mutex<State>,
	debounce: Duration,
	watchdog: Duration,
	sync: SyncFn,
}

/// Scroll state for one client and session pair.
///
/// Requests are debounced. At most one sync runs at a time; requests that
/// arrive meanwhile only replace the pending position, which is drained when
/// the running sync finishes. A sync that outlives the watchdog is dropped and
/// the lock released.
#[derive(Clone)]
pub struct ScrollSync {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for ScrollSync {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ScrollSync").field("state", &*self.inner.state.lock()).finish()
	}
}

impl ScrollSync {
	pub fn new(debounce: Duration, watchdog: Duration, sync: SyncFn) -> Self {
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(State::new()),
				debounce,
				watchdog,
				sync,
			}),
		}
	}

	pub fn is_locked(&self) -> bool {
		self.inner.state.lock().locked
	}

	pub fn pending(&self) -> Option<ScrollRequest> {
		self.inner.state.lock().pending
	}

	/// Nothing running or queued, and untouched for at least `ttl`.
	pub fn is_idle(&self, ttl: Duration) -> bool {
		let state = self.inner.state.lock();
		!state.locked && state.pending.is_none() && state.touched.elapsed() >= ttl
	}

	/// Records `request` as the latest wanted position.
	pub fn request(&self, request: ScrollRequest) {
		let generation = {
			let mut state = self.inner.state.lock();
			state.pending = Some(request);
			state.generation += 1;
			state.touched = Instant::now();
			if state.locked {
				return;
			}
			state.generation
		};

		let inner = Arc::clone(&self.inner);
		tokio::spawn(async move {
			tokio::time::sleep(inner.debounce).await;
			let first = {
				let mut state = inner.state.lock();
				if state.generation != generation || state.locked {
					return;
				}
				let Some(first) = state.pending.take() else {
					return;
				};
				state.locked = true;
				first
			};
			inner.run(first).await;
		});
	}
}

impl Inner {
	async fn run(&self, first: ScrollRequest) {
		let mut next = first;
		loop {
			if tokio::time::timeout(self.watchdog, (self.sync)(next)).await.is_err() {
				warn!(target = "cascade.interact", "scroll sync exceeded watchdog, releasing lock");
			}
			let mut state = self.state.lock();
			match state.pending.take() {
				Some(pending) => {
					debug!(target = "cascade.interact", "draining pending scroll position");
					next = pending;
				}
				None => {
					state.locked = false;
					state.touched = Instant::now();
					return;
				}
			}
		}
	}
}
