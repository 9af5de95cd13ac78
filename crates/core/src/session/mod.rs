//! [`Session`]: one attached IDE window.

mod eval;
mod input;

use std::sync::Arc;

use cascade_protocol::{Cascade, QuotaInfo, Snapshot};
use cascade_runtime::ProtocolChannel;
use parking_lot::Mutex;

use crate::completion::CompletionState;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotSlot;

/// Display metadata reported by the last successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
	pub chat_title: String,
	pub active: bool,
	pub quota: Option<QuotaInfo>,
}

impl Default for Metadata {
	fn default() -> Self {
		Self {
			chat_title: "Agent".to_string(),
			active: false,
			quota: None,
		}
	}
}

/// Mutable per-session state, touched by the poll loop and by discovery.
#[derive(Debug, Default)]
pub struct SessionState {
	pub metadata: Metadata,
	pub snapshot: SnapshotSlot,
	pub completion: CompletionState,
	pub css: Option<Arc<str>>,
}

/// A debug connection to one chat-capable IDE window plus its tracked state.
///
/// The id is derived from the target's socket URL, so a window that comes
/// back under a new socket is a different session.
pub struct Session {
	id: String,
	window_title: String,
	ws_url: String,
	channel: Arc<dyn ProtocolChannel>,
	root_context: Mutex<Option<i64>>,
	state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("window_title", &self.window_title)
			.field("root_context", &*self.root_context.lock())
			.finish()
	}
}

impl Session {
	pub fn new(
		id: impl Into<String>,
		window_title: impl Into<String>,
		ws_url: impl Into<String>,
		channel: Arc<dyn ProtocolChannel>,
	) -> Self {
		Self {
			id: id.into(),
			window_title: window_title.into(),
			ws_url: ws_url.into(),
			channel,
			root_context: Mutex::new(None),
			state: Mutex::new(SessionState::default()),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn window_title(&self) -> &str {
		&self.window_title
	}

	pub fn ws_url(&self) -> &str {
		&self.ws_url
	}

	pub fn channel(&self) -> &Arc<dyn ProtocolChannel> {
		&self.channel
	}

	pub fn is_open(&self) -> bool {
		self.channel.is_open()
	}

	/// Closes the debug connection without touching the IDE window.
	pub fn disconnect(&self) {
		self.channel.close();
	}

	/// Context the chat panel was last found in.
	pub fn root_context(&self) -> Option<i64> {
		*self.root_context.lock()
	}

	pub(crate) fn set_root_context(&self, context: Option<i64>) {
		*self.root_context.lock() = context;
	}

	pub fn metadata(&self) -> Metadata {
		self.state.lock().metadata.clone()
	}

	/// Stores fresh metadata. Returns the new quota if it differs from the previous one.
	pub(crate) fn update_metadata(&self, metadata: Metadata) -> Option<QuotaInfo> {
		let mut state = self.state.lock();
		let quota_changed = metadata.quota.is_some() && state.metadata.quota != metadata.quota;
		state.metadata = metadata;
		if quota_changed { state.metadata.quota.clone() } else { None }
	}

	/// Public projection used in list broadcasts.
	pub fn cascade(&self) -> Cascade {
		let metadata = self.metadata();
		Cascade {
			id: self.id.clone(),
			title: metadata.chat_title,
			window: self.window_title.clone(),
			active: metadata.active,
			quota: metadata.quota,
		}
	}

	pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
		self.state.lock().snapshot.current.clone()
	}

	/// Number of captures rejected as transient truncation.
	pub fn stable_count(&self) -> u64 {
		self.state.lock().snapshot.stable_count
	}

	pub fn css(&self) -> Option<Arc<str>> {
		self.state.lock().css.clone()
	}

	/// Stores a stylesheet capture. Returns true when it differs from the previous one.
	pub(crate) fn set_css(&self, css: String) -> bool {
		let mut state = self.state.lock();
		if state.css.as_deref() == Some(css.as_str()) {
			return false;
		}
		state.css = Some(Arc::from(css));
		true
	}

	pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
		f(&mut self.state.lock())
	}

	/// Resolves a click index against the current snapshot's click map.
	pub fn click_path(&self, index: usize) -> Result<String> {
		let state = self.state.lock();
		let snapshot = state
			.snapshot
			.current
			.as_ref()
			.ok_or_else(|| Error::NoSnapshot(self.id.clone()))?;
		snapshot.click_map.get(index).cloned().ok_or(Error::InvalidIndex {
			index,
			len: snapshot.click_map.len(),
		})
	}
}
