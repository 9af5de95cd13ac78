//! Owned registry of live sessions.
//!
//! Discovery, the poller and the coordinator all receive the same
//! `Arc<SessionRegistry>`; nothing reaches it through global state.

use std::sync::Arc;

use cascade_protocol::Cascade;
use parking_lot::RwLock;

use crate::session::Session;

#[derive(Debug, Default)]
pub struct SessionRegistry {
	/// Kept in discovery order.
	sessions: RwLock<Vec<Arc<Session>>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, id: &str) -> Option<Arc<Session>> {
		self.sessions.read().iter().find(|s| s.id() == id).cloned()
	}

	pub fn list(&self) -> Vec<Arc<Session>> {
		self.sessions.read().clone()
	}

	pub fn ids(&self) -> Vec<String> {
		self.sessions.read().iter().map(|s| s.id().to_string()).collect()
	}

	pub fn cascades(&self) -> Vec<Cascade> {
		self.sessions.read().iter().map(|s| s.cascade()).collect()
	}

	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}

	/// Session a single-view client should show: the focused window, else the first.
	pub fn preferred(&self) -> Option<Arc<Session>> {
		let sessions = self.sessions.read();
		sessions
			.iter()
			.find(|s| s.metadata().active)
			.or_else(|| sessions.first())
			.cloned()
	}

	/// Inserts `session`, replacing any session with the same id.
	///
	/// The replaced session is returned still connected; the caller decides
	/// whether to close it.
	pub fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
		let mut sessions = self.sessions.write();
		match sessions.iter_mut().find(|s| s.id() == session.id()) {
			Some(slot) => Some(std::mem::replace(slot, session)),
			None => {
				sessions.push(session);
				None
			}
		}
	}

	/// Replaces the whole membership and disconnects every session that did not survive.
	///
	/// Returns the ids that left the registry.
	pub fn replace_all(&self, next: Vec<Arc<Session>>) -> Vec<String> {
		let previous = std::mem::replace(&mut *self.sessions.write(), next.clone());

		let mut removed = Vec::new();
		for old in previous {
			if next.iter().any(|s| Arc::ptr_eq(s, &old)) {
				continue;
			}
			old.disconnect();
			if !next.iter().any(|s| s.id() == old.id()) {
				removed.push(old.id().to_string());
			}
		}
		removed
	}

	pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
		let mut sessions = self.sessions.write();
		let position = sessions.iter().position(|s| s.id() == id)?;
		Some(sessions.remove(position))
	}

	pub fn clear(&self) -> Vec<Arc<Session>> {
		std::mem::take(&mut *self.sessions.write())
	}
}
