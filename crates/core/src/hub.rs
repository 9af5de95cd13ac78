//! Fan-out of server events to connected mirror clients.
//!
//! Each client owns an unbounded queue drained by its own socket task, so a
//! slow client only grows its own queue and never delays the others. Events
//! are serialized once per broadcast.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cascade_protocol::ServerEvent;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type ClientId = u64;

#[derive(Debug, Default)]
pub struct BroadcastHub {
	clients: DashMap<ClientId, mpsc::UnboundedSender<Arc<str>>>,
	next_id: AtomicU64,
}

impl BroadcastHub {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a client and returns its id and event queue.
	pub fn subscribe(&self) -> (ClientId, mpsc::UnboundedReceiver<Arc<str>>) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
		let (tx, rx) = mpsc::unbounded_channel();
		self.clients.insert(id, tx);
		debug!(target = "cascade.hub", client = id, "client subscribed");
		(id, rx)
	}

	pub fn unsubscribe(&self, id: ClientId) {
		if self.clients.remove(&id).is_some() {
			debug!(target = "cascade.hub", client = id, "client unsubscribed");
		}
	}

	pub fn client_count(&self) -> usize {
		self.clients.len()
	}

	/// Queues `event` for every client. Returns how many clients received it.
	///
	/// Clients whose queue is closed are dropped.
	pub fn broadcast(&self, event: &ServerEvent) -> usize {
		let Some(frame) = encode(event) else {
			return 0;
		};

		let mut gone = Vec::new();
		let mut delivered = 0;
		for entry in self.clients.iter() {
			if entry.value().send(Arc::clone(&frame)).is_ok() {
				delivered += 1;
			} else {
				gone.push(*entry.key());
			}
		}
		for id in gone {
			self.clients.remove(&id);
		}
		delivered
	}

	/// Queues `event` for a single client.
	pub fn send_to(&self, id: ClientId, event: &ServerEvent) -> bool {
		let Some(frame) = encode(event) else {
			return false;
		};
		match self.clients.get(&id) {
			Some(tx) => tx.send(frame).is_ok(),
			None => false,
		}
	}
}

fn encode(event: &ServerEvent) -> Option<Arc<str>> {
	match serde_json::to_string(event) {
		Ok(text) => Some(Arc::from(text)),
		Err(e) => {
			warn!(target = "cascade.hub", error = %e, "failed to encode event");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn update(id: &str) -> ServerEvent {
		ServerEvent::SnapshotUpdate { cascade_id: id.into() }
	}

	#[test]
	fn broadcast_reaches_every_client() {
		let hub = BroadcastHub::new();
		let (_, mut a) = hub.subscribe();
		let (_, mut b) = hub.subscribe();

		assert_eq!(hub.broadcast(&update("s1")), 2);
		assert_eq!(&*a.try_recv().unwrap(), r#"{"type":"snapshot_update","cascadeId":"s1"}"#);
		assert!(b.try_recv().is_ok());
	}

	#[test]
	fn closed_client_is_pruned_without_affecting_others() {
		let hub = BroadcastHub::new();
		let (_, dead) = hub.subscribe();
		let (_, mut alive) = hub.subscribe();
		drop(dead);

		assert_eq!(hub.broadcast(&update("s1")), 1);
		assert_eq!(hub.client_count(), 1);
		assert!(alive.try_recv().is_ok());
	}

	#[test]
	fn send_to_targets_one_client() {
		let hub = BroadcastHub::new();
		let (first, mut a) = hub.subscribe();
		let (_, mut b) = hub.subscribe();

		assert!(hub.send_to(first, &ServerEvent::CascadeList { cascades: vec![] }));
		assert!(a.try_recv().is_ok());
		assert!(b.try_recv().is_err());

		hub.unsubscribe(first);
		assert!(!hub.send_to(first, &update("s1")));
	}
}
