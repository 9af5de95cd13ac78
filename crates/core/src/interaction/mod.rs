//! Interaction passthrough: client gestures turned into native input.
//!
//! Every gesture resolves against live session state first and reports
//! client errors before any protocol traffic. Clicks are always dispatched as
//! native pointer events at live coordinates, never as script-invoked clicks.

mod popup;
mod scroll;

use std::collections::HashSet;
use std::sync::Arc;

use cascade_protocol::{ScrollRequest, ServerEvent};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, join_all};
use tracing::{debug, info};

pub use self::scroll::{ScrollSync, SyncFn};
use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::poller::Poller;
use crate::registry::SessionRegistry;
use crate::scripts::{self, ElementTarget, InsertResult, ScrollResult};
use crate::session::Session;
use crate::tuning::Tuning;

pub struct Coordinator {
	registry: Arc<SessionRegistry>,
	poller: Arc<Poller>,
	hub: Arc<BroadcastHub>,
	tuning: Tuning,
	/// Keyed by (client, session).
	scroll: DashMap<(String, String), ScrollSync>,
}

impl Coordinator {
	pub fn new(registry: Arc<SessionRegistry>, poller: Arc<Poller>, hub: Arc<BroadcastHub>, tuning: Tuning) -> Self {
		Self {
			registry,
			poller,
			hub,
			tuning,
			scroll: DashMap::new(),
		}
	}

	fn session(&self, id: &str) -> Result<Arc<Session>> {
		self.registry.get(id).ok_or_else(|| Error::SessionNotFound(id.to_string()))
	}

	/// Scrolls the element at `path` into view and returns its fresh center.
	async fn locate(&self, session: &Session, path: &str) -> Result<ElementTarget> {
		let target: ElementTarget = session.evaluate_typed(&scripts::locate(path)).await?;
		if !target.found {
			return Err(Error::ElementNotFound(path.to_string()));
		}
		Ok(target)
	}

	/// Polls `id` again shortly, outside the regular cadence.
	fn schedule_refresh(&self, id: &str) {
		let poller = Arc::clone(&self.poller);
		let delay = self.tuning.scroll_refresh_delay();
		let id = id.to_string();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			poller.refresh(&id).await;
		});
	}

	/// Clicks the element behind `index` of the session's current click map.
	pub async fn click(&self, id: &str, index: Option<usize>) -> Result<()> {
		let index = index.ok_or(Error::MissingParameter("index"))?;
		let session = self.session(id)?;
		let path = session.click_path(index)?;

		let target = self.locate(&session, &path).await?;
		session.click_at(target.x, target.y).await?;
		debug!(
			target = "cascade.interact",
			session = %id,
			index,
			text = target.text.as_deref().unwrap_or_default(),
			"clicked"
		);
		self.schedule_refresh(id);
		Ok(())
	}

	/// Closes whatever overlay is open in the IDE.
	pub async fn dismiss(&self, id: &str) -> Result<()> {
		let session = self.session(id)?;
		session.press_escape().await?;
		self.schedule_refresh(id);
		Ok(())
	}

	/// Queues a scroll position for `id` on behalf of `client`.
	///
	/// Returns once the request is recorded; the sync runs in the background.
	pub fn scroll(&self, client: &str, id: &str, request: ScrollRequest) -> Result<()> {
		if request.scroll_top.is_none() && request.ratio.is_none() {
			return Err(Error::MissingParameter("scrollTop or ratio"));
		}
		self.session(id)?;

		let key = (client.to_string(), id.to_string());
		let sync = self
			.scroll
			.entry(key)
			.or_insert_with(|| self.scroll_sync(id))
			.clone();
		sync.request(request);
		Ok(())
	}

	fn scroll_sync(&self, id: &str) -> ScrollSync {
		let registry = Arc::clone(&self.registry);
		let poller = Arc::clone(&self.poller);
		let tuning = self.tuning;
		let id = id.to_string();
		let sync: SyncFn = Arc::new(move |request: ScrollRequest| -> BoxFuture<'static, ()> {
			let registry = Arc::clone(&registry);
			let poller = Arc::clone(&poller);
			let id = id.clone();
			Box::pin(async move {
				if let Err(e) = apply_scroll(&registry, &id, request, &tuning).await {
					debug!(target = "cascade.interact", session = %id, error = %e, "scroll sync failed");
					return;
				}
				tokio::time::sleep(tuning.scroll_refresh_delay()).await;
				poller.refresh(&id).await;
			})
		});
		ScrollSync::new(self.tuning.scroll_debounce(), self.tuning.scroll_watchdog(), sync)
	}

	/// Drops scroll state of sessions that left the registry, and of pairs
	/// that have been idle longer than the configured TTL. Returns how many
	/// entries were removed.
	pub fn prune_scroll(&self) -> usize {
		let live: HashSet<String> = self.registry.ids().into_iter().collect();
		let ttl = self.tuning.scroll_idle_ttl();
		let before = self.scroll.len();
		self.scroll
			.retain(|(_, session), sync| live.contains(session) && !sync.is_idle(ttl));
		let removed = before.saturating_sub(self.scroll.len());
		if removed > 0 {
			debug!(target = "cascade.interact", removed, "pruned scroll state");
		}
		removed
	}

	/// Number of tracked (client, session) scroll pairs.
	pub fn scroll_pairs(&self) -> usize {
		self.scroll.len()
	}

	/// Types `message` into the IDE editor and submits it.
	pub async fn send_message(&self, id: &str, message: Option<String>) -> Result<()> {
		let message = message
			.filter(|m| !m.trim().is_empty())
			.ok_or(Error::MissingParameter("message"))?;
		let session = self.session(id)?;

		let value = session.evaluate_awaiting(&scripts::insert_message(&message)).await?;
		let inserted: InsertResult = serde_json::from_value(value)?;
		if !inserted.ok {
			return Err(Error::ElementNotFound(
				inserted.reason.unwrap_or_else(|| "chat editor".to_string()),
			));
		}
		match inserted.button {
			Some(button) => session.click_at(button.x, button.y).await?,
			None => session.press_enter().await?,
		}
		info!(target = "cascade.interact", session = %id, chars = message.chars().count(), "message sent");
		self.schedule_refresh(id);
		Ok(())
	}

	pub async fn new_conversation(&self, id: &str) -> Result<()> {
		let session = self.session(id)?;
		let target: ElementTarget = session.evaluate_typed(&scripts::new_conversation()).await?;
		if !target.found {
			return Err(Error::ElementNotFound("new conversation control".to_string()));
		}
		session.click_at(target.x, target.y).await?;
		self.schedule_refresh(id);
		Ok(())
	}

	/// Closes the IDE window behind `id` and forgets the session.
	pub async fn close_session(&self, id: &str) -> Result<()> {
		let session = self.session(id)?;
		if let Err(e) = session.close_target().await {
			debug!(target = "cascade.interact", session = %id, error = %e, "page close failed");
		}
		self.registry.remove(id);
		self.scroll.retain(|(_, session), _| session != id);
		info!(target = "cascade.interact", session = %id, "closed cascade");
		self.hub.broadcast(&ServerEvent::CascadeList {
			cascades: self.registry.cascades(),
		});
		Ok(())
	}

	/// Closes every IDE window and clears the registry. Returns how many were closed.
	pub async fn kill_all(&self) -> usize {
		let sessions = self.registry.clear();
		join_all(sessions.iter().map(|session| async move {
			if let Err(e) = session.close_target().await {
				debug!(target = "cascade.interact", session = %session.id(), error = %e, "page close failed");
			}
		}))
		.await;
		self.scroll.clear();
		info!(target = "cascade.interact", count = sessions.len(), "closed all cascades");
		self.hub.broadcast(&ServerEvent::CascadeList { cascades: Vec::new() });
		sessions.len()
	}
}

/// Scrolls the chat's scrollable container and nudges the wheel so the IDE keeps the position.
async fn apply_scroll(registry: &SessionRegistry, id: &str, request: ScrollRequest, tuning: &Tuning) -> Result<()> {
	let session = registry.get(id).ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
	let result: ScrollResult = session
		.evaluate_typed(&scripts::scroll(request, tuning.scroll_search_depth))
		.await?;
	if !result.found {
		return Err(Error::ElementNotFound("scrollable chat container".to_string()));
	}
	if result.direction != 0.0 {
		session.wheel_at(result.x, result.y, result.direction.signum()).await?;
	}
	debug!(target = "cascade.interact", session = %id, scroll_top = result.scroll_top, "scrolled");
	Ok(())
}

#[cfg(test)]
mod tests;
