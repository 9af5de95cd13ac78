//! Popup extraction and item selection.
//!
//! Overlays the IDE opens on click are extracted into structured items rather
//! than mirrored. Clicking a trigger may toggle an already open overlay shut,
//! so an empty extraction is retried exactly once.

use cascade_protocol::PopupItem;
use tracing::debug;

use super::Coordinator;
use crate::error::{Error, Result};
use crate::scripts::{self, ElementTarget, PopupItems};
use crate::session::Session;

impl Coordinator {
	/// Clicks the trigger behind `index` and returns the items of the overlay it opened.
	///
	/// Any failure after the click sends Escape so no overlay is left open.
	pub async fn open_popup(&self, id: &str, index: Option<usize>) -> Result<Vec<PopupItem>> {
		let index = index.ok_or(Error::MissingParameter("index"))?;
		let session = self.session(id)?;
		let path = session.click_path(index)?;

		match self.extract_popup(&session, &path).await {
			Ok(items) => {
				debug!(target = "cascade.interact", session = %id, index, items = items.len(), "popup extracted");
				Ok(items)
			}
			Err(e) => {
				if let Err(cleanup) = session.press_escape().await {
					debug!(target = "cascade.interact", session = %id, error = %cleanup, "escape after failed extraction");
				}
				Err(e)
			}
		}
	}

	async fn extract_popup(&self, session: &Session, path: &str) -> Result<Vec<PopupItem>> {
		let trigger = self.locate(session, path).await?;
		let items = self.click_and_extract(session, &trigger).await?;
		if !items.is_empty() {
			return Ok(items);
		}

		debug!(target = "cascade.interact", session = %session.id(), "no new overlay, clicking trigger once more");
		self.click_and_extract(session, &trigger).await
	}

	async fn click_and_extract(&self, session: &Session, trigger: &ElementTarget) -> Result<Vec<PopupItem>> {
		let before: Vec<String> = session
			.evaluate_typed::<Option<Vec<String>>>(&scripts::overlay_signatures())
			.await?
			.unwrap_or_default();
		session.click_at(trigger.x, trigger.y).await?;
		tokio::time::sleep(self.tuning.popup_settle()).await;
		let items = session
			.evaluate_typed::<Option<PopupItems>>(&scripts::extract_popup(&before))
			.await?
			.unwrap_or_default();
		Ok(items)
	}

	/// Clicks the newest visible overlay entry labelled `title`, then dismisses the overlay.
	pub async fn select_popup_item(&self, id: &str, title: Option<String>) -> Result<()> {
		let title = title
			.filter(|t| !t.trim().is_empty())
			.ok_or(Error::MissingParameter("title"))?;
		let session = self.session(id)?;

		let item: ElementTarget = session.evaluate_typed(&scripts::find_popup_item(&title)).await?;
		if !item.found {
			return Err(Error::ElementNotFound(title));
		}
		session.click_at(item.x, item.y).await?;
		tokio::time::sleep(self.tuning.popup_settle()).await;
		session.press_escape().await?;
		debug!(target = "cascade.interact", session = %id, %title, "popup item selected");
		self.schedule_refresh(id);
		Ok(())
	}
}
