//! Native input injection for [`Session`].

use cascade_protocol::cdp::{KeyEventParams, KeyEventType, MouseEventParams, MouseEventType, methods};
use serde::Serialize;
use serde_json::json;

use super::Session;
use crate::error::Result;

impl Session {
	async fn dispatch<T: Serialize>(&self, method: &str, params: &T) -> Result<()> {
		self.channel.call(method, serde_json::to_value(params)?).await?;
		Ok(())
	}

	/// Moves the pointer to (`x`, `y`) and performs a left press/release there.
	pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
		self.dispatch(methods::INPUT_DISPATCH_MOUSE_EVENT, &MouseEventParams::moved(x, y))
			.await?;
		self.dispatch(
			methods::INPUT_DISPATCH_MOUSE_EVENT,
			&MouseEventParams::button(MouseEventType::MousePressed, x, y),
		)
		.await?;
		self.dispatch(
			methods::INPUT_DISPATCH_MOUSE_EVENT,
			&MouseEventParams::button(MouseEventType::MouseReleased, x, y),
		)
		.await
	}

	pub async fn wheel_at(&self, x: f64, y: f64, delta_y: f64) -> Result<()> {
		self.dispatch(methods::INPUT_DISPATCH_MOUSE_EVENT, &MouseEventParams::wheel(x, y, delta_y))
			.await
	}

	async fn press_key(&self, key: fn(KeyEventType) -> KeyEventParams) -> Result<()> {
		self.dispatch(methods::INPUT_DISPATCH_KEY_EVENT, &key(KeyEventType::KeyDown))
			.await?;
		self.dispatch(methods::INPUT_DISPATCH_KEY_EVENT, &key(KeyEventType::KeyUp))
			.await
	}

	/// Closes whatever overlay is open in the IDE.
	pub async fn press_escape(&self) -> Result<()> {
		self.press_key(KeyEventParams::escape).await
	}

	pub async fn press_enter(&self) -> Result<()> {
		self.press_key(KeyEventParams::enter).await
	}

	/// Closes the IDE window behind this session, then the connection.
	pub async fn close_target(&self) -> Result<()> {
		let result = self.dispatch(methods::PAGE_CLOSE, &json!({})).await;
		self.channel.close();
		result
	}
}
