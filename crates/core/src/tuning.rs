//! Timing and size heuristics.
//!
//! None of these values are correctness guarantees. They were picked to match
//! how the IDE renders in practice and can be overridden from configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Tuning {
	/// Wait between a popup trigger click and reading the overlay.
	pub popup_settle_ms: u64,
	/// Quiet period before a scroll sync is issued; later requests restart it.
	pub scroll_debounce_ms: u64,
	/// Delay between a scroll and the forced snapshot refresh.
	pub scroll_refresh_delay_ms: u64,
	/// Upper bound on how long a scroll sync may hold its lock.
	pub scroll_watchdog_ms: u64,
	/// Scroll state untouched this long is forgotten.
	pub scroll_idle_ttl_ms: u64,
	/// How deep below the chat container to look for the scrollable element.
	pub scroll_search_depth: u32,
	/// Minimum spacing between two notifications for the same session.
	pub completion_cooldown_ms: u64,
	/// Captures shorter than this are suspicious...
	pub snapshot_small_threshold: usize,
	/// ...when the previous capture was longer than this.
	pub snapshot_large_threshold: usize,
	/// Time after `Runtime.enable` for context announcements to arrive.
	pub context_settle_ms: u64,
	/// Deadline for a single debug-protocol call.
	pub call_timeout_ms: u64,
	/// Deadline for one `/json/list` request.
	pub discovery_timeout_ms: u64,
}

impl Default for Tuning {
	fn default() -> Self {
		Self {
			popup_settle_ms: 400,
			scroll_debounce_ms: 300,
			scroll_refresh_delay_ms: 400,
			scroll_watchdog_ms: 2500,
			scroll_idle_ttl_ms: 300_000,
			scroll_search_depth: 8,
			completion_cooldown_ms: 15_000,
			snapshot_small_threshold: 50,
			snapshot_large_threshold: 200,
			context_settle_ms: 500,
			call_timeout_ms: 10_000,
			discovery_timeout_ms: 2_000,
		}
	}
}

impl Tuning {
	pub fn popup_settle(&self) -> Duration {
		Duration::from_millis(self.popup_settle_ms)
	}

	pub fn scroll_debounce(&self) -> Duration {
		Duration::from_millis(self.scroll_debounce_ms)
	}

	pub fn scroll_refresh_delay(&self) -> Duration {
		Duration::from_millis(self.scroll_refresh_delay_ms)
	}

	pub fn scroll_watchdog(&self) -> Duration {
		Duration::from_millis(self.scroll_watchdog_ms)
	}

	pub fn scroll_idle_ttl(&self) -> Duration {
		Duration::from_millis(self.scroll_idle_ttl_ms)
	}

	pub fn completion_cooldown(&self) -> Duration {
		Duration::from_millis(self.completion_cooldown_ms)
	}

	pub fn context_settle(&self) -> Duration {
		Duration::from_millis(self.context_settle_ms)
	}

	pub fn call_timeout(&self) -> Duration {
		Duration::from_millis(self.call_timeout_ms)
	}

	pub fn discovery_timeout(&self) -> Duration {
		Duration::from_millis(self.discovery_timeout_ms)
	}
}
