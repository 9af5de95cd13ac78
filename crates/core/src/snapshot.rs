//! Snapshot change detection.
//!
//! A capture is hashed and compared against the stored snapshot. Identical
//! content is a no-op, and a capture that collapses from long to nearly empty
//! is treated as a rendering glitch and rejected.

use std::sync::Arc;

use cascade_protocol::Snapshot;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::tuning::Tuning;

/// Capture as returned by the in-page script, before hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawCapture {
	pub html: String,
	pub click_map: Vec<String>,
	pub has_feedback: bool,
	pub fingerprint: Option<String>,
}

/// Latest snapshot of a session plus the glitch counter.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSlot {
	pub current: Option<Arc<Snapshot>>,
	/// Number of captures rejected as transient truncation.
	pub stable_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
	/// Same hash as the stored snapshot.
	Unchanged,
	/// Suspiciously short capture; the stored snapshot was kept.
	Rejected { stable_count: u64 },
	Accepted(Arc<Snapshot>),
}

impl SnapshotOutcome {
	pub fn is_accepted(&self) -> bool {
		matches!(self, SnapshotOutcome::Accepted(_))
	}
}

/// Hex SHA-256 over the markup.
pub fn content_hash(html: &str) -> String {
	hex::encode(Sha256::digest(html.as_bytes()))
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotEngine {
	small_threshold: usize,
	large_threshold: usize,
}

impl Default for SnapshotEngine {
	fn default() -> Self {
		Self::new(&Tuning::default())
	}
}

impl SnapshotEngine {
	pub fn new(tuning: &Tuning) -> Self {
		Self {
			small_threshold: tuning.snapshot_small_threshold,
			large_threshold: tuning.snapshot_large_threshold,
		}
	}

	/// Applies a capture to `slot`, replacing the stored snapshot wholesale when accepted.
	pub fn accept(&self, slot: &mut SnapshotSlot, raw: RawCapture) -> SnapshotOutcome {
		let hash = content_hash(&raw.html);
		let length = raw.html.chars().count();

		if let Some(previous) = &slot.current {
			if previous.hash == hash {
				return SnapshotOutcome::Unchanged;
			}
			if length < self.small_threshold && previous.length > self.large_threshold {
				slot.stable_count += 1;
				return SnapshotOutcome::Rejected {
					stable_count: slot.stable_count,
				};
			}
		}

		let snapshot = Arc::new(Snapshot {
			html: raw.html,
			click_map: raw.click_map,
			has_feedback: raw.has_feedback,
			fingerprint: raw.fingerprint,
			hash,
			length,
		});
		slot.current = Some(Arc::clone(&snapshot));
		SnapshotOutcome::Accepted(snapshot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn capture(len: usize) -> RawCapture {
		RawCapture {
			html: "x".repeat(len),
			..Default::default()
		}
	}

	#[test]
	fn identical_capture_is_unchanged() {
		let engine = SnapshotEngine::default();
		let mut slot = SnapshotSlot::default();
		assert!(engine.accept(&mut slot, capture(120)).is_accepted());
		assert_eq!(engine.accept(&mut slot, capture(120)), SnapshotOutcome::Unchanged);
	}

	#[test]
	fn collapse_after_long_content_is_rejected() {
		let engine = SnapshotEngine::default();
		let mut slot = SnapshotSlot::default();
		assert!(engine.accept(&mut slot, capture(210)).is_accepted());

		assert_eq!(
			engine.accept(&mut slot, capture(0)),
			SnapshotOutcome::Rejected { stable_count: 1 }
		);
		let kept = slot.current.as_ref().unwrap();
		assert_eq!(kept.length, 210);
		assert_eq!(slot.stable_count, 1);
	}

	#[test]
	fn short_content_is_fine_when_previous_was_short() {
		let engine = SnapshotEngine::default();
		let mut slot = SnapshotSlot::default();
		engine.accept(&mut slot, capture(150));
		assert!(engine.accept(&mut slot, capture(10)).is_accepted());
		assert_eq!(slot.stable_count, 0);
	}

	#[test]
	fn first_capture_is_always_accepted() {
		let engine = SnapshotEngine::default();
		let mut slot = SnapshotSlot::default();
		let SnapshotOutcome::Accepted(snapshot) = engine.accept(&mut slot, capture(0)) else {
			panic!("expected accepted");
		};
		assert_eq!(snapshot.hash, content_hash(""));
	}

	#[test]
	fn length_counts_characters() {
		let engine = SnapshotEngine::default();
		let mut slot = SnapshotSlot::default();
		let raw = RawCapture {
			html: "<p>héllo</p>".into(),
			..Default::default()
		};
		let SnapshotOutcome::Accepted(snapshot) = engine.accept(&mut slot, raw) else {
			panic!("expected accepted");
		};
		assert_eq!(snapshot.length, 12);
	}
}
