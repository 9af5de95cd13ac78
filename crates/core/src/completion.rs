//! Fingerprint-based "response finished" detection.

use std::time::Duration;

use tokio::time::Instant;

use crate::tuning::Tuning;

/// Per-session detection state.
#[derive(Debug, Clone, Default)]
pub struct CompletionState {
	/// Whether a first observation has been recorded.
	primed: bool,
	last_notified: Option<String>,
	last_notified_at: Option<Instant>,
}

impl CompletionState {
	pub fn last_notified(&self) -> Option<&str> {
		self.last_notified.as_deref()
	}
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionDetector {
	cooldown: Duration,
}

impl Default for CompletionDetector {
	fn default() -> Self {
		Self::new(&Tuning::default())
	}
}

impl CompletionDetector {
	pub fn new(tuning: &Tuning) -> Self {
		Self {
			cooldown: tuning.completion_cooldown(),
		}
	}

	/// Decides whether the fingerprint of an accepted snapshot warrants a notification.
	///
	/// The first observation of a session only records the fingerprint, so
	/// responses that finished before the bridge attached stay silent. State
	/// changes only on a positive decision.
	pub fn observe(&self, state: &mut CompletionState, fingerprint: Option<&str>, now: Instant) -> bool {
		if !state.primed {
			state.primed = true;
			state.last_notified = fingerprint.map(str::to_owned);
			return false;
		}

		let Some(fingerprint) = fingerprint else {
			return false;
		};
		if state.last_notified.as_deref() == Some(fingerprint) {
			return false;
		}
		let cooling = state
			.last_notified_at
			.is_some_and(|at| now.saturating_duration_since(at) < self.cooldown);
		if cooling {
			return false;
		}

		state.last_notified = Some(fingerprint.to_owned());
		state.last_notified_at = Some(now);
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn primed() -> CompletionState {
		let mut state = CompletionState::default();
		CompletionDetector::default().observe(&mut state, None, Instant::now());
		state
	}

	#[test]
	fn first_observation_only_primes() {
		let detector = CompletionDetector::default();
		let mut state = CompletionState::default();
		assert!(!detector.observe(&mut state, Some("2:10:done"), Instant::now()));
		assert_eq!(state.last_notified(), Some("2:10:done"));
	}

	#[test]
	fn identical_fingerprint_notifies_once() {
		let detector = CompletionDetector::default();
		let mut state = primed();
		let now = Instant::now();
		assert!(detector.observe(&mut state, Some("a"), now));
		assert!(!detector.observe(&mut state, Some("a"), now + Duration::from_secs(60)));
	}

	#[test]
	fn cooldown_suppresses_distinct_fingerprints() {
		let detector = CompletionDetector::default();
		let mut state = primed();
		let now = Instant::now();
		assert!(detector.observe(&mut state, Some("a"), now));
		assert!(!detector.observe(&mut state, Some("b"), now + Duration::from_secs(1)));
		// Suppressed decisions leave the last-notified value alone.
		assert_eq!(state.last_notified(), Some("a"));
		assert!(detector.observe(&mut state, Some("b"), now + Duration::from_secs(16)));
	}

	#[test]
	fn missing_fingerprint_is_ignored() {
		let detector = CompletionDetector::default();
		let mut state = primed();
		assert!(!detector.observe(&mut state, None, Instant::now()));
		assert_eq!(state.last_notified(), None);
	}
}
