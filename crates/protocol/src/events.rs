//! Push-channel events broadcast to mirror clients.
//!
//! Events are deliberately small: a snapshot change only names the session,
//! and clients fetch the payload over HTTP when they care about it.

use serde::{Deserialize, Serialize};

/// Public projection of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cascade {
	pub id: String,
	/// Chat title extracted from the IDE panel.
	pub title: String,
	/// Title of the IDE window.
	pub window: String,
	/// Whether the window had focus at the last metadata read.
	pub active: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub quota: Option<QuotaInfo>,
}

/// Last-known model quota reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
	pub label: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
	/// Registry membership changed, or a client just connected.
	CascadeList { cascades: Vec<Cascade> },
	/// A new snapshot was accepted for the session.
	SnapshotUpdate {
		#[serde(rename = "cascadeId")]
		cascade_id: String,
	},
	QuotaUpdate {
		#[serde(rename = "cascadeId")]
		cascade_id: String,
		quota: QuotaInfo,
	},
	/// The captured stylesheet changed.
	CssUpdate {
		#[serde(rename = "cascadeId")]
		cascade_id: String,
	},
	/// A response finished in the session.
	AiComplete {
		#[serde(rename = "cascadeId")]
		cascade_id: String,
		title: String,
	},
}

impl ServerEvent {
	/// Session the event concerns, if any.
	pub fn cascade_id(&self) -> Option<&str> {
		match self {
			ServerEvent::CascadeList { .. } => None,
			ServerEvent::SnapshotUpdate { cascade_id }
			| ServerEvent::QuotaUpdate { cascade_id, .. }
			| ServerEvent::CssUpdate { cascade_id }
			| ServerEvent::AiComplete { cascade_id, .. } => Some(cascade_id),
		}
	}
}

/// Body delivered to push endpoints when a response completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
	pub title: String,
	pub body: String,
	pub cascade_id: String,
}
