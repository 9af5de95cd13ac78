//! Request and response bodies of the mirror HTTP API.

use serde::{Deserialize, Serialize};

/// Latest captured chat subtree of one session.
///
/// A `click_map` index is only meaningful against the snapshot that produced
/// it; clients must resolve indices against the version they rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
	/// Serialized markup of the cloned chat container.
	pub html: String,
	/// Element paths ordered by the `data-cdp-click` index stamped into `html`.
	pub click_map: Vec<String>,
	/// Whether a paired completion-feedback marker was visible.
	pub has_feedback: bool,
	/// Identifier of the completed response, present with `has_feedback`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fingerprint: Option<String>,
	/// Content hash over `html`.
	pub hash: String,
	/// Length of `html` in characters.
	pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
	pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRequest {
	pub index: Option<usize>,
}

/// Scroll target as an absolute offset, a ratio of the scrollable range, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scroll_top: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupOpenRequest {
	pub index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupSelectRequest {
	pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
	pub message: Option<String>,
}

/// One selectable entry of a transient IDE overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupItem {
	pub title: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default)]
	pub badges: Vec<String>,
	#[serde(default)]
	pub checked: bool,
	/// Section header the item sits under, if the overlay has one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub header: Option<String>,
	pub x: f64,
	pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopupResponse {
	pub items: Vec<PopupItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
}

impl SuccessResponse {
	pub fn ok() -> Self {
		Self {
			success: true,
			text: None,
		}
	}

	pub fn with_text(text: impl Into<String>) -> Self {
		Self {
			success: true,
			text: Some(text.into()),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesResponse {
	pub css: String,
}

/// Browser push subscription as produced by `PushManager.subscribe()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
	pub endpoint: String,
	pub keys: PushKeys,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
	pub p256dh: String,
	pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
	pub endpoint: String,
}

/// Application server key clients pass to `PushManager.subscribe()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VapidKeyResponse {
	pub public_key: String,
}

/// Structured error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
	pub error: String,
	pub code: ErrorCode,
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Missing or invalid credential
	Unauthorized,
	/// Click index outside the current click map
	InvalidIndex,
	/// Malformed or missing request parameters
	InvalidInput,
	/// Unknown session or no snapshot yet
	NotFound,
	/// Path resolved to nothing in the live document
	ElementNotFound,
	/// Debug connection failure
	SessionError,
	/// Operation timed out
	Timeout,
	/// Unknown/internal error
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::Unauthorized => write!(f, "UNAUTHORIZED"),
			ErrorCode::InvalidIndex => write!(f, "INVALID_INDEX"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::NotFound => write!(f, "NOT_FOUND"),
			ErrorCode::ElementNotFound => write!(f, "ELEMENT_NOT_FOUND"),
			ErrorCode::SessionError => write!(f, "SESSION_ERROR"),
			ErrorCode::Timeout => write!(f, "TIMEOUT"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}
