//! Error types for the bridging engine.

use cascade_protocol::ErrorCode;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Session not found: {0}")]
	SessionNotFound(String),

	/// Index outside the click map of the current snapshot.
	#[error("Invalid click index {index} (click map has {len} entries)")]
	InvalidIndex { index: usize, len: usize },

	#[error("Missing parameter: {0}")]
	MissingParameter(&'static str),

	/// A path or label resolved to nothing in the live document.
	#[error("Element not found: {0}")]
	ElementNotFound(String),

	#[error("No snapshot captured yet for session {0}")]
	NoSnapshot(String),

	/// The injected script threw or returned an unusable value.
	#[error("Script evaluation failed: {0}")]
	Evaluation(String),

	/// No execution context of the session hosts the chat panel.
	#[error("No execution context hosts the chat panel")]
	ContextUnavailable,

	#[error(transparent)]
	Runtime(#[from] cascade_runtime::Error),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The VAPID keypair could not be generated or parsed.
	#[error("Push key error: {0}")]
	PushKey(String),
}

impl Error {
	/// Stable wire code for this error.
	pub fn code(&self) -> ErrorCode {
		match self {
			Error::SessionNotFound(_) | Error::NoSnapshot(_) => ErrorCode::NotFound,
			Error::InvalidIndex { .. } => ErrorCode::InvalidIndex,
			Error::MissingParameter(_) => ErrorCode::InvalidInput,
			Error::ElementNotFound(_) => ErrorCode::ElementNotFound,
			Error::Runtime(e) if e.is_timeout() => ErrorCode::Timeout,
			Error::Runtime(_) | Error::ContextUnavailable => ErrorCode::SessionError,
			Error::Http(e) if e.is_timeout() => ErrorCode::Timeout,
			Error::Evaluation(_) | Error::Http(_) | Error::Json(_) | Error::Io(_) | Error::PushKey(_) => {
				ErrorCode::InternalError
			}
		}
	}

	/// Whether the debug connection itself is gone.
	pub fn is_connection_lost(&self) -> bool {
		matches!(self, Error::Runtime(e) if e.is_closed())
	}

	/// Whether a retry against a freshly resolved execution context may succeed.
	pub(crate) fn is_context_retryable(&self) -> bool {
		match self {
			Error::Evaluation(_) | Error::ContextUnavailable => true,
			Error::Runtime(e) => e.is_stale_context(),
			_ => false,
		}
	}
}
