//! Error types for the debug-session runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol error code the remote uses for generic server-side failures,
/// including evaluation against a context that no longer exists.
pub const SERVER_ERROR_CODE: i64 = -32000;

/// Errors that can occur while talking to a remote-debug endpoint.
#[derive(Debug, Error)]
pub enum Error {
	/// The websocket handshake failed or the endpoint is unreachable.
	#[error("Failed to connect to debug endpoint: {0}")]
	ConnectionFailed(String),

	/// Transport-level error while reading or writing frames.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// The connection closed while (or before) the call was in flight.
	#[error("Debug connection closed")]
	ChannelClosed,

	/// The remote answered with an error object.
	#[error("Remote error {code}: {message}")]
	Remote { code: i64, message: String },

	/// Malformed or unexpected protocol traffic.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// No response arrived within the call deadline.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if the connection is gone and retrying on it is pointless.
	pub fn is_closed(&self) -> bool {
		matches!(
			self,
			Error::ChannelClosed | Error::ConnectionFailed(_) | Error::TransportError(_)
		)
	}

	/// Returns true if the error indicates the targeted execution context is gone.
	pub fn is_stale_context(&self) -> bool {
		match self {
			Error::Remote { code, message } => {
				*code == SERVER_ERROR_CODE && message.to_ascii_lowercase().contains("context")
			}
			_ => false,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stale_context_detection() {
		let stale = Error::Remote {
			code: SERVER_ERROR_CODE,
			message: "Cannot find context with specified id".into(),
		};
		assert!(stale.is_stale_context());
		assert!(!stale.is_closed());

		let other = Error::Remote {
			code: -32601,
			message: "'Foo.bar' wasn't found".into(),
		};
		assert!(!other.is_stale_context());
		assert!(Error::ChannelClosed.is_closed());
	}
}
