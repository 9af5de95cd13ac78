use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cascade_protocol::ErrorCode;
use tracing::warn;

/// Structured failure returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
	pub code: ErrorCode,
	pub message: String,
}

impl ApiError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	pub fn unauthorized() -> Self {
		Self::new(ErrorCode::Unauthorized, "Unauthorized")
	}

	pub fn status(&self) -> StatusCode {
		status_for(self.code)
	}
}

pub fn status_for(code: ErrorCode) -> StatusCode {
	match code {
		ErrorCode::InvalidInput | ErrorCode::InvalidIndex => StatusCode::BAD_REQUEST,
		ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
		ErrorCode::NotFound | ErrorCode::ElementNotFound => StatusCode::NOT_FOUND,
		ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
		ErrorCode::SessionError | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

impl From<bridge::Error> for ApiError {
	fn from(err: bridge::Error) -> Self {
		Self::new(err.code(), err.to_string())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			warn!(target = "cascade.server", code = %self.code, error = %self.message, "request failed");
		}
		let body = cascade_protocol::ApiError {
			error: self.message,
			code: self.code,
		};
		(status, Json(body)).into_response()
	}
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
