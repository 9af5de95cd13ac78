//! Password login and signed session tokens.
//!
//! A token is `<issued-at-ms>.<hex hmac-sha256(secret, issued-at-ms)>`. It
//! travels in the `auth` cookie or an `Authorization: Bearer` header.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::ApiError;
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "auth";
pub const TOKEN_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const LOGIN_PAGE: &str = "/login.html";

/// Tokens stamped further than this in the future are rejected.
const CLOCK_SKEW_MS: u64 = 60_000;

/// Routes reachable without a token.
const PUBLIC_PATHS: &[&str] = &["/api/login", LOGIN_PAGE, "/health"];

/// Route prefixes answered with a JSON 401 rather than a login redirect.
const API_PREFIXES: &[&str] = &[
	"/api/",
	"/ws",
	"/cascades",
	"/snapshot",
	"/styles",
	"/click",
	"/scroll",
	"/popup",
	"/dismiss",
	"/send",
	"/new-conversation",
];

#[derive(Clone)]
pub struct Authenticator {
	mac: HmacSha256,
	password_tag: Vec<u8>,
	max_age: Duration,
}

impl std::fmt::Debug for Authenticator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Authenticator").field("max_age", &self.max_age).finish_non_exhaustive()
	}
}

impl Authenticator {
	pub fn new(secret: &[u8], password: &str) -> anyhow::Result<Self> {
		let mac = HmacSha256::new_from_slice(secret).map_err(|e| anyhow::anyhow!("invalid signing secret: {e}"))?;
		let password_tag = tag(&mac, password.as_bytes());
		Ok(Self {
			mac,
			password_tag,
			max_age: TOKEN_MAX_AGE,
		})
	}

	/// Compares in constant time by checking the candidate's MAC against the password's.
	pub fn check_password(&self, candidate: &str) -> bool {
		let mut mac = self.mac.clone();
		mac.update(candidate.as_bytes());
		mac.verify_slice(&self.password_tag).is_ok()
	}

	pub fn issue(&self) -> String {
		self.issue_at(now_ms())
	}

	fn issue_at(&self, issued_ms: u64) -> String {
		let payload = issued_ms.to_string();
		format!("{payload}.{}", hex::encode(tag(&self.mac, payload.as_bytes())))
	}

	pub fn verify(&self, token: &str) -> bool {
		self.verify_at(token, now_ms())
	}

	fn verify_at(&self, token: &str, now_ms: u64) -> bool {
		let Some((payload, signature)) = token.split_once('.') else {
			return false;
		};
		let Ok(issued_ms) = payload.parse::<u64>() else {
			return false;
		};
		if issued_ms > now_ms.saturating_add(CLOCK_SKEW_MS) {
			return false;
		}
		if u128::from(now_ms.saturating_sub(issued_ms)) > self.max_age.as_millis() {
			return false;
		}
		let Ok(signature) = hex::decode(signature) else {
			return false;
		};
		let mut mac = self.mac.clone();
		mac.update(payload.as_bytes());
		mac.verify_slice(&signature).is_ok()
	}

	/// First presented token that verifies. A stale cookie does not shadow a
	/// valid bearer header.
	pub fn authorize(&self, headers: &HeaderMap) -> Option<String> {
		tokens_from_headers(headers).into_iter().find(|token| self.verify(token))
	}

	/// `Set-Cookie` value carrying `token`.
	pub fn cookie(&self, token: &str) -> String {
		format!(
			"{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
			self.max_age.as_secs()
		)
	}
}

fn tag(mac: &HmacSha256, data: &[u8]) -> Vec<u8> {
	let mut mac = mac.clone();
	mac.update(data);
	mac.finalize().into_bytes().to_vec()
}

fn now_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default()
}

/// Candidate tokens in precedence order: the `auth` cookie, then a bearer header.
pub fn tokens_from_headers(headers: &HeaderMap) -> Vec<String> {
	let from_cookie = headers
		.get_all(header::COOKIE)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(|value| value.split(';'))
		.find_map(|pair| {
			let (name, value) = pair.trim().split_once('=')?;
			(name == COOKIE_NAME && !value.is_empty()).then(|| value.to_string())
		});
	let from_bearer = headers
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.map(|token| token.trim().to_string())
		.filter(|token| !token.is_empty());
	from_cookie.into_iter().chain(from_bearer).collect()
}

/// Token from the `auth` cookie, else from a bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
	tokens_from_headers(headers).into_iter().next()
}

fn is_api_path(path: &str) -> bool {
	API_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Rejects requests without a valid token before any handler runs.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
	let path = request.uri().path().to_string();
	if PUBLIC_PATHS.contains(&path.as_str()) {
		return next.run(request).await;
	}
	if state.auth.authorize(request.headers()).is_some() {
		return next.run(request).await;
	}

	debug!(target = "cascade.server", %path, "unauthenticated request");
	if is_api_path(&path) {
		ApiError::unauthorized().into_response()
	} else {
		Redirect::to(LOGIN_PAGE).into_response()
	}
}

#[cfg(test)]
mod tests {
	use axum::http::HeaderValue;

	use super::*;

	fn auth() -> Authenticator {
		Authenticator::new(b"0123456789abcdef", "hunter2").unwrap()
	}

	#[test]
	fn password_check() {
		let auth = auth();
		assert!(auth.check_password("hunter2"));
		assert!(!auth.check_password("hunter3"));
		assert!(!auth.check_password(""));
	}

	#[test]
	fn issued_token_verifies() {
		let auth = auth();
		let token = auth.issue();
		assert!(auth.verify(&token));
		let (payload, signature) = token.split_once('.').unwrap();
		assert!(payload.parse::<u64>().is_ok());
		assert_eq!(signature.len(), 64);
	}

	#[test]
	fn tampered_or_foreign_tokens_fail() {
		let auth = auth();
		let token = auth.issue_at(1_000);
		let (payload, signature) = token.split_once('.').unwrap();

		assert!(auth.verify_at(&token, 2_000));
		assert!(!auth.verify_at(&format!("1001.{signature}"), 2_000));
		assert!(!auth.verify_at(&format!("{payload}.zz"), 2_000));
		assert!(!auth.verify_at("garbage", 2_000));
		assert!(!auth.verify_at("", 2_000));

		let other = Authenticator::new(b"another secret", "hunter2").unwrap();
		assert!(!other.verify_at(&token, 2_000));
	}

	#[test]
	fn tokens_expire_after_seven_days() {
		let auth = auth();
		let issued = 1_700_000_000_000;
		let token = auth.issue_at(issued);
		let week = TOKEN_MAX_AGE.as_millis() as u64;
		assert!(auth.verify_at(&token, issued + week));
		assert!(!auth.verify_at(&token, issued + week + 1));
		assert!(!auth.verify_at(&token, issued - CLOCK_SKEW_MS - 1));
	}

	#[test]
	fn token_is_read_from_cookie_then_bearer() {
		let mut headers = HeaderMap::new();
		assert_eq!(token_from_headers(&headers), None);

		headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
		assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def"));

		headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth=123.cafe"));
		assert_eq!(token_from_headers(&headers).as_deref(), Some("123.cafe"));
	}

	#[test]
	fn expired_cookie_does_not_shadow_valid_bearer() {
		let auth = auth();
		let expired = auth.issue_at(1_000);
		let fresh = auth.issue();
		let mut headers = HeaderMap::new();
		headers.insert(header::COOKIE, HeaderValue::from_str(&format!("auth={expired}")).unwrap());
		assert_eq!(auth.authorize(&headers), None);

		headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {fresh}")).unwrap());
		assert_eq!(auth.authorize(&headers), Some(fresh));
		assert_eq!(tokens_from_headers(&headers).len(), 2);
	}

	#[test]
	fn cookie_attributes() {
		let cookie = auth().cookie("1.ab");
		assert!(cookie.starts_with("auth=1.ab;"));
		assert!(cookie.contains("HttpOnly"));
		assert!(cookie.contains("SameSite=Lax"));
		assert!(cookie.contains("Max-Age=604800"));
	}

	#[test]
	fn api_paths_are_recognised() {
		assert!(is_api_path("/api/kill-all"));
		assert!(is_api_path("/snapshot/abc"));
		assert!(is_api_path("/popup-click/abc"));
		assert!(is_api_path("/ws"));
		assert!(!is_api_path("/"));
		assert!(!is_api_path("/index.html"));
	}
}
