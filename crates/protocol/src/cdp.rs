//! Remote-debugging protocol envelopes and the payloads the bridge uses.
//!
//! Only the slice of the protocol the bridge actually touches is modelled:
//! the `Runtime` domain (evaluation and execution-context lifecycle) and the
//! `Input` domain (synthetic pointer and key events).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method names used by the bridge.
pub mod methods {
	pub const RUNTIME_ENABLE: &str = "Runtime.enable";
	pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
	pub const INPUT_DISPATCH_MOUSE_EVENT: &str = "Input.dispatchMouseEvent";
	pub const INPUT_DISPATCH_KEY_EVENT: &str = "Input.dispatchKeyEvent";
	pub const PAGE_CLOSE: &str = "Page.close";

	pub const CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
	pub const CONTEXT_DESTROYED: &str = "Runtime.executionContextDestroyed";
	pub const CONTEXTS_CLEARED: &str = "Runtime.executionContextsCleared";
}

/// Outgoing request `{id, method, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Response correlated to a [`Request`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// Error object returned in place of a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	#[serde(default)]
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
}

/// Unsolicited notification `{method, params}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Anything that can arrive on a debug socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Has an `id`.
	Response(Response),
	/// Has a `method` but no `id`.
	Event(Event),
	/// Forward-compatible catch-all.
	Unknown(Value),
}

/// An isolated script-evaluation scope (main frame, iframe, extension world).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
	pub id: i64,
	#[serde(default)]
	pub origin: String,
	#[serde(default)]
	pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextCreatedParams {
	pub context: ExecutionContextDescription,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDestroyedParams {
	pub execution_context_id: i64,
}

/// Parameters for `Runtime.evaluate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
	pub expression: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context_id: Option<i64>,
	pub return_by_value: bool,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub await_promise: bool,
}

impl EvaluateParams {
	pub fn by_value(expression: impl Into<String>, context_id: Option<i64>) -> Self {
		Self {
			expression: expression.into(),
			context_id,
			return_by_value: true,
			await_promise: false,
		}
	}

	pub fn awaiting(mut self) -> Self {
		self.await_promise = true;
		self
	}
}

/// Result of `Runtime.evaluate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
	pub result: RemoteObject,
	#[serde(default)]
	pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteObject {
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub value: Option<Value>,
	#[serde(default)]
	pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionDetails {
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
	/// Best human-readable description of the thrown value.
	pub fn message(&self) -> String {
		self.exception
			.as_ref()
			.and_then(|e| e.description.clone())
			.unwrap_or_else(|| self.text.clone())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventType {
	MousePressed,
	MouseReleased,
	MouseMoved,
	MouseWheel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
	None,
	Left,
	Right,
	Middle,
}

/// Parameters for `Input.dispatchMouseEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseEventParams {
	#[serde(rename = "type")]
	pub kind: MouseEventType,
	pub x: f64,
	pub y: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub button: Option<MouseButton>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub click_count: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delta_x: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delta_y: Option<f64>,
}

impl MouseEventParams {
	pub fn button(kind: MouseEventType, x: f64, y: f64) -> Self {
		Self {
			kind,
			x,
			y,
			button: Some(MouseButton::Left),
			click_count: Some(1),
			delta_x: None,
			delta_y: None,
		}
	}

	pub fn moved(x: f64, y: f64) -> Self {
		Self {
			kind: MouseEventType::MouseMoved,
			x,
			y,
			button: None,
			click_count: None,
			delta_x: None,
			delta_y: None,
		}
	}

	pub fn wheel(x: f64, y: f64, delta_y: f64) -> Self {
		Self {
			kind: MouseEventType::MouseWheel,
			x,
			y,
			button: None,
			click_count: None,
			delta_x: Some(0.0),
			delta_y: Some(delta_y),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventType {
	KeyDown,
	KeyUp,
	RawKeyDown,
	Char,
}

/// Parameters for `Input.dispatchKeyEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEventParams {
	#[serde(rename = "type")]
	pub kind: KeyEventType,
	pub key: String,
	pub code: String,
	pub windows_virtual_key_code: u32,
}

impl KeyEventParams {
	pub fn escape(kind: KeyEventType) -> Self {
		Self {
			kind,
			key: "Escape".to_string(),
			code: "Escape".to_string(),
			windows_virtual_key_code: 27,
		}
	}

	pub fn enter(kind: KeyEventType) -> Self {
		Self {
			kind,
			key: "Enter".to_string(),
			code: "Enter".to_string(),
			windows_virtual_key_code: 13,
		}
	}
}

/// Entry of the `/json/list` discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	#[serde(default)]
	pub id: String,
	#[serde(default)]
	pub title: String,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub web_socket_debugger_url: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_and_event_are_distinguished() {
		let response: Message = serde_json::from_str(r#"{"id": 7, "result": {"ok": true}}"#).unwrap();
		assert!(matches!(response, Message::Response(ref r) if r.id == 7));

		let event: Message = serde_json::from_str(
			r#"{"method": "Runtime.executionContextDestroyed", "params": {"executionContextId": 3}}"#,
		)
		.unwrap();
		match event {
			Message::Event(e) => {
				let params: ContextDestroyedParams = serde_json::from_value(e.params).unwrap();
				assert_eq!(params.execution_context_id, 3);
			}
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn error_response_carries_code() {
		let message: Message =
			serde_json::from_str(r#"{"id": 2, "error": {"code": -32000, "message": "Cannot find context with specified id"}}"#)
				.unwrap();
		let Message::Response(response) = message else {
			panic!("expected response");
		};
		let error = response.error.unwrap();
		assert_eq!(error.code, -32000);
		assert!(response.result.is_none());
	}

	#[test]
	fn evaluate_params_omit_defaults() {
		let params = EvaluateParams::by_value("1 + 1", Some(4));
		let json = serde_json::to_value(&params).unwrap();
		assert_eq!(json["contextId"], 4);
		assert_eq!(json["returnByValue"], true);
		assert!(json.get("awaitPromise").is_none());

		let json = serde_json::to_value(params.awaiting()).unwrap();
		assert_eq!(json["awaitPromise"], true);
	}

	#[test]
	fn mouse_params_use_protocol_names() {
		let json = serde_json::to_value(MouseEventParams::button(MouseEventType::MousePressed, 10.0, 20.0)).unwrap();
		assert_eq!(json["type"], "mousePressed");
		assert_eq!(json["button"], "left");
		assert_eq!(json["clickCount"], 1);
		assert!(json.get("deltaY").is_none());
	}

	#[test]
	fn target_listing_parses_partial_entries() {
		let list: Vec<TargetInfo> = serde_json::from_str(
			r#"[{"id":"A","title":"workbench","type":"page","url":"vscode-file://workbench.html","webSocketDebuggerUrl":"ws://127.0.0.1:9000/devtools/page/A"},
			    {"id":"B","type":"service_worker"}]"#,
		)
		.unwrap();
		assert_eq!(list.len(), 2);
		assert!(list[1].web_socket_debugger_url.is_none());
	}
}
