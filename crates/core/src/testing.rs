//! Scripted stand-ins for the debug endpoint, shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cascade_protocol::cdp::{ExecutionContextDescription, methods};
use cascade_protocol::{Snapshot, cdp};
use cascade_runtime::{CallFuture, ProtocolChannel};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::scripts;
use crate::session::Session;
use crate::snapshot::content_hash;

/// One call as seen by the fake endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Call {
	pub method: String,
	pub params: Value,
	/// Marker name of the evaluated script, for `Runtime.evaluate`.
	pub script: Option<String>,
	pub context: Option<i64>,
}

pub(crate) enum Reply {
	/// `Runtime.evaluate` returning `value` by value.
	Value(Value),
	/// Raw protocol result.
	Raw(Value),
	Err(cascade_runtime::Error),
	/// Script threw.
	Throw(&'static str),
	/// Never resolves.
	Hang,
	After(Duration, Value),
}

type Handler = Box<dyn Fn(&Call) -> Reply + Send + Sync>;

pub(crate) struct FakeChannel {
	handler: Handler,
	calls: Mutex<Vec<Call>>,
	contexts: Mutex<Vec<ExecutionContextDescription>>,
	open: AtomicBool,
}

impl FakeChannel {
	pub fn new(handler: impl Fn(&Call) -> Reply + Send + Sync + 'static) -> Arc<Self> {
		Arc::new(Self {
			handler: Box::new(handler),
			calls: Mutex::new(Vec::new()),
			contexts: Mutex::new(vec![context(1)]),
			open: AtomicBool::new(true),
		})
	}

	pub fn set_contexts(&self, ids: &[i64]) {
		*self.contexts.lock() = ids.iter().copied().map(context).collect();
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().clone()
	}

	pub fn scripts(&self) -> Vec<String> {
		self.calls.lock().iter().filter_map(|c| c.script.clone()).collect()
	}

	pub fn count_script(&self, name: &str) -> usize {
		self.calls.lock().iter().filter(|c| c.script.as_deref() == Some(name)).count()
	}

	pub fn calls_to(&self, method: &str) -> Vec<Call> {
		self.calls.lock().iter().filter(|c| c.method == method).cloned().collect()
	}

	/// `type` field of every dispatched mouse event.
	pub fn mouse_events(&self) -> Vec<String> {
		self.calls_to(methods::INPUT_DISPATCH_MOUSE_EVENT)
			.iter()
			.map(|c| c.params["type"].as_str().unwrap_or_default().to_string())
			.collect()
	}

	pub fn keys(&self) -> Vec<String> {
		self.calls_to(methods::INPUT_DISPATCH_KEY_EVENT)
			.iter()
			.map(|c| format!("{}:{}", c.params["type"].as_str().unwrap_or_default(), c.params["key"].as_str().unwrap_or_default()))
			.collect()
	}
}

fn context(id: i64) -> ExecutionContextDescription {
	ExecutionContextDescription {
		id,
		origin: "vscode-file://vscode-app".into(),
		name: String::new(),
	}
}

fn evaluated(value: Value) -> Value {
	json!({ "result": { "type": "object", "value": value } })
}

impl ProtocolChannel for FakeChannel {
	fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a> {
		Box::pin(async move {
			if !self.open.load(Ordering::SeqCst) {
				return Err(cascade_runtime::Error::ChannelClosed);
			}
			let call = Call {
				method: method.to_string(),
				script: params["expression"]
					.as_str()
					.and_then(scripts::script_name)
					.map(str::to_owned),
				context: params["contextId"].as_i64(),
				params,
			};
			self.calls.lock().push(call.clone());
			match (self.handler)(&call) {
				Reply::Value(value) => Ok(evaluated(value)),
				Reply::Raw(value) => Ok(value),
				Reply::Err(e) => Err(e),
				Reply::Throw(message) => Ok(json!({
					"result": { "type": "object" },
					"exceptionDetails": { "text": "Uncaught", "exception": { "type": "object", "description": message } }
				})),
				Reply::Hang => std::future::pending().await,
				Reply::After(delay, value) => {
					tokio::time::sleep(delay).await;
					Ok(evaluated(value))
				}
			}
		})
	}

	fn contexts(&self) -> Vec<cdp::ExecutionContextDescription> {
		self.contexts.lock().clone()
	}

	fn is_open(&self) -> bool {
		self.open.load(Ordering::SeqCst)
	}

	fn close(&self) {
		self.open.store(false, Ordering::SeqCst);
	}
}

/// Handler answering the metadata script and acknowledging input events.
pub(crate) fn ide(extra: impl Fn(&Call) -> Option<Reply> + Send + Sync + 'static) -> impl Fn(&Call) -> Reply + Send + Sync {
	move |call| {
		if let Some(reply) = extra(call) {
			return reply;
		}
		match call.script.as_deref() {
			Some("metadata") => Reply::Value(json!({ "found": true, "chatTitle": "Agent", "isActive": true })),
			Some(_) => Reply::Value(Value::Null),
			None => Reply::Raw(json!({})),
		}
	}
}

/// Session over `channel` whose root context is already resolved.
pub(crate) fn session(id: &str, channel: Arc<FakeChannel>) -> Arc<Session> {
	let session = Session::new(id, "workbench", format!("ws://127.0.0.1:9000/devtools/page/{id}"), channel);
	session.set_root_context(Some(1));
	Arc::new(session)
}

/// Installs a snapshot with the given click map.
pub(crate) fn install_snapshot(session: &Session, click_map: &[&str]) {
	let html = "<div id=\"cascade\"></div>".to_string();
	session.with_state(|state| {
		state.snapshot.current = Some(Arc::new(Snapshot {
			hash: content_hash(&html),
			length: html.len(),
			html,
			click_map: click_map.iter().map(|s| s.to_string()).collect(),
			has_feedback: false,
			fingerprint: None,
		}));
	});
}
