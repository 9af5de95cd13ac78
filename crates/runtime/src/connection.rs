//! Debug-session connection: request/response correlation and
//! execution-context tracking.
//!
//! # Message Flow
//!
//! 1. [`DebugSession::call`] assigns the next id, registers a oneshot in the
//!    pending table and writes `{id, method, params}` to the transport.
//! 2. The dispatcher task reads frames, completes the matching oneshot for
//!    responses and applies `Runtime.executionContext*` events to the context
//!    list.
//! 3. When the transport closes, every pending call is rejected with
//!    [`Error::ChannelClosed`] and the session reports itself closed.
//!
//! Calls that time out (or whose future is dropped) remove their own pending
//! entry, so the table never accumulates abandoned slots.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use cascade_protocol::cdp::{
	ContextCreatedParams, ContextDestroyedParams, Event, ExecutionContextDescription, Message, Request,
	Response, methods,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{TransportParts, WebSocketTransport};

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value>>>;

/// Default deadline for a single protocol call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed future returned by [`ProtocolChannel`] methods.
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Object-safe view of a debug session.
///
/// Everything above the runtime talks to sessions through this trait so that
/// tests can substitute scripted endpoints.
pub trait ProtocolChannel: Send + Sync {
	/// Sends `method` with `params` and resolves with the `result` object.
	fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a>;

	/// Currently live execution contexts, in creation order.
	fn contexts(&self) -> Vec<ExecutionContextDescription>;

	fn is_open(&self) -> bool;

	/// Closes the connection and rejects anything still in flight.
	fn close(&self);
}

/// Tunables applied when opening a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
	/// Per-call response deadline.
	pub call_timeout: Duration,
	/// Time to wait after `Runtime.enable` so context announcements arrive.
	pub context_settle: Duration,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			call_timeout: DEFAULT_CALL_TIMEOUT,
			context_settle: Duration::from_millis(500),
		}
	}
}

/// One live debug connection to a page target.
pub struct DebugSession {
	url: String,
	last_id: AtomicU64,
	pending: Arc<PendingMap>,
	outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
	contexts: Arc<RwLock<Vec<ExecutionContextDescription>>>,
	open: Arc<AtomicBool>,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
	call_timeout: Duration,
}

impl std::fmt::Debug for DebugSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DebugSession")
			.field("url", &self.url)
			.field("open", &self.is_open())
			.field("pending", &self.pending.len())
			.finish()
	}
}

/// Removes a pending entry when the awaiting call goes away for any reason.
struct CancelGuard<'a> {
	id: u64,
	pending: &'a PendingMap,
}

impl Drop for CancelGuard<'_> {
	fn drop(&mut self) {
		self.pending.remove(&self.id);
	}
}

impl DebugSession {
	/// Opens a websocket to `url`, enables the runtime domain and waits for
	/// the initial context announcements to settle.
	pub async fn connect(url: &str, options: SessionOptions) -> Result<Self> {
		let parts = WebSocketTransport::connect(url).await?;
		let session = Self::from_parts(url, parts, options.call_timeout);
		session.call(methods::RUNTIME_ENABLE, Value::Object(Default::default())).await?;
		tokio::time::sleep(options.context_settle).await;
		debug!(
			target = "cascade.session",
			url,
			contexts = session.contexts.read().len(),
			"debug session ready"
		);
		Ok(session)
	}

	/// Wraps an already-established transport and starts the dispatcher.
	///
	/// Must be called from within a tokio runtime.
	pub fn from_parts(url: impl Into<String>, parts: TransportParts, call_timeout: Duration) -> Self {
		let url = url.into();
		let pending: Arc<PendingMap> = Arc::new(DashMap::new());
		let contexts = Arc::new(RwLock::new(Vec::new()));
		let open = Arc::new(AtomicBool::new(true));

		let dispatcher = tokio::spawn(run_dispatcher(
			url.clone(),
			parts.inbound,
			Arc::clone(&pending),
			Arc::clone(&contexts),
			Arc::clone(&open),
		));

		Self {
			url,
			last_id: AtomicU64::new(0),
			pending,
			outbound: Mutex::new(Some(parts.outbound)),
			contexts,
			open,
			dispatcher: Mutex::new(Some(dispatcher)),
			call_timeout,
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Number of calls awaiting a response.
	pub fn pending_calls(&self) -> usize {
		self.pending.len()
	}

	/// Sends one request and waits for its correlated response.
	pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
		if !self.is_open() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.pending.insert(id, tx);
		let _guard = CancelGuard {
			id,
			pending: &self.pending,
		};

		// The dispatcher may have drained the table between the check above and the insert.
		if !self.is_open() {
			return Err(Error::ChannelClosed);
		}

		let frame = serde_json::to_string(&Request {
			id,
			method: method.to_string(),
			params,
		})?;
		trace!(target = "cascade.session", id, method, "send");

		{
			let outbound = self.outbound.lock();
			let sender = outbound.as_ref().ok_or(Error::ChannelClosed)?;
			sender.send(frame).map_err(|_| Error::ChannelClosed)?;
		}

		match tokio::time::timeout(self.call_timeout, rx).await {
			Ok(Ok(result)) => result,
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Err(_) => Err(Error::Timeout(format!(
				"{method} got no response within {}ms",
				self.call_timeout.as_millis()
			))),
		}
	}

	pub fn contexts(&self) -> Vec<ExecutionContextDescription> {
		self.contexts.read().clone()
	}

	pub fn is_open(&self) -> bool {
		self.open.load(Ordering::SeqCst)
	}

	/// Closes the session. Idempotent.
	pub fn close(&self) {
		self.outbound.lock().take();
		if let Some(handle) = self.dispatcher.lock().take() {
			handle.abort();
		}
		self.open.store(false, Ordering::SeqCst);
		reject_all(&self.pending);
	}
}

impl Drop for DebugSession {
	fn drop(&mut self) {
		self.close();
	}
}

impl ProtocolChannel for DebugSession {
	fn call<'a>(&'a self, method: &'a str, params: Value) -> CallFuture<'a> {
		Box::pin(DebugSession::call(self, method, params))
	}

	fn contexts(&self) -> Vec<ExecutionContextDescription> {
		DebugSession::contexts(self)
	}

	fn is_open(&self) -> bool {
		DebugSession::is_open(self)
	}

	fn close(&self) {
		DebugSession::close(self)
	}
}

fn reject_all(pending: &PendingMap) {
	let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
	for id in ids {
		if let Some((_, tx)) = pending.remove(&id) {
			let _ = tx.send(Err(Error::ChannelClosed));
		}
	}
}

async fn run_dispatcher(
	url: String,
	mut inbound: mpsc::UnboundedReceiver<String>,
	pending: Arc<PendingMap>,
	contexts: Arc<RwLock<Vec<ExecutionContextDescription>>>,
	open: Arc<AtomicBool>,
) {
	while let Some(frame) = inbound.recv().await {
		match serde_json::from_str::<Message>(&frame) {
			Ok(Message::Response(response)) => dispatch_response(&pending, response),
			Ok(Message::Event(event)) => apply_event(&contexts, event),
			Ok(Message::Unknown(value)) => {
				trace!(target = "cascade.session", %value, "ignoring unrecognized frame");
			}
			Err(e) => {
				warn!(target = "cascade.session", url = %url, error = %e, "malformed frame");
			}
		}
	}

	open.store(false, Ordering::SeqCst);
	reject_all(&pending);
	debug!(target = "cascade.session", url = %url, "debug session closed");
}

fn dispatch_response(pending: &PendingMap, response: Response) {
	let Some((_, tx)) = pending.remove(&response.id) else {
		trace!(target = "cascade.session", id = response.id, "response for unknown or abandoned call");
		return;
	};

	let result = match response.error {
		Some(error) => Err(Error::Remote {
			code: error.code,
			message: error.message,
		}),
		None => Ok(response.result.unwrap_or(Value::Null)),
	};
	let _ = tx.send(result);
}

fn apply_event(contexts: &RwLock<Vec<ExecutionContextDescription>>, event: Event) {
	match event.method.as_str() {
		methods::CONTEXT_CREATED => match serde_json::from_value::<ContextCreatedParams>(event.params) {
			Ok(params) => {
				let mut contexts = contexts.write();
				contexts.retain(|c| c.id != params.context.id);
				contexts.push(params.context);
			}
			Err(e) => warn!(target = "cascade.session", error = %e, "bad context-created params"),
		},
		methods::CONTEXT_DESTROYED => match serde_json::from_value::<ContextDestroyedParams>(event.params) {
			Ok(params) => contexts.write().retain(|c| c.id != params.execution_context_id),
			Err(e) => warn!(target = "cascade.session", error = %e, "bad context-destroyed params"),
		},
		methods::CONTEXTS_CLEARED => contexts.write().clear(),
		_ => {}
	}
}
