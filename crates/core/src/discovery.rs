//! Target discovery and registry reconciliation.
//!
//! A sweep lists debuggable targets on every configured port, keeps sessions
//! whose metadata read still succeeds, attaches to new targets and drops the rest.
//! Failures are isolated per target: a failing target is simply absent from
//! the resulting registry.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_protocol::ServerEvent;
use cascade_protocol::cdp::TargetInfo;
use cascade_runtime::{DebugSession, ProtocolChannel, SessionOptions};
use futures_util::future::join_all;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::Result;
use crate::hub::BroadcastHub;
use crate::registry::SessionRegistry;
use crate::session::{Metadata, Session};
use crate::tuning::Tuning;

/// Lists debuggable targets on one port.
#[async_trait]
pub trait TargetSource: Send + Sync {
	async fn list_targets(&self, port: u16) -> Result<Vec<TargetInfo>>;
}

/// Opens a debug connection to a target socket.
#[async_trait]
pub trait SessionConnector: Send + Sync {
	async fn connect(&self, ws_url: &str) -> Result<Arc<dyn ProtocolChannel>>;
}

/// `GET http://<host>:<port>/json/list`.
#[derive(Debug, Clone)]
pub struct HttpTargetSource {
	client: reqwest::Client,
	host: String,
}

impl HttpTargetSource {
	pub fn new(host: impl Into<String>, tuning: &Tuning) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(tuning.discovery_timeout())
			.build()?;
		Ok(Self {
			client,
			host: host.into(),
		})
	}
}

#[async_trait]
impl TargetSource for HttpTargetSource {
	async fn list_targets(&self, port: u16) -> Result<Vec<TargetInfo>> {
		let url = format!("http://{}:{port}/json/list", self.host);
		let targets = self.client.get(&url).send().await?.error_for_status()?.json().await?;
		Ok(targets)
	}
}

/// Connects over websocket with [`DebugSession`].
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConnector {
	options: SessionOptions,
}

impl WebSocketConnector {
	pub fn new(tuning: &Tuning) -> Self {
		Self {
			options: SessionOptions {
				call_timeout: tuning.call_timeout(),
				context_settle: tuning.context_settle(),
			},
		}
	}
}

#[async_trait]
impl SessionConnector for WebSocketConnector {
	async fn connect(&self, ws_url: &str) -> Result<Arc<dyn ProtocolChannel>> {
		let session = DebugSession::connect(ws_url, self.options).await?;
		Ok(Arc::new(session))
	}
}

/// Whether a listed target is an IDE workbench window.
pub fn is_chat_window(target: &TargetInfo) -> bool {
	target.url.contains("workbench") || target.title.contains("workbench")
}

/// Session id derived from the target's socket URL.
pub fn stable_id(ws_url: &str) -> String {
	let digest = Sha256::digest(ws_url.as_bytes());
	hex::encode(&digest[..6])
}

/// Result of one discovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
	pub added: Vec<String>,
	pub removed: Vec<String>,
	pub kept: Vec<String>,
	/// Targets that could not be attached or read.
	pub failed: usize,
}

impl SweepReport {
	/// Whether registry membership changed.
	pub fn membership_changed(&self) -> bool {
		!self.added.is_empty() || !self.removed.is_empty()
	}
}

enum Reconciled {
	Kept(Arc<Session>),
	Added(Arc<Session>),
	Failed,
}

pub struct Discovery {
	ports: Vec<u16>,
	source: Arc<dyn TargetSource>,
	connector: Arc<dyn SessionConnector>,
	registry: Arc<SessionRegistry>,
	hub: Arc<BroadcastHub>,
}

impl Discovery {
	pub fn new(
		ports: Vec<u16>,
		source: Arc<dyn TargetSource>,
		connector: Arc<dyn SessionConnector>,
		registry: Arc<SessionRegistry>,
		hub: Arc<BroadcastHub>,
	) -> Self {
		Self {
			ports,
			source,
			connector,
			registry,
			hub,
		}
	}

	/// Runs one discovery pass. Never fails as a whole.
	pub async fn sweep(&self) -> SweepReport {
		let targets = self.collect_targets().await;
		let known: HashSet<String> = self.registry.ids().into_iter().collect();
		let outcomes = join_all(targets.into_iter().map(|(id, target)| self.reconcile(id, target))).await;

		let mut report = SweepReport::default();
		let mut next = Vec::new();
		for outcome in outcomes {
			match outcome {
				Reconciled::Kept(session) => {
					report.kept.push(session.id().to_string());
					next.push(session);
				}
				Reconciled::Added(session) if known.contains(session.id()) => {
					debug!(target = "cascade.discovery", session = %session.id(), "reconnected cascade");
					report.kept.push(session.id().to_string());
					next.push(session);
				}
				Reconciled::Added(session) => {
					info!(
						target = "cascade.discovery",
						session = %session.id(),
						title = %session.metadata().chat_title,
						"added cascade"
					);
					report.added.push(session.id().to_string());
					next.push(session);
				}
				Reconciled::Failed => report.failed += 1,
			}
		}

		report.removed = self.registry.replace_all(next);
		for id in &report.removed {
			info!(target = "cascade.discovery", session = %id, "removed cascade");
		}

		if report.membership_changed() {
			self.hub.broadcast(&ServerEvent::CascadeList {
				cascades: self.registry.cascades(),
			});
		}
		report
	}

	/// Chat-capable targets across all ports, deduplicated by id.
	async fn collect_targets(&self) -> Vec<(String, TargetInfo)> {
		let listings = join_all(self.ports.iter().map(|&port| async move {
			match self.source.list_targets(port).await {
				Ok(targets) => targets,
				Err(e) => {
					debug!(target = "cascade.discovery", port, error = %e, "no targets");
					Vec::new()
				}
			}
		}))
		.await;

		let mut seen = HashSet::new();
		let mut targets = Vec::new();
		for target in listings.into_iter().flatten() {
			if !is_chat_window(&target) {
				continue;
			}
			let Some(ws_url) = target.web_socket_debugger_url.as_deref() else {
				continue;
			};
			let id = stable_id(ws_url);
			if seen.insert(id.clone()) {
				targets.push((id, target));
			}
		}
		targets
	}

	async fn reconcile(&self, id: String, target: TargetInfo) -> Reconciled {
		if let Some(existing) = self.registry.get(&id) {
			if existing.is_open() {
				match existing.read_metadata().await {
					Ok(Some(metadata)) => {
						self.apply_metadata(&existing, metadata);
						self.refresh_styles(&existing).await;
						return Reconciled::Kept(existing);
					}
					Ok(None) => debug!(target = "cascade.discovery", session = %id, "chat panel gone, reconnecting"),
					Err(e) => debug!(target = "cascade.discovery", session = %id, error = %e, "metadata read failed, reconnecting"),
				}
			}
		}

		let ws_url = target.web_socket_debugger_url.clone().unwrap_or_default();
		let channel = match self.connector.connect(&ws_url).await {
			Ok(channel) => channel,
			Err(e) => {
				debug!(target = "cascade.discovery", title = %target.title, error = %e, "failed to connect");
				return Reconciled::Failed;
			}
		};

		let session = Arc::new(Session::new(id, target.title.clone(), ws_url, channel));
		match session.read_metadata().await {
			Ok(Some(metadata)) => {
				session.update_metadata(metadata);
				self.refresh_styles(&session).await;
				Reconciled::Added(session)
			}
			Ok(None) => {
				debug!(target = "cascade.discovery", title = %target.title, "no chat panel in any context");
				session.disconnect();
				Reconciled::Failed
			}
			Err(e) => {
				debug!(target = "cascade.discovery", title = %target.title, error = %e, "metadata read failed");
				session.disconnect();
				Reconciled::Failed
			}
		}
	}

	fn apply_metadata(&self, session: &Session, metadata: Metadata) {
		if let Some(quota) = session.update_metadata(metadata) {
			self.hub.broadcast(&ServerEvent::QuotaUpdate {
				cascade_id: session.id().to_string(),
				quota,
			});
		}
	}

	async fn refresh_styles(&self, session: &Session) {
		let had_css = session.css().is_some();
		match session.refresh_styles().await {
			Ok(true) if had_css => {
				self.hub.broadcast(&ServerEvent::CssUpdate {
					cascade_id: session.id().to_string(),
				});
			}
			Ok(_) => {}
			Err(e) => debug!(target = "cascade.discovery", session = %session.id(), error = %e, "stylesheet capture failed"),
		}
	}
}
