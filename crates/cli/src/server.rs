//! Engine wiring, the HTTP surface and the two timer loops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use bridge::{
	BroadcastHub, CompletionDetector, Coordinator, Discovery, HttpPushTransport, HttpTargetSource,
	NotificationDispatcher, Poller, SessionRegistry, SnapshotEngine, SubscriptionStore, VapidKeys, WebSocketConnector,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use crate::auth::{self, Authenticator};
use crate::config::Config;
use crate::handlers;

/// Deadline for a single push delivery.
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
	pub registry: Arc<SessionRegistry>,
	pub hub: Arc<BroadcastHub>,
	pub coordinator: Arc<Coordinator>,
	pub notifier: Arc<NotificationDispatcher>,
	pub auth: Arc<Authenticator>,
	/// VAPID public key, base64url.
	pub push_public_key: Arc<str>,
	pub static_dir: Option<PathBuf>,
}

/// Everything a running server owns.
pub struct Engine {
	pub state: AppState,
	pub discovery: Arc<Discovery>,
	pub poller: Arc<Poller>,
}

impl Engine {
	pub fn build(
		config: &Config,
		auth: Authenticator,
		vapid: VapidKeys,
		store: Arc<dyn SubscriptionStore>,
	) -> Result<Self> {
		let tuning = config.tuning;
		let registry = Arc::new(SessionRegistry::new());
		let hub = Arc::new(BroadcastHub::new());

		let push_client = reqwest::Client::builder()
			.timeout(PUSH_TIMEOUT)
			.build()
			.context("building push client")?;
		let push_public_key: Arc<str> = Arc::from(vapid.public_key());
		let notifier = Arc::new(NotificationDispatcher::new(
			store,
			Arc::new(HttpPushTransport::new(push_client, vapid, config.push_subject.clone())),
		));

		let poller = Arc::new(
			Poller::new(
				Arc::clone(&registry),
				Arc::clone(&hub),
				SnapshotEngine::new(&tuning),
				CompletionDetector::new(&tuning),
			)
			.with_notifier(Arc::clone(&notifier))
			.with_pass_budget(config.poll_interval()),
		);
		let source = HttpTargetSource::new(config.cdp_host.clone(), &tuning).context("building discovery client")?;
		let discovery = Arc::new(Discovery::new(
			config.cdp_ports.clone(),
			Arc::new(source),
			Arc::new(WebSocketConnector::new(&tuning)),
			Arc::clone(&registry),
			Arc::clone(&hub),
		));
		let coordinator = Arc::new(Coordinator::new(
			Arc::clone(&registry),
			Arc::clone(&poller),
			Arc::clone(&hub),
			tuning,
		));

		Ok(Self {
			state: AppState {
				registry,
				hub,
				coordinator,
				notifier,
				auth: Arc::new(auth),
				push_public_key,
				static_dir: config.static_dir.clone(),
			},
			discovery,
			poller,
		})
	}

	/// Starts discovery and polling. Both run until aborted.
	pub fn spawn_loops(&self, config: &Config) -> Vec<JoinHandle<()>> {
		vec![
			tokio::spawn(discovery_loop(
				Arc::clone(&self.discovery),
				Arc::clone(&self.state.coordinator),
				config.discovery_interval(),
			)),
			tokio::spawn(poll_loop(Arc::clone(&self.poller), config.poll_interval())),
		]
	}
}

pub fn router(state: AppState) -> Router {
	let routes = Router::new()
		.route("/health", get(handlers::health))
		.route("/login.html", get(handlers::login_page))
		.route("/api/login", post(handlers::login))
		.route("/ws", get(handlers::ws))
		.route("/cascades", get(handlers::cascades))
		.route("/snapshot", get(handlers::preferred_snapshot))
		.route("/snapshot/{id}", get(handlers::snapshot))
		.route("/styles/{id}", get(handlers::styles))
		.route("/click/{id}", post(handlers::click))
		.route("/scroll/{id}", post(handlers::scroll))
		.route("/popup/{id}", post(handlers::open_popup))
		.route("/popup-click/{id}", post(handlers::select_popup_item))
		.route("/dismiss/{id}", post(handlers::dismiss))
		.route("/send/{id}", post(handlers::send))
		.route("/new-conversation/{id}", post(handlers::new_conversation))
		.route("/api/close-cascade/{id}", post(handlers::close_cascade))
		.route("/api/kill-all", post(handlers::kill_all))
		.route("/api/push/vapid-public-key", get(handlers::push_public_key))
		.route("/api/push/subscribe", post(handlers::push_subscribe))
		.route("/api/push/unsubscribe", post(handlers::push_unsubscribe));

	let routes = match &state.static_dir {
		Some(dir) => routes.fallback_service(ServeDir::new(dir)),
		None => routes,
	};

	routes
		.layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
		.with_state(state)
}

/// Serves `router` on the configured address until `shutdown` resolves.
pub async fn serve(
	config: &Config,
	router: Router,
	shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
	let addr = config.listen_addr();
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind mirror server to {addr}"))?;
	info!(target = "cascade.server", %addr, "mirror server listening");

	axum::serve(listener, router.into_make_service())
		.with_graceful_shutdown(shutdown)
		.await
		.context("Mirror server error")
}

async fn discovery_loop(discovery: Arc<Discovery>, coordinator: Arc<Coordinator>, every: Duration) {
	let mut ticker = tokio::time::interval(every);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	loop {
		ticker.tick().await;
		let report = discovery.sweep().await;
		debug!(
			target = "cascade.discovery",
			added = report.added.len(),
			removed = report.removed.len(),
			kept = report.kept.len(),
			failed = report.failed,
			"sweep finished"
		);
		coordinator.prune_scroll();
	}
}

async fn poll_loop(poller: Arc<Poller>, every: Duration) {
	let mut ticker = tokio::time::interval(every);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
	loop {
		ticker.tick().await;
		let outcome = poller.poll_all().await;
		if outcome.failed > 0 || outcome.pending > 0 {
			debug!(
				target = "cascade.poll",
				failed = outcome.failed,
				pending = outcome.pending,
				skipped = outcome.skipped,
				"poll pass incomplete"
			);
		}
	}
}
