use std::sync::Arc;

use anyhow::{Context, Result};
use cascade_cli::auth::Authenticator;
use cascade_cli::cli::Cli;
use cascade_cli::config::{Config, ConfigPaths, Secrets};
use cascade_cli::logging;
use cascade_cli::push_store::FileSubscriptionStore;
use cascade_cli::server::{self, Engine};
use clap::Parser;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};

const GENERATED_PASSWORD_LEN: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let paths = ConfigPaths::discover(cli.config.as_deref());
	let mut config = Config::load(&paths.config)?;
	config.apply_env(|name| std::env::var(name).ok())?;
	config.apply_cli(&cli);

	let mut secrets = Secrets::load_or_create(&paths.secrets)?;
	secrets.apply_env(|name| std::env::var(name).ok());

	let password = match config.password.clone() {
		Some(password) => password,
		None => {
			let generated: String = rand::thread_rng()
				.sample_iter(&Alphanumeric)
				.take(GENERATED_PASSWORD_LEN)
				.map(char::from)
				.collect();
			warn!(target = "cascade.server", password = %generated, "no password configured, generated one for this run");
			generated
		}
	};
	let auth = Authenticator::new(secrets.auth_secret.as_bytes(), &password).context("initialising authentication")?;

	let store = Arc::new(FileSubscriptionStore::new(config.push_store_path(&paths)));
	let vapid = secrets.vapid_keys()?;
	let engine = Engine::build(&config, auth, vapid, store)?;
	let loops = engine.spawn_loops(&config);
	info!(
		target = "cascade.server",
		ports = ?config.cdp_ports,
		host = %config.cdp_host,
		"watching remote-debug ports"
	);

	let router = server::router(engine.state.clone());
	let result = server::serve(&config, router, async {
		let _ = tokio::signal::ctrl_c().await;
		info!(target = "cascade.server", "shutting down");
	})
	.await;

	for handle in loops {
		handle.abort();
	}
	result
}
