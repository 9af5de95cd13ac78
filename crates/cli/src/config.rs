//! Configuration record, signing secrets and their locations on disk.
//!
//! Precedence, lowest first: built-in defaults, `config.json`, `CASCADE_*`
//! environment variables, command-line flags.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bridge::{Tuning, VapidKeys};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::Cli;

pub const DEFAULT_PORT: u16 = 3563;
pub const DEFAULT_CDP_PORTS: [u16; 4] = [9000, 9001, 9002, 9003];
pub const DEFAULT_PUSH_SUBJECT: &str = "mailto:cascade@localhost";

pub const ENV_PASSWORD: &str = "CASCADE_PASSWORD";
pub const ENV_PORT: &str = "CASCADE_PORT";
pub const ENV_AUTH_SECRET: &str = "CASCADE_AUTH_SECRET";

/// File locations for persisted state.
///
/// Everything lives under `$XDG_CONFIG_HOME/cascade/` unless overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
	pub config: PathBuf,
	pub secrets: PathBuf,
	pub subscriptions: PathBuf,
}

impl ConfigPaths {
	pub fn in_dir(dir: &Path) -> Self {
		Self {
			config: dir.join("config.json"),
			secrets: dir.join("secrets.json"),
			subscriptions: dir.join("subscriptions.json"),
		}
	}

	pub fn discover(config_override: Option<&Path>) -> Self {
		let dir = dirs::config_dir()
			.unwrap_or_else(|| PathBuf::from("."))
			.join("cascade");
		let mut paths = Self::in_dir(&dir);
		if let Some(path) = config_override {
			paths.config = path.to_path_buf();
		}
		paths
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	pub bind: IpAddr,
	pub port: u16,
	/// Login password. A random one is generated per run when unset.
	pub password: Option<String>,
	/// Host the remote-debug ports are reached on.
	pub cdp_host: String,
	pub cdp_ports: Vec<u16>,
	pub discovery_interval_ms: u64,
	pub poll_interval_ms: u64,
	/// Overrides the push-subscription store location.
	pub push_store: Option<PathBuf>,
	/// VAPID contact sent to push services.
	pub push_subject: String,
	/// Client pages served behind the login.
	pub static_dir: Option<PathBuf>,
	pub tuning: Tuning,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			port: DEFAULT_PORT,
			password: None,
			cdp_host: "127.0.0.1".to_string(),
			cdp_ports: DEFAULT_CDP_PORTS.to_vec(),
			discovery_interval_ms: 10_000,
			poll_interval_ms: 1_000,
			push_store: None,
			push_subject: DEFAULT_PUSH_SUBJECT.to_string(),
			static_dir: None,
			tuning: Tuning::default(),
		}
	}
}

impl Config {
	/// Reads `path`, falling back to defaults when the file does not exist.
	pub fn load(path: &Path) -> Result<Self> {
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
		};
		let config = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
		info!(target = "cascade.server", path = %path.display(), "loaded config");
		Ok(config)
	}

	/// Overlays `CASCADE_*` variables as returned by `var`.
	pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
		if let Some(password) = var(ENV_PASSWORD).filter(|p| !p.is_empty()) {
			self.password = Some(password);
		}
		if let Some(port) = var(ENV_PORT) {
			self.port = port
				.trim()
				.parse()
				.with_context(|| format!("{ENV_PORT}={port} is not a port"))?;
		}
		Ok(())
	}

	pub fn apply_cli(&mut self, cli: &Cli) {
		if let Some(port) = cli.port {
			self.port = port;
		}
		if let Some(bind) = cli.bind {
			self.bind = bind;
		}
		if let Some(password) = &cli.password {
			self.password = Some(password.clone());
		}
		if !cli.cdp_ports.is_empty() {
			self.cdp_ports = cli.cdp_ports.clone();
		}
		if let Some(dir) = &cli.static_dir {
			self.static_dir = Some(dir.clone());
		}
	}

	pub fn listen_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind, self.port)
	}

	pub fn discovery_interval(&self) -> Duration {
		Duration::from_millis(self.discovery_interval_ms)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn push_store_path(&self, paths: &ConfigPaths) -> PathBuf {
		self.push_store.clone().unwrap_or_else(|| paths.subscriptions.clone())
	}
}

/// Generated once and reused across restarts so issued tokens stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secrets {
	pub auth_secret: String,
	/// PKCS#8 PEM of the VAPID private key. Empty in files written before
	/// push delivery was signed; filled in on the next load.
	#[serde(default)]
	pub vapid_private_key: String,
}

impl Secrets {
	pub fn generate() -> Result<Self> {
		let mut bytes = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut bytes);
		Ok(Self {
			auth_secret: hex::encode(bytes),
			vapid_private_key: VapidKeys::generate()?.private_pem().to_string(),
		})
	}

	pub fn load_or_create(path: &Path) -> Result<Self> {
		if path.exists() {
			let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
			let mut secrets: Self =
				serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
			if secrets.vapid_private_key.is_empty() {
				secrets.vapid_private_key = VapidKeys::generate()?.private_pem().to_string();
				save_secrets(path, &secrets).with_context(|| format!("writing {}", path.display()))?;
				info!(target = "cascade.server", path = %path.display(), "generated push signing key");
			}
			return Ok(secrets);
		}
		let secrets = Self::generate()?;
		save_secrets(path, &secrets).with_context(|| format!("writing {}", path.display()))?;
		info!(target = "cascade.server", path = %path.display(), "generated signing secrets");
		Ok(secrets)
	}

	pub fn vapid_keys(&self) -> Result<VapidKeys> {
		VapidKeys::from_pem(&self.vapid_private_key).context("parsing the VAPID private key")
	}

	pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
		if let Some(secret) = var(ENV_AUTH_SECRET).filter(|s| !s.is_empty()) {
			self.auth_secret = secret;
		}
	}
}

pub(crate) fn save_json<T: Serialize>(path: &Path, data: &T) -> std::io::Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, serde_json::to_string_pretty(data)?)?;
	Ok(())
}

fn save_secrets(path: &Path, secrets: &Secrets) -> std::io::Result<()> {
	save_json(path, secrets)?;
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
	}
	Ok(())
}
