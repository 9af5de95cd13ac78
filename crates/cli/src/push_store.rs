//! Push subscriptions persisted as a JSON array.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge::SubscriptionStore;
use cascade_protocol::PushSubscription;
use tokio::sync::Mutex;

use crate::config::save_json;

/// File-backed [`SubscriptionStore`]. Every mutation rewrites the file.
#[derive(Debug)]
pub struct FileSubscriptionStore {
	path: PathBuf,
	lock: Mutex<()>,
}

impl FileSubscriptionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn read(&self) -> bridge::Result<Vec<PushSubscription>> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
			Ok(content) => Ok(serde_json::from_str(&content)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(e.into()),
		}
	}

	async fn write(&self, subscriptions: Vec<PushSubscription>) -> bridge::Result<()> {
		let path = self.path.clone();
		tokio::task::spawn_blocking(move || save_json(&path, &subscriptions))
			.await
			.map_err(std::io::Error::other)??;
		Ok(())
	}
}

#[async_trait]
impl SubscriptionStore for FileSubscriptionStore {
	async fn list(&self) -> bridge::Result<Vec<PushSubscription>> {
		let _guard = self.lock.lock().await;
		self.read().await
	}

	async fn add(&self, subscription: PushSubscription) -> bridge::Result<()> {
		let _guard = self.lock.lock().await;
		let mut subscriptions = self.read().await?;
		subscriptions.retain(|s| s.endpoint != subscription.endpoint);
		subscriptions.push(subscription);
		self.write(subscriptions).await
	}

	async fn remove(&self, endpoint: &str) -> bridge::Result<bool> {
		let _guard = self.lock.lock().await;
		let mut subscriptions = self.read().await?;
		let before = subscriptions.len();
		subscriptions.retain(|s| s.endpoint != endpoint);
		if subscriptions.len() == before {
			return Ok(false);
		}
		self.write(subscriptions).await?;
		Ok(true)
	}
}
