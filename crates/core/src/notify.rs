//! Push subscriptions and best-effort notification delivery.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cascade_protocol::{PushPayload, PushSubscription};
use futures_util::future::join_all;
use p256::SecretKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, info, warn};
use web_push::{ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage, WebPushMessageBuilder};

use crate::error::{Error, Result};

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
	Delivered,
	/// The endpoint no longer exists; the subscription should be dropped.
	Gone,
	/// Transient failure, left for the next event.
	Failed(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
	async fn deliver(&self, subscription: &PushSubscription, payload: &PushPayload) -> Delivery;
}

/// Persistent set of subscriptions, keyed by endpoint.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
	async fn list(&self) -> Result<Vec<PushSubscription>>;
	/// Adds or replaces the subscription with the same endpoint.
	async fn add(&self, subscription: PushSubscription) -> Result<()>;
	/// Returns whether a subscription was removed.
	async fn remove(&self, endpoint: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
	subscriptions: Mutex<Vec<PushSubscription>>,
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
	async fn list(&self) -> Result<Vec<PushSubscription>> {
		Ok(self.subscriptions.lock().clone())
	}

	async fn add(&self, subscription: PushSubscription) -> Result<()> {
		let mut subscriptions = self.subscriptions.lock();
		subscriptions.retain(|s| s.endpoint != subscription.endpoint);
		subscriptions.push(subscription);
		Ok(())
	}

	async fn remove(&self, endpoint: &str) -> Result<bool> {
		let mut subscriptions = self.subscriptions.lock();
		let before = subscriptions.len();
		subscriptions.retain(|s| s.endpoint != endpoint);
		Ok(subscriptions.len() != before)
	}
}

/// Application server keypair that signs push requests (VAPID).
#[derive(Clone)]
pub struct VapidKeys {
	private_pem: String,
	public_key: String,
}

impl VapidKeys {
	pub fn generate() -> Result<Self> {
		let secret = SecretKey::random(&mut OsRng);
		let pem = secret
			.to_pkcs8_pem(LineEnding::LF)
			.map_err(|e| Error::PushKey(e.to_string()))?;
		Ok(Self::from_secret(&secret, pem.as_str().to_owned()))
	}

	/// Parses a PKCS#8 PEM private key as written by [`VapidKeys::private_pem`].
	pub fn from_pem(pem: &str) -> Result<Self> {
		let secret = SecretKey::from_pkcs8_pem(pem).map_err(|e| Error::PushKey(e.to_string()))?;
		Ok(Self::from_secret(&secret, pem.to_owned()))
	}

	fn from_secret(secret: &SecretKey, private_pem: String) -> Self {
		let point = secret.public_key().to_encoded_point(false);
		Self {
			private_pem,
			public_key: URL_SAFE_NO_PAD.encode(point.as_bytes()),
		}
	}

	/// Uncompressed public point, base64url without padding, the form
	/// `PushManager.subscribe({ applicationServerKey })` takes.
	pub fn public_key(&self) -> &str {
		&self.public_key
	}

	pub fn private_pem(&self) -> &str {
		&self.private_pem
	}
}

impl fmt::Debug for VapidKeys {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VapidKeys")
			.field("public_key", &self.public_key)
			.finish_non_exhaustive()
	}
}

/// Web Push delivery: the JSON payload is encrypted for the subscription's
/// keys (aes128gcm) and the request carries a VAPID signature.
///
/// 404 and 410 mean the subscription is gone. 403 means it was created for
/// another application server key and can never accept ours.
#[derive(Debug, Clone)]
pub struct HttpPushTransport {
	client: reqwest::Client,
	keys: VapidKeys,
	subject: String,
	ttl_secs: u32,
}

impl HttpPushTransport {
	/// `subject` is the VAPID contact, a `mailto:` or `https:` URL.
	pub fn new(client: reqwest::Client, keys: VapidKeys, subject: impl Into<String>) -> Self {
		Self {
			client,
			keys,
			subject: subject.into(),
			ttl_secs: 60,
		}
	}

	fn message(
		&self,
		subscription: &PushSubscription,
		payload: &PushPayload,
	) -> std::result::Result<WebPushMessage, String> {
		let info = SubscriptionInfo::new(
			subscription.endpoint.as_str(),
			subscription.keys.p256dh.as_str(),
			subscription.keys.auth.as_str(),
		);
		let mut signature =
			VapidSignatureBuilder::from_pem(self.keys.private_pem().as_bytes(), &info).map_err(|e| e.to_string())?;
		signature.add_claim("sub", self.subject.as_str());
		let signature = signature.build().map_err(|e| e.to_string())?;

		let content = serde_json::to_vec(payload).map_err(|e| e.to_string())?;
		let mut builder = WebPushMessageBuilder::new(&info);
		builder.set_ttl(self.ttl_secs);
		builder.set_payload(ContentEncoding::Aes128Gcm, &content);
		builder.set_vapid_signature(signature);
		builder.build().map_err(|e| e.to_string())
	}

	fn request(&self, message: WebPushMessage) -> reqwest::RequestBuilder {
		let mut request = self
			.client
			.post(message.endpoint.to_string())
			.header("TTL", message.ttl.to_string());
		if let Some(payload) = message.payload {
			request = request
				.header(CONTENT_ENCODING, payload.content_encoding.to_str())
				.header(CONTENT_TYPE, "application/octet-stream");
			for (name, value) in payload.crypto_headers {
				request = request.header(name, value);
			}
			request = request.body(payload.content);
		}
		request
	}
}

fn classify(status: StatusCode) -> Delivery {
	match status {
		s if s.is_success() => Delivery::Delivered,
		StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::FORBIDDEN => Delivery::Gone,
		s => Delivery::Failed(format!("status {s}")),
	}
}

#[async_trait]
impl PushTransport for HttpPushTransport {
	async fn deliver(&self, subscription: &PushSubscription, payload: &PushPayload) -> Delivery {
		let message = match self.message(subscription, payload) {
			Ok(message) => message,
			Err(reason) => {
				warn!(target = "cascade.notify", endpoint = %subscription.endpoint, %reason, "push message could not be built");
				return Delivery::Failed(reason);
			}
		};
		match self.request(message).send().await {
			Ok(response) => {
				let status = response.status();
				if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
					warn!(target = "cascade.notify", endpoint = %subscription.endpoint, %status, "push service rejected the VAPID signature");
				}
				classify(status)
			}
			Err(e) => Delivery::Failed(e.to_string()),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
	pub delivered: usize,
	pub pruned: usize,
	pub failed: usize,
}

pub struct NotificationDispatcher {
	store: Arc<dyn SubscriptionStore>,
	transport: Arc<dyn PushTransport>,
}

impl NotificationDispatcher {
	pub fn new(store: Arc<dyn SubscriptionStore>, transport: Arc<dyn PushTransport>) -> Self {
		Self { store, transport }
	}

	pub async fn subscribe(&self, subscription: PushSubscription) -> Result<()> {
		info!(target = "cascade.notify", endpoint = %subscription.endpoint, "push subscription added");
		self.store.add(subscription).await
	}

	pub async fn unsubscribe(&self, endpoint: &str) -> Result<bool> {
		self.store.remove(endpoint).await
	}

	/// Delivers `payload` to every subscription in parallel, pruning gone ones.
	pub async fn dispatch(&self, payload: &PushPayload) -> Result<DispatchReport> {
		let subscriptions = self.store.list().await?;
		let results = join_all(subscriptions.iter().map(|s| self.transport.deliver(s, payload))).await;

		let mut report = DispatchReport::default();
		for (subscription, result) in subscriptions.iter().zip(results) {
			match result {
				Delivery::Delivered => report.delivered += 1,
				Delivery::Gone => {
					debug!(target = "cascade.notify", endpoint = %subscription.endpoint, "subscription gone, pruning");
					self.store.remove(&subscription.endpoint).await?;
					report.pruned += 1;
				}
				Delivery::Failed(reason) => {
					debug!(target = "cascade.notify", endpoint = %subscription.endpoint, %reason, "push delivery failed");
					report.failed += 1;
				}
			}
		}
		Ok(report)
	}
}
