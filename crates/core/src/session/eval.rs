//! Script evaluation for [`Session`].

use cascade_protocol::cdp::{EvaluateParams, EvaluateResult, methods};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{Metadata, Session};
use crate::error::{Error, Result};
use crate::scripts::{self, MetadataReport};
use crate::snapshot::RawCapture;

impl Session {
	/// Evaluates `expression` in the chat panel's context.
	///
	/// A stale context or a throwing script is retried once against a freshly
	/// resolved context; the second failure is returned.
	pub async fn evaluate(&self, expression: &str) -> Result<Value> {
		self.evaluate_with_retry(expression, false).await
	}

	/// Like [`evaluate`](Self::evaluate), awaiting a returned promise.
	pub async fn evaluate_awaiting(&self, expression: &str) -> Result<Value> {
		self.evaluate_with_retry(expression, true).await
	}

	/// Evaluates and deserializes the returned value to `T`.
	pub async fn evaluate_typed<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
		let value = self.evaluate(expression).await?;
		Ok(serde_json::from_value(value)?)
	}

	async fn evaluate_with_retry(&self, expression: &str, await_promise: bool) -> Result<Value> {
		let context = match self.root_context() {
			Some(context) => context,
			None => self.resolve_context().await?,
		};

		match self.evaluate_in(context, expression, await_promise).await {
			Err(e) if e.is_context_retryable() => {
				debug!(
					target = "cascade.session",
					session = %self.id,
					context,
					error = %e,
					script = scripts::script_name(expression).unwrap_or("inline"),
					"evaluation failed, re-resolving context"
				);
				self.set_root_context(None);
				let context = self.resolve_context().await?;
				self.evaluate_in(context, expression, await_promise).await
			}
			other => other,
		}
	}

	/// Single evaluation in an explicit context, no retry.
	pub(crate) async fn evaluate_in(&self, context: i64, expression: &str, await_promise: bool) -> Result<Value> {
		let mut params = EvaluateParams::by_value(expression, Some(context));
		if await_promise {
			params = params.awaiting();
		}
		let raw = self
			.channel
			.call(methods::RUNTIME_EVALUATE, serde_json::to_value(params)?)
			.await?;
		let result: EvaluateResult = serde_json::from_value(raw)?;
		if let Some(exception) = result.exception_details {
			return Err(Error::Evaluation(exception.message()));
		}
		Ok(result.result.value.unwrap_or(Value::Null))
	}

	/// Finds the context hosting the chat panel and reads its metadata.
	///
	/// The cached root context is tried first; otherwise every known context
	/// is scanned in order and the first hit becomes the new root. Returns
	/// `None` when no context hosts the panel.
	pub async fn read_metadata(&self) -> Result<Option<Metadata>> {
		let script = scripts::metadata();

		if let Some(context) = self.root_context() {
			match self.metadata_in(context, &script).await {
				Ok(Some(metadata)) => return Ok(Some(metadata)),
				Err(e) if e.is_connection_lost() => return Err(e),
				_ => self.set_root_context(None),
			}
		}

		for context in self.channel.contexts() {
			match self.metadata_in(context.id, &script).await {
				Ok(Some(metadata)) => {
					self.set_root_context(Some(context.id));
					return Ok(Some(metadata));
				}
				Err(e) if e.is_connection_lost() => return Err(e),
				_ => continue,
			}
		}
		Ok(None)
	}

	async fn metadata_in(&self, context: i64, script: &str) -> Result<Option<Metadata>> {
		let value = self.evaluate_in(context, script, false).await?;
		let report: MetadataReport = serde_json::from_value(value)?;
		if !report.found {
			return Ok(None);
		}
		Ok(Some(Metadata {
			chat_title: report.chat_title.unwrap_or_else(|| "Agent".to_string()),
			active: report.is_active,
			quota: report.quota,
		}))
	}

	async fn resolve_context(&self) -> Result<i64> {
		self.read_metadata().await?;
		self.root_context().ok_or(Error::ContextUnavailable)
	}

	/// Runs the capture script. `None` when the chat container is absent.
	pub async fn capture(&self) -> Result<Option<RawCapture>> {
		let value = self.evaluate(&scripts::capture()).await?;
		if value.is_null() {
			return Ok(None);
		}
		Ok(Some(serde_json::from_value(value)?))
	}

	/// Re-captures the stylesheet text. Returns true when it changed.
	pub async fn refresh_styles(&self) -> Result<bool> {
		let value = self.evaluate(&scripts::styles()).await?;
		let css = value.as_str().unwrap_or_default().to_string();
		Ok(self.set_css(css))
	}
}
