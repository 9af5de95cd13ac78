//! Text-frame transports for debug sessions.
//!
//! A transport is reduced to a pair of channels: the session pushes serialized
//! requests into `outbound` and reads raw frames from `inbound`. When the remote
//! side goes away the inbound channel closes, which is how the session learns
//! about connection loss.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::error::{Error, Result};

/// Channel halves handed to a [`DebugSession`](crate::DebugSession).
pub struct TransportParts {
	pub outbound: mpsc::UnboundedSender<String>,
	pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Remote end of an in-memory transport.
///
/// Lets tests (and embedders) play the role of the debug endpoint: read what
/// the session sent, and inject responses or events.
pub struct ChannelPeer {
	/// Frames the session wrote.
	pub sent: mpsc::UnboundedReceiver<String>,
	/// Inject frames as if the remote sent them. Dropping it closes the connection.
	pub inject: mpsc::UnboundedSender<String>,
}

/// Creates a connected in-memory transport pair.
pub fn channel_transport() -> (TransportParts, ChannelPeer) {
	let (outbound, sent) = mpsc::unbounded_channel();
	let (inject, inbound) = mpsc::unbounded_channel();
	(TransportParts { outbound, inbound }, ChannelPeer { sent, inject })
}

/// Websocket transport to a `webSocketDebuggerUrl`.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Performs the websocket handshake and spawns the reader/writer tasks.
	pub async fn connect(url: &str) -> Result<TransportParts> {
		let (stream, _) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed(e.to_string()))?;
		let (mut sink, mut source) = stream.split();

		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
		let (inbound_tx, inbound) = mpsc::unbounded_channel::<String>();

		let writer_url = url.to_string();
		tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				if let Err(e) = sink.send(WsMessage::Text(text)).await {
					debug!(target = "cascade.transport", url = %writer_url, error = %e, "write failed");
					break;
				}
			}
			let _ = sink.close().await;
		});

		let reader_url = url.to_string();
		tokio::spawn(async move {
			while let Some(frame) = source.next().await {
				let text = match frame {
					Ok(WsMessage::Text(text)) => text,
					Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
						Ok(text) => text,
						Err(_) => continue,
					},
					Ok(WsMessage::Close(_)) => break,
					Ok(_) => continue,
					Err(e) => {
						debug!(target = "cascade.transport", url = %reader_url, error = %e, "read failed");
						break;
					}
				};
				if inbound_tx.send(text).is_err() {
					break;
				}
			}
			debug!(target = "cascade.transport", url = %reader_url, "socket closed");
		});

		Ok(TransportParts { outbound, inbound })
	}
}
