//! Bridging engine that mirrors an IDE chat panel onto remote clients.
//!
//! The engine attaches to the IDE's remote-debug endpoints, keeps one
//! [`Session`] per chat-capable window in a [`SessionRegistry`], polls
//! snapshots of the chat subtree and fans change signals out through the
//! [`BroadcastHub`]. Client gestures come back in through the
//! [`Coordinator`], which turns them into native input events.
//!
//! The [`mirror`] module holds the consumer side: the reconciler that patches
//! snapshots into a persistent local tree.

pub mod completion;
pub mod discovery;
pub mod error;
pub mod hub;
pub mod interaction;
pub mod mirror;
pub mod notify;
pub mod poller;
pub mod registry;
pub mod rules;
pub mod scripts;
pub mod session;
pub mod snapshot;
pub mod tuning;

#[cfg(test)]
pub(crate) mod testing;

pub use cascade_protocol::{Cascade, QuotaInfo, ServerEvent, Snapshot};
pub use completion::{CompletionDetector, CompletionState};
pub use discovery::{
	Discovery, HttpTargetSource, SessionConnector, SweepReport, TargetSource, WebSocketConnector, is_chat_window,
	stable_id,
};
pub use error::{Error, Result};
pub use hub::{BroadcastHub, ClientId};
pub use interaction::{Coordinator, ScrollSync};
pub use mirror::{MirrorClient, MirrorHost, MirrorView, SnapshotSource};
pub use notify::{
	Delivery, DispatchReport, HttpPushTransport, MemorySubscriptionStore, NotificationDispatcher, PushTransport,
	SubscriptionStore, VapidKeys,
};
pub use poller::{PollOutcome, Poller};
pub use registry::SessionRegistry;
pub use rules::{Classification, ElementInfo, classify_element};
pub use session::{Metadata, Session};
pub use snapshot::{RawCapture, SnapshotEngine, SnapshotOutcome, SnapshotSlot, content_hash};
pub use tuning::Tuning;
