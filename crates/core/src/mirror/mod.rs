//! Consumer side of the bridge: reconciles snapshots into a persistent tree.
//!
//! A [`MirrorClient`] follows change signals for the selected session and
//! hands each fetched [`Snapshot`](cascade_protocol::Snapshot) to its
//! [`MirrorView`], which patches the tree in place rather than replacing it.
//! Rendering is left to a [`MirrorHost`].

mod client;
mod layout;
pub mod markup;
mod patch;
mod view;

pub use self::client::{HttpSnapshotSource, MirrorClient, SnapshotSource};
pub use self::layout::{ScrollMetrics, compress_virtual_rows, content_bottom};
pub use self::markup::{Element, Node, NodeId};
pub use self::patch::{PatchStats, morph};
pub use self::view::{ApplyOutcome, MirrorHost, MirrorView, VIEWPORT_ID};
