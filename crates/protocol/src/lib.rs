//! Wire types for the cascade bridge.
//!
//! Two protocols meet in this crate:
//!
//! - [`cdp`]: the IDE's remote-debugging protocol as spoken upstream
//!   (request/response/event envelopes, execution contexts, script
//!   evaluation and input injection), plus the discovery target listing.
//! - [`api`] and [`events`]: the downstream surface consumed by mirror
//!   clients (HTTP bodies and push-channel events).
//!
//! Types here are pure data. Behaviour lives in `cascade-runtime` and
//! `cascade-bridge`.

pub mod api;
pub mod cdp;
pub mod events;

pub use api::*;
pub use events::*;
