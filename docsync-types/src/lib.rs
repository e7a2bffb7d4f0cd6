//! Shared types for the docsync server.
//!
//! Identifier newtypes and millisecond-timestamp helpers used by every
//! other crate in the workspace.

mod ids;
mod timestamp;

pub use ids::{ClientId, ConnectionId, DocumentId, MessageId, UserId};
pub use timestamp::now_millis;
