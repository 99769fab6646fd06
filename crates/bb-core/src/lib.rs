//! Contracts and client-side state for monitoring the Buffer Buddy plugin.

pub mod error;
pub mod plugin_api;
pub mod reconciler;
pub mod status;

pub use error::TransportError;
pub use plugin_api::{PluginState, PushMessage, SnapshotResponse, UpdatePayload, DEFAULT_PLUGIN_ID};
pub use reconciler::{ActivationReason, PluginApi, StatusReconciler};
pub use status::BufferStatus;
