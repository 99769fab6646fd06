//! HTTP and push-socket transport for the Buffer Buddy plugin API.

pub mod api;
pub mod error;
pub mod push;

pub use api::{ApiConfig, LoginSession, OctoPrintApi};
pub use error::ClientError;
pub use push::{push_loop, PushEvent};
