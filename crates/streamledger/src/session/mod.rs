//! Durable session state.

mod models;
mod service;

pub use models::{CURRENT_SESSION_KEY, SessionKeys, SessionSnapshot};
pub use service::Session;
