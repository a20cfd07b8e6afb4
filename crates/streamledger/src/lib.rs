//! Streamledger
//!
//! Client-side engine for resumable server-sent event streams. Incoming
//! frames are applied to an ordered, deduplicated item ledger that survives
//! reloads; interrupted items are reattached with a continuation request
//! instead of being regenerated.

pub mod assets;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod lifecycle;
pub mod session;
pub mod storage;
pub mod stream;

pub use config::EngineConfig;
pub use credentials::{CredentialProvider, Credentials, StaticCredentials, TokenCredentials};
pub use engine::{Clock, ConversationEngine, LifecycleOutcome, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use ledger::{Item, ItemLedger, Role};
pub use lifecycle::{LifecycleAction, LifecycleMonitor, LifecyclePolicy, Staleness, Visibility};
pub use stream::{EventSourceTransport, StreamState, StreamStep};
