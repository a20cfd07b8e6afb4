//! Stream frame decoding.

mod parser;
mod types;

pub use parser::{ParseError, parse_frame};
pub use types::{DEFAULT_EVENT, DONE_SENTINEL, DataPayload, ERROR_SENTINEL, FrameEvent, RawFrame};
