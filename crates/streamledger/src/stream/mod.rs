//! Push stream consumption.

mod controller;
mod request;
mod transport;

pub use controller::{StreamController, StreamEndpoints, StreamState, StreamStep};
pub use request::{StreamRequest, document_url};
pub use transport::{
    ChannelConnection, ChannelTransport, EventSourceTransport, FrameStream, PushTransport,
};
