//! Status sink: progress events emitted by the orchestrator

mod channel;
mod handler;
mod logging;

pub use channel::ChannelHandler;
pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
