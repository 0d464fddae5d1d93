//! Message capture: reads every topic of an inventory into a capture set.

pub mod engine;
mod stream;
pub mod writer;

pub use engine::CaptureEngine;
pub use stream::TopicStream;
pub use writer::{CaptureWriter, RecordSequencer, TopicStats};
