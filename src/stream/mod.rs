pub mod channel;
pub mod events;

pub use channel::{sse_stream, StreamingChannel};
pub use events::StreamEvent;
