//! Line-oriented event stream decoding
//!
//! The portal backend streams job progress and chat tokens over a long-lived
//! HTTP response using a newline-delimited `event:`/`data:` framing. This
//! module turns raw transport chunks into [`StreamEvent`] records.

mod events;
mod parser;

pub use events::{SseLine, StreamEvent};
pub use parser::{parse_sse_line, FrameDecoder};
