//! Capture of supervised subprocess output into rotating log files.

pub mod line_buffer;
pub mod rotating;
pub mod writer;

pub use line_buffer::{LineBuffer, MAX_BUFFER_BYTES};
pub use rotating::RotatingFileSink;
pub use writer::{InstanceLogWriter, OutputStream, STDERR_MARKER};
