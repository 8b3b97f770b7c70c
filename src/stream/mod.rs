//! Output stream declaration
//!
//! Streams are declared once, before the container header is written, and
//! keep the index they were given for the rest of the session.

pub mod descriptor;
pub mod registry;

pub use descriptor::{
    AudioStreamConfig, StreamConfig, StreamDescriptor, StreamKind, StreamMode, VideoStreamConfig,
};
pub use registry::StreamRegistry;
