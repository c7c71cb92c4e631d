//! Consumers of the streaming cache.

mod reader;

pub use reader::{ReaderConfig, SampleReader};
