//! Sprite batching for the GPU draw path.

mod builder;

pub use builder::{BatchBuilder, BatchConfig, BatchSink, BatchStats, CanvasSink};
