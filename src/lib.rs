//! Capture the operations queued on a device stream once, then replay
//! them as an instantiated graph with a single launch.
//!
//! A [`GraphRecorder`] owns one cached graph per [`GraphAnnotation`],
//! letting a caller keep several variants of the same computation
//! (different batch sizes, say) and pick between them per run.
//!
//! Graphs are instantiated against whichever runtime is selected with
//! the `cuda` or `rocm` feature, or the always available host runtime.

pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod recorder;
#[cfg(test)]
mod testing;

pub use annotation::GraphAnnotation;
pub use cache::GraphCache;
pub use config::RecorderConfig;
pub use error::{GraphError, GraphResult};
pub use recorder::{GraphRecorder, RecorderState};
pub use stream_graph_gpu::runtime;
