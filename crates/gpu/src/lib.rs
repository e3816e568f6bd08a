//! Crate for managing CUDA/ROCm devices and streams, and for capturing
//! stream operations into replayable device graphs.
//!
//! A host emulation of a single device is always available, which
//! is what runs when neither the `cuda` nor `rocm` feature is enabled.

pub mod runtime;
