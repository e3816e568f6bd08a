//! Shared helpers for unit tests

use std::sync::Arc;

use stream_graph_gpu::runtime::{CaptureMode, Gpu, GpuDevice, GpuGraphExec, GpuStream};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Fresh stream on device 0
pub fn stream<G: Gpu>() -> Arc<GpuStream<G>> {
    init_logging();
    let device = GpuDevice::<G>::new(0).unwrap();
    GpuStream::new(device).unwrap()
}

/// Zeroed device allocation, ready for use once this returns
pub fn alloc<G: Gpu>(stream: &GpuStream<G>, bytes: usize) -> G::DevicePtr {
    let ptr = stream.malloc(bytes).unwrap();
    fill(stream, ptr, bytes, 0);
    ptr
}

pub fn fill<G: Gpu>(stream: &GpuStream<G>, ptr: G::DevicePtr, bytes: usize, value: u8) {
    unsafe { stream.memset(ptr, bytes, value).unwrap() };
    stream.sync().unwrap();
}

pub fn read<G: Gpu>(stream: &GpuStream<G>, ptr: G::DevicePtr, bytes: usize) -> Vec<u8> {
    let mut host = vec![0u8; bytes];
    unsafe { stream.memcpy_d2h(ptr, host.as_mut_ptr().cast(), bytes).unwrap() };
    stream.sync().unwrap();
    host
}

/// Capture and instantiate a graph that fills `bytes` at `ptr` with `value`
pub fn memset_graph<G: Gpu>(stream: &GpuStream<G>, ptr: G::DevicePtr, bytes: usize, value: u8) -> GpuGraphExec<G> {
    stream.begin_capture(CaptureMode::Global).unwrap();
    unsafe { stream.memset(ptr, bytes, value).unwrap() };
    let graph = stream.end_capture().unwrap();
    graph.instantiate().unwrap()
}
