use std::{
    ffi::{c_int, c_void},
    fmt,
    hash::Hash,
};

/// How a stream capture interacts with potentially unsafe API calls
/// made by other threads while it is active
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Unsafe calls from any thread are prohibited during the capture
    #[default]
    Global,
    /// Only unsafe calls from the capturing thread are prohibited
    ThreadLocal,
    /// No calls are prohibited
    Relaxed,
}

/// This is a private trait, so nobody outside the crate can access these methods
/// and instead must go through the `GpuDevice`, `GpuStream` and graph structs
/// defined in `crate::runtime`
#[allow(clippy::missing_safety_doc)]
pub trait GpuBindings {
    type Err: fmt::Debug + Eq + From<String>;
    type Dev: Copy;
    type Ptr: Copy + Default + Eq + Hash;
    type Ctx: Copy;
    type Stream: Copy;
    type Graph: Copy;
    type GraphExec: Copy;

    unsafe fn driver_init() -> Result<(), Self::Err>;

    unsafe fn device_get(ordinal: c_int) -> Result<Self::Dev, Self::Err>;

    unsafe fn context_create(device: Self::Dev) -> Result<Self::Ctx, Self::Err>;

    unsafe fn context_destroy(device: Self::Dev) -> Result<(), Self::Err>;

    unsafe fn context_set(ctx: Self::Ctx) -> Result<(), Self::Err>;

    unsafe fn stream_create() -> Result<Self::Stream, Self::Err>;

    unsafe fn stream_destroy(stream: Self::Stream) -> Result<(), Self::Err>;

    unsafe fn stream_sync(stream: Self::Stream) -> Result<(), Self::Err>;

    unsafe fn stream_malloc(stream: Self::Stream, bytes: usize) -> Result<Self::Ptr, Self::Err>;

    unsafe fn stream_free(stream: Self::Stream, dev_ptr: Self::Ptr) -> Result<(), Self::Err>;

    unsafe fn stream_memset(stream: Self::Stream, dev_ptr: Self::Ptr, bytes: usize, value: u8)
    -> Result<(), Self::Err>;

    unsafe fn stream_memcpy_d2h(
        stream: Self::Stream,
        dst: *mut c_void,
        src: Self::Ptr,
        bytes: usize,
    ) -> Result<(), Self::Err>;

    unsafe fn stream_memcpy_h2d(
        stream: Self::Stream,
        dst: Self::Ptr,
        src: *const c_void,
        bytes: usize,
    ) -> Result<(), Self::Err>;

    unsafe fn stream_memcpy_d2d(
        stream: Self::Stream,
        dst: Self::Ptr,
        src: Self::Ptr,
        bytes: usize,
    ) -> Result<(), Self::Err>;

    unsafe fn stream_begin_capture(stream: Self::Stream, mode: CaptureMode) -> Result<(), Self::Err>;

    unsafe fn stream_end_capture(stream: Self::Stream) -> Result<Self::Graph, Self::Err>;

    unsafe fn stream_is_capturing(stream: Self::Stream) -> Result<bool, Self::Err>;

    unsafe fn graph_instantiate(graph: Self::Graph) -> Result<Self::GraphExec, Self::Err>;

    unsafe fn graph_destroy(graph: Self::Graph) -> Result<(), Self::Err>;

    unsafe fn graph_exec_launch(exec: Self::GraphExec, stream: Self::Stream) -> Result<(), Self::Err>;

    unsafe fn graph_exec_destroy(exec: Self::GraphExec) -> Result<(), Self::Err>;
}

const _C_INT_IS_I32: () = assert!(std::mem::size_of::<i32>() == std::mem::size_of::<c_int>());
