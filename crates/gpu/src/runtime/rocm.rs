//! Minimal wrapper around the HIP runtime

use std::{
    ffi::{c_int, c_void},
    mem::MaybeUninit,
};

use super::bindings::{CaptureMode, GpuBindings};

use raw::*;

/// Marker for the ROCm runtime
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ROCm;

/// Error type for the ROCm runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ROCmError {
    Runtime(String),
    Message(String),
}

impl From<String> for ROCmError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

type ROCmResult = Result<(), ROCmError>;

fn ptr(dev_ptr: u64) -> *mut c_void {
    dev_ptr as usize as *mut c_void
}

#[allow(unsafe_op_in_unsafe_fn)]
impl GpuBindings for ROCm {
    type Err = ROCmError;
    type Dev = hipDevice;
    type Ptr = u64;
    type Ctx = hipDevice;
    type Stream = hipStream;
    type Graph = hipGraph;
    type GraphExec = hipGraphExec;

    unsafe fn driver_init() -> ROCmResult {
        err(hipInit(0))
    }

    unsafe fn device_get(ordinal: c_int) -> Result<hipDevice, ROCmError> {
        let mut device = MaybeUninit::uninit();
        err(hipDeviceGet(device.as_mut_ptr(), ordinal))?;
        Ok(device.assume_init())
    }

    unsafe fn context_create(device: hipDevice) -> Result<hipDevice, ROCmError> {
        Ok(device)
    }

    unsafe fn context_destroy(_device: hipDevice) -> ROCmResult {
        Ok(())
    }

    unsafe fn context_set(ctx: hipDevice) -> ROCmResult {
        err(hipSetDevice(ctx))
    }

    unsafe fn stream_create() -> Result<hipStream, ROCmError> {
        let mut stream = MaybeUninit::uninit();
        err(hipStreamCreate(stream.as_mut_ptr()))?;
        Ok(stream.assume_init())
    }

    unsafe fn stream_destroy(stream: hipStream) -> ROCmResult {
        err(hipStreamDestroy(stream))
    }

    unsafe fn stream_sync(stream: hipStream) -> ROCmResult {
        err(hipStreamSynchronize(stream))
    }

    unsafe fn stream_malloc(stream: hipStream, bytes: usize) -> Result<u64, ROCmError> {
        let mut dev_ptr = std::ptr::null_mut();
        err(hipMallocAsync(&mut dev_ptr, bytes, stream))?;
        Ok(dev_ptr as usize as u64)
    }

    unsafe fn stream_free(stream: hipStream, dev_ptr: u64) -> ROCmResult {
        err(hipFreeAsync(ptr(dev_ptr), stream))
    }

    unsafe fn stream_memset(stream: hipStream, dev_ptr: u64, bytes: usize, value: u8) -> ROCmResult {
        err(hipMemsetAsync(ptr(dev_ptr), value as c_int, bytes, stream))
    }

    unsafe fn stream_memcpy_d2h(stream: hipStream, dst: *mut c_void, src: u64, bytes: usize) -> ROCmResult {
        err(hipMemcpyAsync(dst, ptr(src), bytes, hipMemcpyKind::hipMemcpyDeviceToHost, stream))
    }

    unsafe fn stream_memcpy_h2d(stream: hipStream, dst: u64, src: *const c_void, bytes: usize) -> ROCmResult {
        err(hipMemcpyAsync(ptr(dst), src, bytes, hipMemcpyKind::hipMemcpyHostToDevice, stream))
    }

    unsafe fn stream_memcpy_d2d(stream: hipStream, dst: u64, src: u64, bytes: usize) -> ROCmResult {
        err(hipMemcpyAsync(ptr(dst), ptr(src), bytes, hipMemcpyKind::hipMemcpyDeviceToDevice, stream))
    }

    unsafe fn stream_begin_capture(stream: hipStream, mode: CaptureMode) -> ROCmResult {
        let mode = match mode {
            CaptureMode::Global => hipStreamCaptureMode::hipStreamCaptureModeGlobal,
            CaptureMode::ThreadLocal => hipStreamCaptureMode::hipStreamCaptureModeThreadLocal,
            CaptureMode::Relaxed => hipStreamCaptureMode::hipStreamCaptureModeRelaxed,
        };

        err(hipStreamBeginCapture(stream, mode))
    }

    unsafe fn stream_end_capture(stream: hipStream) -> Result<hipGraph, ROCmError> {
        let mut graph = std::ptr::null_mut();
        err(hipStreamEndCapture(stream, &mut graph))?;

        if graph.is_null() {
            return Err(ROCmError::Message("Stream capture produced a null graph!".to_string()));
        }

        Ok(graph)
    }

    unsafe fn stream_is_capturing(stream: hipStream) -> Result<bool, ROCmError> {
        let mut status = MaybeUninit::uninit();
        err(hipStreamIsCapturing(stream, status.as_mut_ptr()))?;
        Ok(status.assume_init() != hipStreamCaptureStatus::hipStreamCaptureStatusNone)
    }

    unsafe fn graph_instantiate(graph: hipGraph) -> Result<hipGraphExec, ROCmError> {
        let mut exec = MaybeUninit::uninit();
        err(hipGraphInstantiate(exec.as_mut_ptr(), graph, std::ptr::null_mut(), std::ptr::null_mut(), 0))?;
        Ok(exec.assume_init())
    }

    unsafe fn graph_destroy(graph: hipGraph) -> ROCmResult {
        err(hipGraphDestroy(graph))
    }

    unsafe fn graph_exec_launch(exec: hipGraphExec, stream: hipStream) -> ROCmResult {
        err(hipGraphLaunch(exec, stream))
    }

    unsafe fn graph_exec_destroy(exec: hipGraphExec) -> ROCmResult {
        err(hipGraphExecDestroy(exec))
    }
}

fn err(value: hipError) -> ROCmResult {
    if value == 0 {
        Ok(())
    } else {
        unsafe {
            let name = std::ffi::CStr::from_ptr(hipGetErrorName(value)).to_string_lossy();
            let desc = std::ffi::CStr::from_ptr(hipGetErrorString(value)).to_string_lossy();
            Err(ROCmError::Runtime(format!("{name}: {desc}")))
        }
    }
}

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(improper_ctypes)]
#[allow(clippy::enum_variant_names)]
#[allow(dead_code)]
mod raw {
    use std::ffi::{c_char, c_int, c_uint, c_void};

    #[repr(C)]
    #[derive(Debug, Copy, Clone)]
    pub struct Opaque([u8; 0]);

    pub type hipError = c_int;
    pub type hipDevice = c_int;
    pub type hipStream = *mut Opaque;
    pub type hipGraph = *mut Opaque;
    pub type hipGraphExec = *mut Opaque;
    pub type hipGraphNode = *mut Opaque;

    #[repr(i32)]
    #[non_exhaustive]
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub enum hipMemcpyKind {
        hipMemcpyHostToHost = 0,
        hipMemcpyHostToDevice = 1,
        hipMemcpyDeviceToHost = 2,
        hipMemcpyDeviceToDevice = 3,
        hipMemcpyDefault = 4,
    }

    #[repr(i32)]
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub enum hipStreamCaptureMode {
        hipStreamCaptureModeGlobal = 0,
        hipStreamCaptureModeThreadLocal = 1,
        hipStreamCaptureModeRelaxed = 2,
    }

    #[repr(i32)]
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub enum hipStreamCaptureStatus {
        hipStreamCaptureStatusNone = 0,
        hipStreamCaptureStatusActive = 1,
        hipStreamCaptureStatusInvalidated = 2,
    }

    #[rustfmt::skip]
    unsafe extern "C" {
        pub fn hipGetErrorName(error: hipError) -> *const c_char;
        pub fn hipGetErrorString(error: hipError) -> *const c_char;
        pub fn hipInit(flags: c_uint) -> hipError;
        pub fn hipDeviceGet(device: *mut hipDevice, ordinal: c_int) -> hipError;
        pub fn hipSetDevice(device: c_int) -> hipError;
        pub fn hipStreamCreate(stream: *mut hipStream) -> hipError;
        pub fn hipStreamDestroy(stream: hipStream) -> hipError;
        pub fn hipStreamSynchronize(stream: hipStream) -> hipError;
        pub fn hipMallocAsync(devPtr: *mut *mut c_void, size: usize, stream: hipStream) -> hipError;
        pub fn hipFreeAsync(devPtr: *mut c_void, stream: hipStream) -> hipError;
        pub fn hipMemsetAsync(devPtr: *mut c_void, value: c_int, count: usize, stream: hipStream) -> hipError;
        pub fn hipMemcpyAsync(
            dst: *mut c_void,
            src: *const c_void,
            count: usize,
            kind: hipMemcpyKind,
            stream: hipStream,
        ) -> hipError;
        pub fn hipStreamBeginCapture(stream: hipStream, mode: hipStreamCaptureMode) -> hipError;
        pub fn hipStreamEndCapture(stream: hipStream, pGraph: *mut hipGraph) -> hipError;
        pub fn hipStreamIsCapturing(stream: hipStream, pCaptureStatus: *mut hipStreamCaptureStatus) -> hipError;
        pub fn hipGraphInstantiate(
            pGraphExec: *mut hipGraphExec,
            graph: hipGraph,
            pErrorNode: *mut hipGraphNode,
            pLogBuffer: *mut c_char,
            bufferSize: usize,
        ) -> hipError;
        pub fn hipGraphLaunch(graphExec: hipGraphExec, stream: hipStream) -> hipError;
        pub fn hipGraphDestroy(graph: hipGraph) -> hipError;
        pub fn hipGraphExecDestroy(graphExec: hipGraphExec) -> hipError;
    }
}
