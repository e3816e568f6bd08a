//! Minimal wrapper around the CUDA driver

use std::{
    ffi::{c_int, c_void},
    mem::MaybeUninit,
};

use super::bindings::{CaptureMode, GpuBindings};

use raw::*;

/// Marker for the CUDA runtime
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cuda;

/// Error type for the CUDA runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CudaError {
    Driver(String),
    Message(String),
}

impl From<String> for CudaError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

type CudaResult = Result<(), CudaError>;

#[allow(unsafe_op_in_unsafe_fn)]
impl GpuBindings for Cuda {
    type Err = CudaError;
    type Dev = CUdevice;
    type Ptr = CUdeviceptr;
    type Ctx = CUcontext;
    type Stream = CUstream;
    type Graph = CUgraph;
    type GraphExec = CUgraphExec;

    unsafe fn driver_init() -> CudaResult {
        error::driver(cuInit(0))
    }

    unsafe fn device_get(ordinal: c_int) -> Result<CUdevice, CudaError> {
        let mut device = MaybeUninit::uninit();
        error::driver(cuDeviceGet(device.as_mut_ptr(), ordinal))?;
        Ok(device.assume_init())
    }

    unsafe fn context_create(device: CUdevice) -> Result<CUcontext, CudaError> {
        let mut ctx = MaybeUninit::uninit();
        error::driver(cuDevicePrimaryCtxRetain(ctx.as_mut_ptr(), device))?;
        Ok(ctx.assume_init())
    }

    unsafe fn context_destroy(device: CUdevice) -> Result<(), Self::Err> {
        error::driver(cuDevicePrimaryCtxRelease_v2(device))
    }

    unsafe fn context_set(ctx: CUcontext) -> CudaResult {
        let mut curr = MaybeUninit::uninit();
        error::driver(cuCtxGetCurrent(curr.as_mut_ptr()))?;
        let curr = curr.assume_init();

        if curr.is_null() || curr != ctx {
            error::driver(cuCtxSetCurrent(ctx))?;
        }

        Ok(())
    }

    unsafe fn stream_create() -> Result<CUstream, CudaError> {
        let mut stream = MaybeUninit::uninit();
        error::driver(cuStreamCreate(stream.as_mut_ptr(), 0))?;
        Ok(stream.assume_init())
    }

    unsafe fn stream_destroy(stream: CUstream) -> CudaResult {
        error::driver(cuStreamDestroy(stream))
    }

    unsafe fn stream_sync(stream: CUstream) -> CudaResult {
        error::driver(cuStreamSynchronize(stream))
    }

    unsafe fn stream_malloc(stream: CUstream, bytes: usize) -> Result<CUdeviceptr, CudaError> {
        let mut dev_ptr = MaybeUninit::uninit();
        error::driver(cuMemAllocAsync(dev_ptr.as_mut_ptr(), bytes, stream))?;
        Ok(dev_ptr.assume_init())
    }

    unsafe fn stream_free(stream: CUstream, dev_ptr: CUdeviceptr) -> CudaResult {
        error::driver(cuMemFreeAsync(dev_ptr, stream))
    }

    unsafe fn stream_memset(stream: CUstream, dev_ptr: CUdeviceptr, bytes: usize, value: u8) -> Result<(), CudaError> {
        error::driver(cuMemsetD8Async(dev_ptr, value, bytes, stream))
    }

    unsafe fn stream_memcpy_d2h(stream: CUstream, dst: *mut c_void, src: CUdeviceptr, bytes: usize) -> CudaResult {
        error::driver(cuMemcpyDtoHAsync_v2(dst, src, bytes, stream))
    }

    unsafe fn stream_memcpy_h2d(stream: CUstream, dst: CUdeviceptr, src: *const c_void, bytes: usize) -> CudaResult {
        error::driver(cuMemcpyHtoDAsync_v2(dst, src, bytes, stream))
    }

    unsafe fn stream_memcpy_d2d(stream: CUstream, dst: CUdeviceptr, src: CUdeviceptr, bytes: usize) -> CudaResult {
        error::driver(cuMemcpyDtoDAsync_v2(dst, src, bytes, stream))
    }

    unsafe fn stream_begin_capture(stream: CUstream, mode: CaptureMode) -> CudaResult {
        let mode = match mode {
            CaptureMode::Global => CU_STREAM_CAPTURE_MODE_GLOBAL,
            CaptureMode::ThreadLocal => CU_STREAM_CAPTURE_MODE_THREAD_LOCAL,
            CaptureMode::Relaxed => CU_STREAM_CAPTURE_MODE_RELAXED,
        };

        error::driver(cuStreamBeginCapture_v2(stream, mode))
    }

    unsafe fn stream_end_capture(stream: CUstream) -> Result<CUgraph, CudaError> {
        let mut graph = std::ptr::null_mut();
        error::driver(cuStreamEndCapture(stream, &mut graph))?;

        if graph.is_null() {
            return Err(CudaError::Message("Stream capture produced a null graph!".to_string()));
        }

        Ok(graph)
    }

    unsafe fn stream_is_capturing(stream: CUstream) -> Result<bool, CudaError> {
        let mut status = MaybeUninit::uninit();
        error::driver(cuStreamIsCapturing(stream, status.as_mut_ptr()))?;
        Ok(status.assume_init() != CU_STREAM_CAPTURE_STATUS_NONE)
    }

    unsafe fn graph_instantiate(graph: CUgraph) -> Result<CUgraphExec, CudaError> {
        let mut exec = MaybeUninit::uninit();
        error::driver(cuGraphInstantiateWithFlags(exec.as_mut_ptr(), graph, 0))?;
        Ok(exec.assume_init())
    }

    unsafe fn graph_destroy(graph: CUgraph) -> CudaResult {
        error::driver(cuGraphDestroy(graph))
    }

    unsafe fn graph_exec_launch(exec: CUgraphExec, stream: CUstream) -> CudaResult {
        error::driver(cuGraphLaunch(exec, stream))
    }

    unsafe fn graph_exec_destroy(exec: CUgraphExec) -> CudaResult {
        error::driver(cuGraphExecDestroy(exec))
    }
}

mod error {
    use std::{ffi::CStr, mem::MaybeUninit};

    use super::{CudaError, CudaResult, raw::*};

    pub unsafe fn driver(value: CUresult) -> CudaResult {
        if value == 0 {
            Ok(())
        } else {
            unsafe {
                let mut name = MaybeUninit::uninit();
                cuGetErrorName(value, name.as_mut_ptr());
                let name = CStr::from_ptr(name.assume_init()).to_string_lossy();

                let mut desc = MaybeUninit::uninit();
                cuGetErrorString(value, desc.as_mut_ptr());
                let desc = CStr::from_ptr(desc.assume_init()).to_string_lossy();

                Err(CudaError::Driver(format!("{name}: {desc}")))
            }
        }
    }
}

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(improper_ctypes)]
#[allow(clippy::enum_variant_names)]
mod raw {
    use std::ffi::{c_char, c_int, c_uchar, c_uint, c_ulonglong, c_void};

    #[repr(C)]
    #[derive(Debug, Copy, Clone)]
    pub struct Opaque {
        _unused: [u8; 0],
    }

    // CUDA Driver

    pub type CUdevice = c_int;
    pub type CUresult = c_int;
    pub type CUcontext = *mut Opaque;
    pub type CUstream = *mut Opaque;
    pub type CUdeviceptr = c_ulonglong;
    pub type CUgraph = *mut Opaque;
    pub type CUgraphExec = *mut Opaque;

    pub type CUstreamCaptureMode = c_uint;
    pub const CU_STREAM_CAPTURE_MODE_GLOBAL: CUstreamCaptureMode = 0;
    pub const CU_STREAM_CAPTURE_MODE_THREAD_LOCAL: CUstreamCaptureMode = 1;
    pub const CU_STREAM_CAPTURE_MODE_RELAXED: CUstreamCaptureMode = 2;

    pub type CUstreamCaptureStatus = c_uint;
    pub const CU_STREAM_CAPTURE_STATUS_NONE: CUstreamCaptureStatus = 0;

    unsafe extern "C" {
        // Errors
        pub fn cuGetErrorString(error: CUresult, pStr: *mut *const c_char) -> CUresult;
        pub fn cuGetErrorName(error: CUresult, pStr: *mut *const c_char) -> CUresult;

        // Device
        pub fn cuInit(flags: c_uint) -> CUresult;
        pub fn cuDevicePrimaryCtxRetain(pctx: *mut CUcontext, dev: CUdevice) -> CUresult;
        pub fn cuDevicePrimaryCtxRelease_v2(dev: CUdevice) -> CUresult;
        pub fn cuDeviceGet(device: *mut CUdevice, ordinal: c_int) -> CUresult;
        pub fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;
        pub fn cuCtxGetCurrent(pctx: *mut CUcontext) -> CUresult;
        pub fn cuStreamCreate(stream: *mut CUstream, flags: c_uint) -> CUresult;
        pub fn cuStreamDestroy(stream: CUstream) -> CUresult;
        pub fn cuStreamSynchronize(stream: CUstream) -> CUresult;

        // Memory
        pub fn cuMemAllocAsync(dptr: *mut CUdeviceptr, bytesize: usize, hStream: CUstream) -> CUresult;
        pub fn cuMemFreeAsync(dptr: CUdeviceptr, hStream: CUstream) -> CUresult;
        pub fn cuMemsetD8Async(dstDevice: CUdeviceptr, uc: c_uchar, N: usize, hStream: CUstream) -> CUresult;
        pub fn cuMemcpyHtoDAsync_v2(
            dstDevice: CUdeviceptr,
            srcHost: *const c_void,
            ByteCount: usize,
            hStream: CUstream,
        ) -> CUresult;
        pub fn cuMemcpyDtoHAsync_v2(
            dstHost: *mut c_void,
            srcDevice: CUdeviceptr,
            ByteCount: usize,
            hStream: CUstream,
        ) -> CUresult;
        pub fn cuMemcpyDtoDAsync_v2(
            dstDevice: CUdeviceptr,
            srcDevice: CUdeviceptr,
            ByteCount: usize,
            hStream: CUstream,
        ) -> CUresult;

        // Graphs
        pub fn cuStreamBeginCapture_v2(hStream: CUstream, mode: CUstreamCaptureMode) -> CUresult;
        pub fn cuStreamEndCapture(hStream: CUstream, phGraph: *mut CUgraph) -> CUresult;
        pub fn cuStreamIsCapturing(hStream: CUstream, captureStatus: *mut CUstreamCaptureStatus) -> CUresult;
        pub fn cuGraphInstantiateWithFlags(phGraphExec: *mut CUgraphExec, hGraph: CUgraph, flags: c_ulonglong)
        -> CUresult;
        pub fn cuGraphLaunch(hGraphExec: CUgraphExec, hStream: CUstream) -> CUresult;
        pub fn cuGraphDestroy(hGraph: CUgraph) -> CUresult;
        pub fn cuGraphExecDestroy(hGraphExec: CUgraphExec) -> CUresult;
    }
}
