//! Minimal runtime around CUDA/ROCm devices, streams and graphs

mod bindings;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod host;
#[cfg(feature = "rocm")]
pub mod rocm;

use std::{
    ffi::c_void,
    fmt,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

pub use bindings::CaptureMode;

/// Marker trait for the CUDA, ROCm and host runtimes to implement
pub trait Gpu: bindings::GpuBindings<Err = Self::Error, Ptr = Self::DevicePtr> {
    type Error: fmt::Debug + Eq + From<String>;
    type DevicePtr: Copy + Default + Eq + Hash;
}

impl<G: bindings::GpuBindings> Gpu for G {
    type Error = G::Err;
    type DevicePtr = G::Ptr;
}

/// A GPU device, allowing the safe management of device streams
pub struct GpuDevice<G: Gpu> {
    ordinal: i32,
    context: G::Ctx,
    device: G::Dev,
}

unsafe impl<G: Gpu> Send for GpuDevice<G> {}
unsafe impl<G: Gpu> Sync for GpuDevice<G> {}

impl<G: Gpu> Drop for GpuDevice<G> {
    fn drop(&mut self) {
        unsafe {
            let _ = G::context_destroy(self.device);
        }
    }
}

impl<G: Gpu> GpuDevice<G> {
    pub fn new(ordinal: i32) -> Result<Arc<Self>, G::Error> {
        unsafe {
            G::driver_init()?;
        }

        let device = unsafe { G::device_get(ordinal)? };
        let context = unsafe { G::context_create(device)? };

        Ok(Arc::new(Self { ordinal, context, device }))
    }

    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }

    /// Set this device as currently active for this thread,
    /// which should be done before calling most runtime functions
    pub fn set(&self) -> Result<(), G::Error> {
        unsafe { G::context_set(self.context) }
    }

    /// Create a new stream on this device
    pub fn new_stream(self: Arc<Self>) -> Result<Arc<GpuStream<G>>, G::Error> {
        GpuStream::new(self.clone())
    }
}

/// A GPU stream associated with a GPU device
///
/// Safely handles the stream creation, destruction and syncing,
/// as well as entering and leaving capture mode, but exposes the
/// raw unsafe stream operations such as allocating and copying
pub struct GpuStream<G: Gpu> {
    id: usize,
    inner: G::Stream,
    device: Arc<GpuDevice<G>>,
}

impl<G: Gpu> Drop for GpuStream<G> {
    fn drop(&mut self) {
        self.sync().unwrap();
        unsafe { G::stream_destroy(self.inner).unwrap() };
    }
}

impl<G: Gpu> PartialEq for GpuStream<G> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<G: Gpu> Eq for GpuStream<G> {}

impl<G: Gpu> fmt::Debug for GpuStream<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpuStream({} on GPU{})", self.id, self.device.ordinal())
    }
}

impl<G: Gpu> GpuStream<G> {
    /// The device that this stream resides on
    pub fn device(&self) -> Arc<GpuDevice<G>> {
        self.device.clone()
    }

    /// Unique (per process) identifier of this stream
    pub fn id(&self) -> usize {
        self.id
    }

    /// Created a new stream on the given `device`
    pub fn new(device: Arc<GpuDevice<G>>) -> Result<Arc<Self>, G::Error> {
        device.set()?;

        let inner = unsafe { G::stream_create()? };

        static ID: AtomicUsize = AtomicUsize::new(0);

        Ok(Arc::new(Self { id: ID.fetch_add(1, Ordering::SeqCst), inner, device }))
    }

    /// Block the host thread until all queued operations on this
    /// stream have completed
    ///
    /// Fails, and invalidates the capture, if the stream is capturing
    pub fn sync(&self) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_sync(self.inner) }
    }

    /// Queue allocating `bytes` amount of memory on this stream
    pub fn malloc(&self, bytes: usize) -> Result<G::DevicePtr, G::Error> {
        self.device.set()?;
        unsafe { G::stream_malloc(self.inner, bytes) }
    }

    /// Queue freeing the given device pointer on this stream
    ///
    /// ### Safety
    ///
    /// User must ensure `ptr` is pointing to a valid device allocation
    pub unsafe fn free(&self, ptr: G::DevicePtr) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_free(self.inner, ptr) }
    }

    /// Queue setting each byte in the `bytes` amount of memory on the
    /// device starting at `ptr` to `value` on this stream
    ///
    /// ### Safety
    ///
    /// User must ensure that `ptr` is pointing to a valid allocation
    /// on the device
    ///
    /// User must ensure that `ptr` remains valid until the memset has
    /// been ensured to have completed via a stream sync
    pub unsafe fn memset(&self, ptr: G::DevicePtr, bytes: usize, value: u8) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_memset(self.inner, ptr, bytes, value) }
    }

    /// Queue a copy of `bytes` amount of memory from `src` to `dst`
    /// on this stream, where `src` and `dst` resides on host/device
    /// respectively
    ///
    /// ### Safety
    ///
    /// User must ensure that `src` and `dst` are pointing to valid
    /// allocations on the respective host/device
    ///
    /// User must ensure that `src` and `dst` remain valid until the
    /// copy has been ensured to have completed via a stream sync, and
    /// for as long as any graph that captured the copy may be replayed
    pub unsafe fn memcpy_h2d(&self, src: *const c_void, dst: G::DevicePtr, bytes: usize) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_memcpy_h2d(self.inner, dst, src, bytes) }
    }

    /// Queue a copy of `bytes` amount of memory from `src` to `dst`
    /// on this stream, where `src` and `dst` resides on device/host
    /// respectively
    ///
    /// ### Safety
    ///
    /// User must ensure that `src` and `dst` are pointing to valid
    /// allocations on the respective device/host
    ///
    /// User must ensure that `src` and `dst` remain valid until the
    /// copy has been ensured to have completed via a stream sync, and
    /// for as long as any graph that captured the copy may be replayed
    pub unsafe fn memcpy_d2h(&self, src: G::DevicePtr, dst: *mut c_void, bytes: usize) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_memcpy_d2h(self.inner, dst, src, bytes) }
    }

    /// Queue a copy of `bytes` amount of memory from `src` to `dst`
    /// on this stream, both residing on the device
    ///
    /// ### Safety
    ///
    /// User must ensure that `src` and `dst` are pointing to valid,
    /// non-overlapping allocations on the device
    pub unsafe fn memcpy_d2d(&self, src: G::DevicePtr, dst: G::DevicePtr, bytes: usize) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_memcpy_d2d(self.inner, dst, src, bytes) }
    }

    /// Put this stream into capture mode, so that all subsequently
    /// queued operations are recorded into a graph instead of executed
    pub fn begin_capture(&self, mode: CaptureMode) -> Result<(), G::Error> {
        self.device.set()?;
        unsafe { G::stream_begin_capture(self.inner, mode) }
    }

    /// Leave capture mode, returning the graph of recorded operations
    pub fn end_capture(&self) -> Result<GpuGraph<G>, G::Error> {
        self.device.set()?;
        let graph = unsafe { G::stream_end_capture(self.inner)? };
        Ok(GpuGraph { graph: Some(graph), device: self.device.clone() })
    }

    /// Whether this stream is currently in capture mode
    pub fn is_capturing(&self) -> Result<bool, G::Error> {
        self.device.set()?;
        unsafe { G::stream_is_capturing(self.inner) }
    }
}

/// A captured, not yet executable, graph of stream operations
///
/// Destroyed when dropped
pub struct GpuGraph<G: Gpu> {
    graph: Option<G::Graph>,
    device: Arc<GpuDevice<G>>,
}

impl<G: Gpu> Drop for GpuGraph<G> {
    fn drop(&mut self) {
        if let Some(graph) = self.graph.take() {
            unsafe { G::graph_destroy(graph).unwrap() }
        }
    }
}

impl<G: Gpu> GpuGraph<G> {
    /// Build a launchable executable from this graph, which stays
    /// valid after the graph itself has been destroyed
    pub fn instantiate(&self) -> Result<GpuGraphExec<G>, G::Error> {
        let graph = self.graph.ok_or_else(|| "Graph was already released!".to_string())?;

        self.device.set()?;
        let exec = unsafe { G::graph_instantiate(graph)? };

        Ok(GpuGraphExec { exec: Some(exec), device: self.device.clone() })
    }

    /// Destroy the graph, reporting failure instead of panicking
    pub fn release(mut self) -> Result<(), G::Error> {
        match self.graph.take() {
            Some(graph) => unsafe { G::graph_destroy(graph) },
            None => Ok(()),
        }
    }

    /// Get the device that this graph is on
    pub fn device(&self) -> Arc<GpuDevice<G>> {
        self.device.clone()
    }
}

/// An instantiated graph that can be launched on any stream of the
/// device it was instantiated on
///
/// Destroyed when dropped
pub struct GpuGraphExec<G: Gpu> {
    exec: Option<G::GraphExec>,
    device: Arc<GpuDevice<G>>,
}

impl<G: Gpu> Drop for GpuGraphExec<G> {
    fn drop(&mut self) {
        if let Some(exec) = self.exec.take() {
            unsafe { G::graph_exec_destroy(exec).unwrap() }
        }
    }
}

impl<G: Gpu> GpuGraphExec<G> {
    /// Queue the whole graph for execution on `stream`
    pub fn launch(&self, stream: &GpuStream<G>) -> Result<(), G::Error> {
        let o1 = stream.device.ordinal();
        let o2 = self.device.ordinal();
        if o1 != o2 {
            return Err(format!("Attempted to launch GPU{o2} graph on GPU{o1} stream!").into());
        }

        let exec = self.exec.ok_or_else(|| "Graph executable was already released!".to_string())?;

        stream.device.set()?;
        unsafe { G::graph_exec_launch(exec, stream.inner) }
    }

    /// Destroy the executable, reporting failure instead of panicking
    pub fn release(mut self) -> Result<(), G::Error> {
        match self.exec.take() {
            Some(exec) => unsafe { G::graph_exec_destroy(exec) },
            None => Ok(()),
        }
    }

    /// Get the device that this executable is on
    pub fn device(&self) -> Arc<GpuDevice<G>> {
        self.device.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_malloc_copy_sync_drop<G: Gpu>() -> Result<(), G::Error> {
        let host_src = [1.0f32, 2.0, 3.0, 4.0];
        let mut host_dst = [0.0, 0.0, 0.0, 0.0];

        let device = GpuDevice::<G>::new(0)?;
        let stream = GpuStream::new(device.clone())?;

        unsafe {
            let dev_ptr = stream.malloc(16)?;
            stream.sync()?;
            stream.memcpy_h2d(host_src.as_ptr().cast(), dev_ptr, 16)?;
            stream.memcpy_d2h(dev_ptr, host_dst.as_mut_ptr().cast(), 16)?;
            stream.sync()?;
            stream.free(dev_ptr)?;
        }

        assert_eq!(host_dst, host_src);

        Ok(())
    }

    fn multiple_device_instances<G: Gpu>() -> Result<(), G::Error> {
        let a = GpuDevice::<G>::new(0)?;
        let sa = GpuStream::new(a.clone())?;
        let b = GpuDevice::<G>::new(0)?;
        let sb = GpuStream::new(b.clone())?;

        assert_ne!(sa, sb);
        assert_ne!(sa.id(), sb.id());

        drop(sa);
        drop(a);
        drop(sb);
        drop(b);

        Ok(())
    }

    fn capture_instantiate_launch<G: Gpu>() -> Result<(), G::Error> {
        let host_src = [7u8; 64];
        let mut host_dst = [0u8; 64];

        let device = GpuDevice::<G>::new(0)?;
        let stream = GpuStream::new(device.clone())?;

        let (src, dst) = (stream.malloc(64)?, stream.malloc(64)?);
        stream.sync()?;

        unsafe {
            stream.memcpy_h2d(host_src.as_ptr().cast(), src, 64)?;
            stream.memset(dst, 64, 0)?;
            stream.sync()?;

            stream.begin_capture(CaptureMode::Global)?;
            assert!(stream.is_capturing()?);
            stream.memcpy_d2d(src, dst, 64)?;
            let graph = stream.end_capture()?;
            assert!(!stream.is_capturing()?);

            // nothing has executed yet
            stream.memcpy_d2h(dst, host_dst.as_mut_ptr().cast(), 64)?;
            stream.sync()?;
            assert_eq!(host_dst, [0; 64]);

            let exec = graph.instantiate()?;
            assert_eq!(graph.device().ordinal(), stream.device().ordinal());
            assert_eq!(exec.device().ordinal(), device.ordinal());
            graph.release()?;

            exec.launch(&stream)?;
            stream.memcpy_d2h(dst, host_dst.as_mut_ptr().cast(), 64)?;
            stream.sync()?;
            assert_eq!(host_dst, host_src);

            exec.release()?;
            stream.free(src)?;
            stream.free(dst)?;
        }

        Ok(())
    }

    fn double_begin_capture_fails<G: Gpu>() -> Result<(), G::Error> {
        let device = GpuDevice::<G>::new(0)?;
        let stream = GpuStream::new(device.clone())?;

        stream.begin_capture(CaptureMode::Global)?;
        assert!(stream.begin_capture(CaptureMode::Global).is_err());
        stream.end_capture()?.release()?;

        Ok(())
    }

    #[cfg(feature = "cuda")]
    mod cuda {
        use crate::runtime::cuda::{Cuda, CudaError};

        #[test]
        fn create_malloc_copy_sync_drop() -> Result<(), CudaError> {
            super::create_malloc_copy_sync_drop::<Cuda>()
        }

        #[test]
        fn multiple_device_instances() -> Result<(), CudaError> {
            super::multiple_device_instances::<Cuda>()
        }

        #[test]
        fn capture_instantiate_launch() -> Result<(), CudaError> {
            super::capture_instantiate_launch::<Cuda>()
        }

        #[test]
        fn double_begin_capture_fails() -> Result<(), CudaError> {
            super::double_begin_capture_fails::<Cuda>()
        }
    }

    #[cfg(feature = "rocm")]
    mod rocm {
        use crate::runtime::rocm::{ROCm, ROCmError};

        #[test]
        fn create_malloc_copy_sync_drop() -> Result<(), ROCmError> {
            super::create_malloc_copy_sync_drop::<ROCm>()
        }

        #[test]
        fn multiple_device_instances() -> Result<(), ROCmError> {
            super::multiple_device_instances::<ROCm>()
        }

        #[test]
        fn capture_instantiate_launch() -> Result<(), ROCmError> {
            super::capture_instantiate_launch::<ROCm>()
        }

        #[test]
        fn double_begin_capture_fails() -> Result<(), ROCmError> {
            super::double_begin_capture_fails::<ROCm>()
        }
    }

    mod host {
        use crate::runtime::host::{Host, HostError};

        #[test]
        fn create_malloc_copy_sync_drop() -> Result<(), HostError> {
            super::create_malloc_copy_sync_drop::<Host>()
        }

        #[test]
        fn multiple_device_instances() -> Result<(), HostError> {
            super::multiple_device_instances::<Host>()
        }

        #[test]
        fn capture_instantiate_launch() -> Result<(), HostError> {
            super::capture_instantiate_launch::<Host>()
        }

        #[test]
        fn double_begin_capture_fails() -> Result<(), HostError> {
            super::double_begin_capture_fails::<Host>()
        }
    }
}
