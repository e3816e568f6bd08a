//! Host emulation of a single GPU device
//!
//! Every queued operation executes synchronously on the calling thread
//! unless its stream is capturing, in which case it is recorded instead.
//! All state lives in a thread local, so handles created on one thread
//! are meaningless on another.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    ffi::{c_int, c_void},
};

use super::bindings::{CaptureMode, GpuBindings};

/// Marker for the host runtime
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Host;

/// Error type for the host runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostError {
    NotInitialised,
    InvalidDevice(i32),
    InvalidContext,
    InvalidHandle,
    InvalidValue,
    IllegalState,
    StreamCaptureUnsupported,
    StreamCaptureInvalidated,
    Injected(HostFault),
    Message(String),
}

impl From<String> for HostError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Graph related driver calls that can be made to fail on demand
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostFault {
    BeginCapture,
    EndCapture,
    Instantiate,
    Launch,
    GraphDestroy,
    ExecDestroy,
}

/// Lifetime counters for graph resources on the current thread
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HostStats {
    pub graphs_created: usize,
    pub graphs_destroyed: usize,
    pub execs_created: usize,
    pub execs_destroyed: usize,
    pub launches: usize,
    pub ops_executed: usize,
}

impl HostStats {
    pub fn live_graphs(&self) -> usize {
        self.graphs_created - self.graphs_destroyed
    }

    pub fn live_execs(&self) -> usize {
        self.execs_created - self.execs_destroyed
    }
}

impl Host {
    /// Make the next call of the given kind fail with `HostError::Injected`
    pub fn inject_fault(fault: HostFault) {
        STATE.with(|state| state.borrow_mut().faults.push(fault));
    }

    /// Drop any injected faults that have not fired yet
    pub fn clear_faults() {
        STATE.with(|state| state.borrow_mut().faults.clear());
    }

    pub fn stats() -> HostStats {
        STATE.with(|state| state.borrow().stats)
    }
}

const ALIGN: u64 = 256;
const BASE_ADDR: u64 = 0x1000_0000;

#[derive(Copy, Clone, Debug)]
enum HostOp {
    Memset { dst: u64, bytes: usize, value: u8 },
    CopyH2D { dst: u64, src: *const u8, bytes: usize },
    CopyD2H { dst: *mut u8, src: u64, bytes: usize },
    CopyD2D { dst: u64, src: u64, bytes: usize },
}

struct Capture {
    _mode: CaptureMode,
    ops: Vec<HostOp>,
    invalidated: bool,
}

#[derive(Default)]
struct StreamState {
    capture: Option<Capture>,
}

#[derive(Default)]
struct HostState {
    initialised: bool,
    contexts: usize,
    next_handle: u64,
    next_addr: u64,
    memory: BTreeMap<u64, Vec<u8>>,
    streams: HashMap<u64, StreamState>,
    graphs: HashMap<u64, Vec<HostOp>>,
    execs: HashMap<u64, Vec<HostOp>>,
    faults: Vec<HostFault>,
    stats: HostStats,
}

thread_local! {
    static STATE: RefCell<HostState> = RefCell::new(HostState::default());
}

fn with_state<T>(f: impl FnOnce(&mut HostState) -> Result<T, HostError>) -> Result<T, HostError> {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

impl HostState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_fault(&mut self, fault: HostFault) -> Result<(), HostError> {
        match self.faults.iter().position(|&f| f == fault) {
            Some(idx) => {
                self.faults.remove(idx);
                Err(HostError::Injected(fault))
            }
            None => Ok(()),
        }
    }

    fn stream(&mut self, stream: u64) -> Result<&mut StreamState, HostError> {
        self.streams.get_mut(&stream).ok_or(HostError::InvalidHandle)
    }

    /// Fails and poisons an active capture, for calls that cannot be captured
    fn forbid_capture(&mut self, stream: u64) -> Result<(), HostError> {
        match self.stream(stream)?.capture.as_mut() {
            Some(capture) => {
                capture.invalidated = true;
                Err(HostError::StreamCaptureUnsupported)
            }
            None => Ok(()),
        }
    }

    fn region(&mut self, ptr: u64, bytes: usize) -> Result<&mut [u8], HostError> {
        let (&base, buf) = self.memory.range_mut(..=ptr).next_back().ok_or(HostError::InvalidValue)?;
        let start = usize::try_from(ptr - base).map_err(|_| HostError::InvalidValue)?;
        let end = start.checked_add(bytes).ok_or(HostError::InvalidValue)?;
        buf.get_mut(start..end).ok_or(HostError::InvalidValue)
    }

    unsafe fn enqueue(&mut self, stream: u64, op: HostOp) -> Result<(), HostError> {
        if let Some(capture) = self.stream(stream)?.capture.as_mut() {
            if capture.invalidated {
                return Err(HostError::StreamCaptureInvalidated);
            }

            capture.ops.push(op);
            return Ok(());
        }

        unsafe { self.execute(op) }
    }

    unsafe fn execute(&mut self, op: HostOp) -> Result<(), HostError> {
        match op {
            HostOp::Memset { dst, bytes, value } => self.region(dst, bytes)?.fill(value),
            HostOp::CopyH2D { dst, src, bytes } => {
                let src = unsafe { std::slice::from_raw_parts(src, bytes) };
                self.region(dst, bytes)?.copy_from_slice(src);
            }
            HostOp::CopyD2H { dst, src, bytes } => {
                let dst = unsafe { std::slice::from_raw_parts_mut(dst, bytes) };
                dst.copy_from_slice(self.region(src, bytes)?);
            }
            HostOp::CopyD2D { dst, src, bytes } => {
                let tmp = self.region(src, bytes)?.to_vec();
                self.region(dst, bytes)?.copy_from_slice(&tmp);
            }
        }

        self.stats.ops_executed += 1;

        Ok(())
    }
}

impl GpuBindings for Host {
    type Err = HostError;
    type Dev = i32;
    type Ptr = u64;
    type Ctx = u64;
    type Stream = u64;
    type Graph = u64;
    type GraphExec = u64;

    unsafe fn driver_init() -> Result<(), HostError> {
        with_state(|state| {
            state.initialised = true;
            if state.next_addr == 0 {
                state.next_addr = BASE_ADDR;
            }
            Ok(())
        })
    }

    unsafe fn device_get(ordinal: c_int) -> Result<i32, HostError> {
        with_state(|state| match (state.initialised, ordinal) {
            (false, _) => Err(HostError::NotInitialised),
            (true, 0) => Ok(0),
            (true, x) => Err(HostError::InvalidDevice(x)),
        })
    }

    unsafe fn context_create(_device: i32) -> Result<u64, HostError> {
        with_state(|state| {
            state.contexts += 1;
            Ok(1)
        })
    }

    unsafe fn context_destroy(_device: i32) -> Result<(), HostError> {
        with_state(|state| {
            state.contexts = state.contexts.checked_sub(1).ok_or(HostError::InvalidContext)?;
            Ok(())
        })
    }

    unsafe fn context_set(ctx: u64) -> Result<(), HostError> {
        with_state(|state| if ctx == 1 && state.contexts > 0 { Ok(()) } else { Err(HostError::InvalidContext) })
    }

    unsafe fn stream_create() -> Result<u64, HostError> {
        with_state(|state| {
            let handle = state.handle();
            state.streams.insert(handle, StreamState::default());
            Ok(handle)
        })
    }

    unsafe fn stream_destroy(stream: u64) -> Result<(), HostError> {
        with_state(|state| state.streams.remove(&stream).map(|_| ()).ok_or(HostError::InvalidHandle))
    }

    unsafe fn stream_sync(stream: u64) -> Result<(), HostError> {
        with_state(|state| state.forbid_capture(stream))
    }

    unsafe fn stream_malloc(stream: u64, bytes: usize) -> Result<u64, HostError> {
        with_state(|state| {
            state.forbid_capture(stream)?;

            let ptr = state.next_addr;
            let span = (bytes.max(1) as u64).div_ceil(ALIGN) * ALIGN;
            state.next_addr += span;
            state.memory.insert(ptr, vec![0; bytes]);

            Ok(ptr)
        })
    }

    unsafe fn stream_free(stream: u64, dev_ptr: u64) -> Result<(), HostError> {
        with_state(|state| {
            state.forbid_capture(stream)?;
            state.memory.remove(&dev_ptr).map(|_| ()).ok_or(HostError::InvalidValue)
        })
    }

    unsafe fn stream_memset(stream: u64, dst: u64, bytes: usize, value: u8) -> Result<(), HostError> {
        with_state(|state| unsafe { state.enqueue(stream, HostOp::Memset { dst, bytes, value }) })
    }

    unsafe fn stream_memcpy_d2h(stream: u64, dst: *mut c_void, src: u64, bytes: usize) -> Result<(), HostError> {
        with_state(|state| unsafe { state.enqueue(stream, HostOp::CopyD2H { dst: dst.cast(), src, bytes }) })
    }

    unsafe fn stream_memcpy_h2d(stream: u64, dst: u64, src: *const c_void, bytes: usize) -> Result<(), HostError> {
        with_state(|state| unsafe { state.enqueue(stream, HostOp::CopyH2D { dst, src: src.cast(), bytes }) })
    }

    unsafe fn stream_memcpy_d2d(stream: u64, dst: u64, src: u64, bytes: usize) -> Result<(), HostError> {
        with_state(|state| unsafe { state.enqueue(stream, HostOp::CopyD2D { dst, src, bytes }) })
    }

    unsafe fn stream_begin_capture(stream: u64, mode: CaptureMode) -> Result<(), HostError> {
        with_state(|state| {
            state.take_fault(HostFault::BeginCapture)?;

            let stream = state.stream(stream)?;
            if stream.capture.is_some() {
                return Err(HostError::IllegalState);
            }

            stream.capture = Some(Capture { _mode: mode, ops: Vec::new(), invalidated: false });

            Ok(())
        })
    }

    unsafe fn stream_end_capture(stream: u64) -> Result<u64, HostError> {
        with_state(|state| {
            let capture = state.stream(stream)?.capture.take().ok_or(HostError::IllegalState)?;

            state.take_fault(HostFault::EndCapture)?;

            if capture.invalidated {
                return Err(HostError::StreamCaptureInvalidated);
            }

            let handle = state.handle();
            state.graphs.insert(handle, capture.ops);
            state.stats.graphs_created += 1;

            Ok(handle)
        })
    }

    unsafe fn stream_is_capturing(stream: u64) -> Result<bool, HostError> {
        with_state(|state| Ok(state.stream(stream)?.capture.is_some()))
    }

    unsafe fn graph_instantiate(graph: u64) -> Result<u64, HostError> {
        with_state(|state| {
            state.take_fault(HostFault::Instantiate)?;

            let ops = state.graphs.get(&graph).ok_or(HostError::InvalidHandle)?.clone();
            let handle = state.handle();
            state.execs.insert(handle, ops);
            state.stats.execs_created += 1;

            Ok(handle)
        })
    }

    unsafe fn graph_destroy(graph: u64) -> Result<(), HostError> {
        with_state(|state| {
            state.take_fault(HostFault::GraphDestroy)?;
            state.graphs.remove(&graph).ok_or(HostError::InvalidHandle)?;
            state.stats.graphs_destroyed += 1;
            Ok(())
        })
    }

    unsafe fn graph_exec_launch(exec: u64, stream: u64) -> Result<(), HostError> {
        with_state(|state| {
            state.take_fault(HostFault::Launch)?;

            let ops = state.execs.get(&exec).ok_or(HostError::InvalidHandle)?.clone();
            state.stats.launches += 1;

            for op in ops {
                unsafe { state.enqueue(stream, op)? };
            }

            Ok(())
        })
    }

    unsafe fn graph_exec_destroy(exec: u64) -> Result<(), HostError> {
        with_state(|state| {
            state.take_fault(HostFault::ExecDestroy)?;
            state.execs.remove(&exec).ok_or(HostError::InvalidHandle)?;
            state.stats.execs_destroyed += 1;
            Ok(())
        })
    }
}
