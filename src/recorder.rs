use std::{fmt, mem, sync::Arc};

use stream_graph_gpu::runtime::{Gpu, GpuGraph, GpuStream};
use tracing::{debug, error, info, warn};

use crate::{
    annotation::GraphAnnotation,
    cache::GraphCache,
    config::RecorderConfig,
    error::{GraphError, GraphResult},
};

/// Observable phase of a `GraphRecorder`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Capturing,
    Captured,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Capturing => write!(f, "capturing"),
            Self::Captured => write!(f, "holding an uninstantiated graph"),
        }
    }
}

enum CaptureState<G: Gpu> {
    Idle,
    Capturing,
    Captured(GpuGraph<G>),
}

/// Records the work queued on a stream into graphs, one per
/// annotation, and replays them on demand
///
/// The usual cycle for a given annotation is
/// ```text
/// set_graph_annotation_id -> capture_begin -> (queue work) -> capture_end -> replay*
/// ```
/// with `reset` discarding everything captured so far.
///
/// The recorder does not own its stream, dropping the recorder never
/// destroys it. Captured graphs are released on `reset`, on being
/// replaced by a recapture, or when the recorder is dropped.
pub struct GraphRecorder<G: Gpu> {
    stream: Option<Arc<GpuStream<G>>>,
    annotation: GraphAnnotation,
    state: CaptureState<G>,
    cache: GraphCache<G>,
    config: RecorderConfig,
}

impl<G: Gpu> Default for GraphRecorder<G> {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl<G: Gpu> Drop for GraphRecorder<G> {
    fn drop(&mut self) {
        if let CaptureState::Capturing = self.state {
            if let Err(err) = self.abort_capture() {
                error!(annotation = %self.annotation, %err, "failed to abort capture on drop");
            }
        }
    }
}

impl<G: Gpu> GraphRecorder<G> {
    /// A recorder with no stream bound yet
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            stream: None,
            annotation: GraphAnnotation::DEFAULT,
            state: CaptureState::Idle,
            cache: GraphCache::new(),
            config,
        }
    }

    pub fn with_stream(stream: Arc<GpuStream<G>>, config: RecorderConfig) -> Self {
        let mut recorder = Self::new(config);
        recorder.stream = Some(stream);
        recorder
    }

    pub fn stream(&self) -> Option<&Arc<GpuStream<G>>> {
        self.stream.as_ref()
    }

    pub fn config(&self) -> RecorderConfig {
        self.config
    }

    pub fn cache(&self) -> &GraphCache<G> {
        &self.cache
    }

    pub fn graph_annotation_id(&self) -> GraphAnnotation {
        self.annotation
    }

    pub fn state(&self) -> RecorderState {
        match self.state {
            CaptureState::Idle => RecorderState::Idle,
            CaptureState::Capturing => RecorderState::Capturing,
            CaptureState::Captured(_) => RecorderState::Captured,
        }
    }

    /// Bind the stream that later captures and replays run on
    pub fn set_stream(&mut self, stream: Arc<GpuStream<G>>) -> GraphResult<(), G::Error> {
        self.require_idle("rebind the stream")?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Select which cached graph subsequent captures and replays refer to
    pub fn set_graph_annotation_id(&mut self, annotation: impl Into<GraphAnnotation>) -> GraphResult<(), G::Error> {
        self.require_idle("change the graph annotation")?;
        self.annotation = annotation.into();
        Ok(())
    }

    /// Whether a run under the current annotation may capture a new graph
    pub fn is_graph_capture_allowed_on_run(&self) -> bool {
        !self.annotation.is_skip() && matches!(self.state, CaptureState::Idle)
    }

    pub fn is_graph_captured(&self, annotation: impl Into<GraphAnnotation>) -> bool {
        self.cache.contains(annotation.into())
    }

    /// Put the bound stream into capture mode, so that work queued on it
    /// is recorded rather than executed
    pub fn capture_begin(&mut self) -> GraphResult<(), G::Error> {
        self.require_idle("begin capture")?;

        if self.annotation.is_skip() {
            return Err(GraphError::Precondition("cannot capture under the skip annotation".to_string()));
        }

        let stream = self.bound_stream("begin capture")?;

        // syncing a stream that someone else is capturing on would invalidate their capture
        if stream.is_capturing().map_err(GraphError::Capture)? {
            return Err(GraphError::Capture("Stream is already capturing!".to_string().into()));
        }

        if self.config.sync_before_capture {
            stream.sync().map_err(GraphError::Capture)?;
        }

        stream.begin_capture(self.config.capture_mode).map_err(GraphError::Capture)?;
        debug!(annotation = %self.annotation, ?stream, mode = ?self.config.capture_mode, "began graph capture");

        self.state = CaptureState::Capturing;

        Ok(())
    }

    /// Leave capture mode, instantiate what was recorded and file it
    /// under the current annotation, replacing any earlier graph there
    ///
    /// On failure the recorder is back to idle and the cache holds
    /// nothing new for the annotation
    pub fn capture_end(&mut self) -> GraphResult<(), G::Error> {
        if !matches!(self.state, CaptureState::Capturing) {
            return Err(GraphError::Precondition(format!("cannot end capture while {}", self.state())));
        }

        let stream = self.bound_stream("end capture")?.clone();

        // the stream leaves capture mode whether or not this succeeds
        self.state = CaptureState::Idle;
        let graph = stream.end_capture().map_err(|err| {
            warn!(annotation = %self.annotation, ?err, "graph capture failed");
            GraphError::Capture(err)
        })?;

        debug!(annotation = %self.annotation, ?stream, "ended graph capture");
        self.state = CaptureState::Captured(graph);

        self.instantiate_captured()
    }

    /// Launch the graph cached under the current annotation on the bound stream
    pub fn replay(&self) -> GraphResult<(), G::Error> {
        self.require_idle("replay")?;

        let exec = self.cache.get(self.annotation).ok_or(GraphError::ReplayMiss(self.annotation))?;
        let stream = self.bound_stream("replay")?;

        debug!(annotation = %self.annotation, ?stream, "replaying graph");
        exec.launch(stream).map_err(GraphError::Launch)?;

        if self.config.sync_after_replay {
            stream.sync().map_err(GraphError::Launch)?;
        }

        Ok(())
    }

    /// Abandon any capture in progress and release every graph
    ///
    /// Always leaves the recorder idle with an empty cache, reporting
    /// the first release failure encountered
    pub fn reset(&mut self) -> GraphResult<(), G::Error> {
        let aborted = match mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => Ok(()),
            CaptureState::Capturing => self.abort_capture(),
            CaptureState::Captured(graph) => graph.release().map_err(GraphError::Release),
        };

        let cleared = self.cache.clear();
        debug!(annotation = %self.annotation, "reset graph recorder");

        aborted.and(cleared)
    }

    fn instantiate_captured(&mut self) -> GraphResult<(), G::Error> {
        let CaptureState::Captured(graph) = mem::replace(&mut self.state, CaptureState::Idle) else {
            return Err(GraphError::Precondition(format!("cannot instantiate while {}", self.state())));
        };

        let instantiated = graph.instantiate();
        let released = graph.release();

        let exec = match instantiated {
            Ok(exec) => exec,
            Err(err) => {
                if let Err(release) = released {
                    error!(annotation = %self.annotation, ?release, "failed to destroy uninstantiable graph");
                }

                return Err(GraphError::Instantiation(err));
            }
        };

        if self.cache.contains(self.annotation) {
            warn!(annotation = %self.annotation, "replacing previously captured graph");
        }

        if let Err(err) = self.cache.put(self.annotation, exec) {
            if let Err(release) = released {
                error!(annotation = %self.annotation, ?release, "failed to destroy instantiated graph");
            }

            return Err(err);
        }

        info!(annotation = %self.annotation, cached = self.cache.len(), "captured graph");

        released.map_err(GraphError::Release)
    }

    fn abort_capture(&self) -> GraphResult<(), G::Error> {
        let Some(stream) = &self.stream else {
            return Ok(());
        };

        match stream.end_capture() {
            Ok(graph) => {
                debug!(annotation = %self.annotation, ?stream, "discarding in-progress capture");
                graph.release().map_err(GraphError::Release)
            }
            Err(err) => {
                debug!(annotation = %self.annotation, ?stream, ?err, "in-progress capture was already invalid");
                Ok(())
            }
        }
    }

    fn require_idle(&self, action: &str) -> GraphResult<(), G::Error> {
        match self.state {
            CaptureState::Idle => Ok(()),
            _ => Err(GraphError::Precondition(format!("cannot {action} while {}", self.state()))),
        }
    }

    fn bound_stream(&self, action: &str) -> GraphResult<&Arc<GpuStream<G>>, G::Error> {
        self.stream.as_ref().ok_or_else(|| GraphError::Precondition(format!("cannot {action} without a bound stream")))
    }
}
