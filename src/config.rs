use stream_graph_gpu::runtime::CaptureMode;

/// Tunables for a `GraphRecorder`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Mode the stream is put into when capture begins
    pub capture_mode: CaptureMode,
    /// Wait for previously queued work to finish before capture begins,
    /// so none of it can leak into the captured graph
    pub sync_before_capture: bool,
    /// Block the host after each replay until the graph has executed
    pub sync_after_replay: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { capture_mode: CaptureMode::Global, sync_before_capture: true, sync_after_replay: false }
    }
}

impl RecorderConfig {
    pub fn capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }

    pub fn sync_before_capture(mut self, sync: bool) -> Self {
        self.sync_before_capture = sync;
        self
    }

    pub fn sync_after_replay(mut self, sync: bool) -> Self {
        self.sync_after_replay = sync;
        self
    }
}
