use crate::sinks::PipelineMetricsSink;
use std::time::Instant;

/// RAII timer that reports a flush's duration to the pipeline sink on drop.
pub struct FlushTimer<'a> {
    sink: &'a dyn PipelineMetricsSink,
    log_id: String,
    start: Instant,
}

impl<'a> FlushTimer<'a> {
    /// Starts timing a flush for `log_id`.
    pub fn new(sink: &'a dyn PipelineMetricsSink, log_id: impl Into<String>) -> Self {
        Self {
            sink,
            log_id: log_id.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for FlushTimer<'_> {
    fn drop(&mut self) {
        self.sink
            .observe_flush_duration(&self.log_id, self.start.elapsed().as_secs_f64());
    }
}
