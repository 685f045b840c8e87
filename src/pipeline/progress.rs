use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

/// One milestone notification. Mirrors the callback contract of the
/// surrounding application: a human description, optional bar text, the
/// current substep, an overall percentage when known, and a log line.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub description: String,
    pub bar: String,
    pub substep: Option<String>,
    pub percent: Option<u8>,
    pub log: Option<String>,
}

pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Fire-and-forget wrapper around the caller's progress callback. A
/// panicking callback is caught and logged; it must never take the pipeline
/// down with it. Events are emitted from the orchestrating task only.
pub struct ProgressSink {
    callback: Option<ProgressCallback>,
}

impl ProgressSink {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    pub fn disabled() -> Self {
        Self { callback: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(callback) = &self.callback else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
            warn!("progress callback panicked; continuing");
        }
    }

    pub fn milestone(
        &self,
        description: &str,
        substep: &str,
        percent: Option<u8>,
        log: Option<String>,
    ) {
        self.emit(ProgressEvent {
            description: description.to_string(),
            bar: String::new(),
            substep: Some(substep.to_string()),
            percent,
            log,
        });
    }
}
