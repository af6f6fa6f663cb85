use std::path::PathBuf;

/// Runtime knobs of one interpreter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Stop a script at its first fatal line instead of moving on to the next.
    pub halt_on_fatal: bool,
    /// Deepest allowed nesting of user function calls.
    pub max_call_depth: usize,
    /// Where the event report is written after a script run.
    pub event_log: Option<PathBuf>,
}

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

impl Default for Config {
    fn default() -> Self {
        Self {
            halt_on_fatal: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            event_log: None,
        }
    }
}

impl Config {
    pub fn keep_going(mut self) -> Self {
        self.halt_on_fatal = false;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }
}
