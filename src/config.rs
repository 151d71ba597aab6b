//! Pipeline configuration.
//!
//! One explicit struct, constructed once by the caller and handed to
//! [`crate::pipeline::Pipeline::new`]. There is no process-wide
//! configuration state.

/// How surviving sub-documents of an expanded package are emitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmitMode {
    /// Verbatim bytes as found in the package manifest.
    #[default]
    Raw,
    /// The decoded object, re-rendered by the sink. Unknown kinds still
    /// pass through verbatim.
    Decoded,
}

/// Core pipeline settings.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Document-processing worker threads; also sizes the work and result
    /// queues. Must be > 0.
    pub workers: usize,
    /// Cancel the run on the first task error.
    pub fail_fast: bool,
    /// Log the aggregated run error and report success anyway. Already
    /// emitted documents are never rolled back either way.
    pub allow_failure: bool,
    /// Sub-document emission mode.
    pub emit: EmitMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            fail_fast: false,
            allow_failure: false,
            emit: EmitMode::Raw,
        }
    }
}
