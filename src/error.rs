//! Crate error taxonomy.
//!
//! # Design Notes
//! - One crate-level [`Error`] with domain sub-enums ([`DecodeError`],
//!   [`FetchError`]) nested via `#[from]`.
//! - [`Error::ManifestNotFound`] is a content-absence signal, not corruption:
//!   callers that care (logging, tests) can tell "no embedded manifest in any
//!   layer" apart from an unreadable image.
//! - [`Error::Cancelled`] marks work abandoned at a suspension point. It is
//!   never recorded as a run failure.

use crate::decode::DecodeError;
use crate::fetch::FetchError;

use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for pipeline runs and their tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// No layer of the package image contained an embedded manifest.
    #[error("no package manifest found in any image layer")]
    ManifestNotFound,

    /// Composite-definition synthesis failed.
    #[error("synthesize definition {name}: {reason}")]
    Synthesis { name: String, reason: String },

    /// The run was cancelled; the current unit of work was abandoned.
    #[error("cancelled")]
    Cancelled,

    /// The result queue was closed while producers were still live.
    ///
    /// Only reachable when the sink died early; always aborts the run.
    #[error("result queue closed")]
    QueueClosed,

    /// The worker pool rejected a task.
    #[error(transparent)]
    Pool(#[from] crate::pool::PushError),
}

impl Error {
    /// True for conditions that signal absence rather than failure.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ManifestNotFound)
    }

    /// True when this error only marks abandoned work.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::Pool(crate::pool::PushError::Cancelled)
        )
    }
}
