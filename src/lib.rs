//! Manifest package-expansion pipeline.
//!
//! ## Scope
//! This crate reads a multi-document YAML manifest stream, classifies each
//! document against a typed scheme, and expands two kinds: package
//! references (the referenced image's embedded `package.yaml` is fetched,
//! extracted, and re-split) and composite resource definitions (derived
//! CustomResourceDefinitions are synthesized). Everything else is consumed
//! and dropped. The flattened results are emitted as one multi-document
//! stream.
//!
//! ## Key invariants
//! - Documents are processed by a bounded pool of worker threads; results
//!   fan into a bounded queue drained by a single sink task, so output
//!   documents are never interleaved mid-write.
//! - Output order is completion order across documents; order within one
//!   expanded package is preserved.
//! - One cancellation signal per run: fail-fast errors and sink failures
//!   stop submission, in-flight work, and draining at the next suspension
//!   point.
//! - Every temporary resource of an extraction is released on all exit
//!   paths.
//!
//! ## Pipeline flow
//! `Read -> split -> classify -> route (unpack | synthesize | drop)
//! -> result queue -> drain -> OutputSink`
//!
//! ## Notable entry points
//! - [`pipeline::Pipeline`]: wire collaborators, then `run` a stream.
//! - [`unpack::Unpacker`] / [`fetch::RegistryClient`]: package extraction.
//! - [`pool::Pool`]: the bounded task executor underneath.

pub mod apis;
pub mod archive;
pub mod cancel;
pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod pool;
pub mod route;
pub mod sink;
pub mod unpack;
pub mod xcrd;

pub use config::{Config, EmitMode};
pub use error::{Error, Result};
pub use fetch::{ImageFetcher, ImageRef, RegistryClient};
pub use pipeline::Pipeline;
pub use sink::{FileSink, OutputSink, StdoutSink, VecSink};
pub use unpack::Unpacker;
