//! The concurrent expansion pipeline.
//!
//! # Architecture
//!
//! ```text
//!   input stream ──split──► documents ──push──► worker pool (N threads)
//!                                                   │  classify + route
//!                                                   │  (expand packages,
//!                                                   │   synthesize CRDs)
//!                                                   ▼
//!                                       bounded result queue (cap = N)
//!                                                   │
//!                                                   ▼
//!                                      drain task (1-worker pool)
//!                                                   │  ---\n + bytes
//!                                                   ▼
//!                                              OutputSink
//! ```
//!
//! # Correctness Invariants
//!
//! - **Single writer**: only the drain task touches the sink, so emitted
//!   documents are never interleaved or torn.
//! - **Completion-order output**: results from different source documents
//!   interleave in completion order; order *within* one expanded package is
//!   preserved (its sub-documents are emitted sequentially by one task).
//!   This is a documented property, not a defect.
//! - **Backpressure**: the result queue is bounded by the worker count;
//!   producers block (cancellably) once the sink falls behind.
//! - **Shutdown order**: wait for the processing pool, close the queue, wait
//!   for the drain task. Cancellation short-circuits all three.
//! - **No rollback**: documents written before a failure stay written.

use crate::cancel::{self, Canceller, CancelToken};
use crate::config::Config;
use crate::decode::Scheme;
use crate::error::{Error, Result};
use crate::pool::{Pool, PoolOptions};
use crate::route::{Router, TaskContext};
use crate::sink::{OutputSink, Render, YamlRenderer};
use crate::unpack::Unpacker;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::io::Read;
use std::sync::Arc;

/// Document boundary marker of the multi-document stream.
pub const DOCUMENT_BOUNDARY: &[u8] = b"---";

// ============================================================================
// Splitting
// ============================================================================

/// Split a manifest stream into documents on the boundary marker.
///
/// Whitespace-only spans (produced by leading/trailing boundaries) are
/// boundary artifacts, not documents, and are skipped.
pub fn split_documents(input: &[u8]) -> Vec<&[u8]> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + DOCUMENT_BOUNDARY.len() <= input.len() {
        if &input[i..i + DOCUMENT_BOUNDARY.len()] == DOCUMENT_BOUNDARY {
            push_document(&mut docs, &input[start..i]);
            i += DOCUMENT_BOUNDARY.len();
            start = i;
        } else {
            i += 1;
        }
    }
    push_document(&mut docs, &input[start..]);
    docs
}

fn push_document<'a>(docs: &mut Vec<&'a [u8]>, span: &'a [u8]) {
    if !span.iter().all(u8::is_ascii_whitespace) {
        docs.push(span);
    }
}

// ============================================================================
// Run state and the result queue
// ============================================================================

/// Per-run shared state: the cancellation signal and the fail-fast policy.
///
/// Mutated by any task on fatal error, read by all tasks at their suspension
/// points, discarded at run end.
pub struct PipelineState {
    canceller: Canceller,
    fail_fast: bool,
}

impl PipelineState {
    pub fn new(canceller: Canceller, fail_fast: bool) -> Self {
        Self {
            canceller,
            fail_fast,
        }
    }

    /// A task failed: under fail-fast, stop the run.
    pub fn on_task_error(&self) {
        if self.fail_fast {
            self.canceller.cancel();
        }
    }

    /// Unconditional abort; used when the output channel is unrecoverable.
    pub fn abort(&self) {
        self.canceller.cancel();
    }
}

/// One result entry: raw bytes pass the sink untouched, objects are rendered.
#[derive(Clone, Debug)]
pub enum Emitted {
    Raw(Vec<u8>),
    Object(serde_yaml::Value),
}

/// Producer end of the result queue, cancellation-aware.
pub struct Emitter {
    tx: Sender<Emitted>,
    token: CancelToken,
    state: Arc<PipelineState>,
}

impl Emitter {
    /// Push one result. Blocks under backpressure until the sink catches up,
    /// the run is cancelled, or the queue is gone (which aborts the run:
    /// a dead sink is unrecoverable).
    pub fn emit(&self, entry: Emitted) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        select! {
            send(self.tx, entry) -> res => res.map_err(|_| {
                self.state.abort();
                Error::QueueClosed
            }),
            recv(self.token.channel()) -> _ => Err(Error::Cancelled),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// The expansion pipeline. Construct once per configuration, run per stream.
pub struct Pipeline {
    config: Config,
    scheme: Arc<Scheme>,
    router: Arc<Router>,
    sink: Arc<dyn OutputSink>,
    renderer: Arc<dyn Render>,
}

impl Pipeline {
    /// Wire the pipeline from its collaborators.
    pub fn new(config: Config, unpacker: Arc<Unpacker>, sink: Arc<dyn OutputSink>) -> Self {
        let scheme = Arc::new(Scheme::default());
        let router = Arc::new(Router::with_defaults(
            unpacker,
            Arc::clone(&scheme),
            config.emit,
        ));
        Self {
            config,
            scheme,
            router,
            sink,
            renderer: Arc::new(YamlRenderer),
        }
    }

    /// Process one input stream to completion.
    ///
    /// Returns the first error of the run, unless `allow_failure` downgrades
    /// it to a warning and a successful return.
    pub fn run(&self, input: &mut dyn Read) -> Result<()> {
        let mut manifest = Vec::new();
        input.read_to_end(&mut manifest)?;

        let (canceller, token) = cancel::pair();
        let state = Arc::new(PipelineState::new(canceller, self.config.fail_fast));

        let pool = Pool::new(
            token.clone(),
            Arc::clone(&state),
            PoolOptions {
                workers: self.config.workers,
            },
        );
        let sink_pool = Pool::new(
            token.clone(),
            Arc::clone(&state),
            PoolOptions { workers: 1 },
        );

        let (tx, rx) = bounded::<Emitted>(self.config.workers);

        // The dedicated drain task: sole writer for the whole run.
        {
            let sink = Arc::clone(&self.sink);
            let renderer = Arc::clone(&self.renderer);
            let state = Arc::clone(&state);
            let drain_token = token.clone();
            sink_pool.push(Box::new(move |_| {
                drain(&rx, &drain_token, sink.as_ref(), renderer.as_ref(), &state)
            }))?;
        }

        let documents = split_documents(&manifest);
        tracing::debug!(documents = documents.len(), "submitting documents");

        for doc in documents {
            if token.is_cancelled() {
                break;
            }
            let doc = doc.to_vec();
            let scheme = Arc::clone(&self.scheme);
            let router = Arc::clone(&self.router);
            let emitter = Emitter {
                tx: tx.clone(),
                token: token.clone(),
                state: Arc::clone(&state),
            };
            if pool
                .push(Box::new(move |task_token| {
                    process_document(&doc, &scheme, &router, &emitter, task_token)
                }))
                .is_err()
            {
                break;
            }
        }

        let pool_err = pool.wait();
        drop(tx); // close the queue: the drain task exits once it is drained
        let sink_err = sink_pool.wait();

        // A sink failure is the root cause of any queue-closed task error.
        let run_err = match (pool_err, sink_err) {
            (Some(Error::QueueClosed), Some(sink_err)) => Some(sink_err),
            (Some(err), _) => Some(err),
            (None, sink_err) => sink_err,
        };

        match run_err {
            None => Ok(()),
            Some(err) if self.config.allow_failure => {
                tracing::warn!(error = %err, "run failed; continuing past errors");
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}

/// Classify one top-level document and route it.
///
/// Any top-level decode failure means "not a recognized/parseable object"
/// and is skipped silently; only routed handlers can fail the task.
fn process_document(
    doc: &[u8],
    scheme: &Scheme,
    router: &Router,
    emitter: &Emitter,
    token: &CancelToken,
) -> Result<()> {
    token.check()?;

    let (obj, gvk) = match scheme.decode(doc) {
        Ok(classified) => classified,
        Err(err) => {
            tracing::debug!(error = %err, "skipping undecodable document");
            return Ok(());
        }
    };

    match router.route(&gvk) {
        Some(handler) => handler.handle(
            obj,
            &gvk,
            &TaskContext {
                token,
                emitter,
            },
        ),
        None => {
            tracing::debug!(gvk = %gvk, "dropping document without a route");
            Ok(())
        }
    }
}

/// Drain the result queue into the sink until it is closed and empty, or
/// the run is cancelled (buffered results are discarded then: prompt
/// termination beats output fidelity under fail-fast).
fn drain(
    rx: &Receiver<Emitted>,
    token: &CancelToken,
    sink: &dyn OutputSink,
    renderer: &dyn Render,
    state: &PipelineState,
) -> Result<()> {
    let mut scratch = Vec::new();
    loop {
        select! {
            recv(token.channel()) -> _ => return Ok(()),
            recv(rx) -> msg => {
                let entry = match msg {
                    Ok(entry) => entry,
                    Err(_) => break, // closed and drained
                };
                scratch.clear();
                scratch.extend_from_slice(DOCUMENT_BOUNDARY);
                scratch.push(b'\n');
                match entry {
                    Emitted::Raw(bytes) => scratch.extend_from_slice(&bytes),
                    Emitted::Object(value) => {
                        let rendered = renderer.render(&value).map_err(|err| {
                            state.abort();
                            Error::Io(err)
                        })?;
                        scratch.extend_from_slice(&rendered);
                    }
                }
                if let Err(err) = sink.write_all(&scratch) {
                    tracing::error!(error = %err, "failed to write manifest to output");
                    state.abort();
                    return Err(err.into());
                }
            }
        }
    }
    sink.flush().map_err(|err| {
        state.abort();
        Error::Io(err)
    })
}

// ============================================================================
// Tests
// ============================================================================
