//! Serialized inference executor.
//!
//! One engine, one dedicated OS thread, one gate. Requests wait on a
//! FIFO-fair `tokio::sync::Mutex`; the holder's job is handed to the worker
//! thread, which drives the engine's blocking iterator and relays each
//! fragment through a bounded channel. The gate guard travels with the job
//! and is released only when the worker is done with it, so the engine is
//! never driven by two requests at once.
//!
//! Cancellation is cooperative: when the receiving stream is dropped the
//! worker notices at its next send, stops pulling fragments, drops the
//! engine iterator and then the guard.

use ragline_core::{EngineError, InferenceEngine, PipelineError, PromptMessage};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Fragments of one generation, in order. An `Err` item is terminal.
pub type FragmentStream = ReceiverStream<Result<String, EngineError>>;

struct Job {
    prompt: Vec<PromptMessage>,
    max_output_tokens: u32,
    fragments: mpsc::Sender<Result<String, EngineError>>,
    permit: OwnedMutexGuard<()>,
}

/// How a job ended on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayOutcome {
    Completed(usize),
    Cancelled(usize),
    Failed(usize),
}

/// Owns the engine worker and serializes access to it.
pub struct InferenceExecutor {
    gate: Arc<Mutex<()>>,
    jobs: mpsc::UnboundedSender<Job>,
    waiting: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
    fragment_buffer: usize,
    engine_name: String,
}

impl InferenceExecutor {
    /// Move `engine` onto a dedicated worker thread.
    pub fn start(
        engine: Box<dyn InferenceEngine>,
        fragment_buffer: usize,
    ) -> Result<Self, PipelineError> {
        let engine_name = engine.name().to_string();
        let (jobs, receiver) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));

        let worker_busy = busy.clone();
        std::thread::Builder::new()
            .name("ragline-inference".into())
            .spawn(move || run_worker(engine, receiver, worker_busy))
            .map_err(|e| PipelineError::WorkerGone(format!("failed to spawn worker: {e}")))?;

        info!(engine = %engine_name, "Inference worker started");

        Ok(Self {
            gate: Arc::new(Mutex::new(())),
            jobs,
            waiting: Arc::new(AtomicUsize::new(0)),
            busy,
            fragment_buffer: fragment_buffer.max(1),
            engine_name,
        })
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// Requests waiting for the engine (not counting the one being served).
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Whether the engine is generating right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Wait for exclusive use of the engine, then start generating.
    ///
    /// Waiters are served in arrival order. Dropping this future while it
    /// waits gives up the place in line.
    pub async fn submit(
        &self,
        prompt: Vec<PromptMessage>,
        max_output_tokens: u32,
    ) -> Result<FragmentStream, PipelineError> {
        let permit = {
            let _ticket = QueueTicket::new(&self.waiting);
            self.gate.clone().lock_owned().await
        };

        let (fragments, receiver) = mpsc::channel(self.fragment_buffer);
        self.jobs
            .send(Job {
                prompt,
                max_output_tokens,
                fragments,
                permit,
            })
            .map_err(|_| PipelineError::WorkerGone("inference worker has stopped".into()))?;

        Ok(ReceiverStream::new(receiver))
    }
}

/// Counts a request as queued for as long as it lives.
struct QueueTicket<'a>(&'a AtomicUsize);

impl<'a> QueueTicket<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_worker(
    mut engine: Box<dyn InferenceEngine>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    busy: Arc<AtomicBool>,
) {
    while let Some(job) = jobs.blocking_recv() {
        let Job {
            prompt,
            max_output_tokens,
            fragments,
            permit,
        } = job;

        busy.store(true, Ordering::SeqCst);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            relay(engine.as_mut(), &prompt, max_output_tokens, &fragments)
        }));
        busy.store(false, Ordering::SeqCst);

        match outcome {
            Ok(RelayOutcome::Completed(n)) => debug!(fragments = n, "Generation completed"),
            Ok(RelayOutcome::Cancelled(n)) => {
                info!(fragments = n, "Receiver gone, generation stopped")
            }
            Ok(RelayOutcome::Failed(n)) => warn!(fragments = n, "Generation failed"),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "Engine panicked during generation");
                let _ = fragments.blocking_send(Err(EngineError::Panicked(message)));
            }
        }

        drop(fragments);
        drop(permit);
    }
    debug!("Inference worker shutting down");
}

/// Drive one generation, forwarding fragments until done or cancelled.
fn relay(
    engine: &mut dyn InferenceEngine,
    prompt: &[PromptMessage],
    max_output_tokens: u32,
    fragments: &mpsc::Sender<Result<String, EngineError>>,
) -> RelayOutcome {
    let mut iter = match engine.generate(prompt, max_output_tokens) {
        Ok(iter) => iter,
        Err(e) => {
            let _ = fragments.blocking_send(Err(e));
            return RelayOutcome::Failed(0);
        }
    };

    let mut delivered = 0;
    loop {
        if fragments.is_closed() {
            return RelayOutcome::Cancelled(delivered);
        }
        let Some(item) = iter.next() else {
            return RelayOutcome::Completed(delivered);
        };
        let failed = item.is_err();
        if fragments.blocking_send(item).is_err() {
            return RelayOutcome::Cancelled(delivered);
        }
        if failed {
            return RelayOutcome::Failed(delivered);
        }
        delivered += 1;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
