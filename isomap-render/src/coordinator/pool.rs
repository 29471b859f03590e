use std::{
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result};
use log::{debug, error, trace};
use tokio::sync::{mpsc, oneshot};

use crate::{
    RenderError,
    worker::{BatchReport, TileJob, WorkerContext},
};

/// The pending result of a submitted batch.
pub(crate) type PendingBatch = oneshot::Receiver<Result<BatchReport>>;

struct Submission {
    batch: Vec<TileJob>,
    reply: oneshot::Sender<Result<BatchReport>>,
}

/// Runs batches either on the calling thread or on a pool of worker threads.
pub(crate) enum Executor {
    Inline(Box<WorkerContext>),
    Pool(WorkerPool),
}

impl Executor {
    /// Hands a batch to a worker.
    ///
    /// Inline batches are processed right away and fail here, pooled batches report their errors
    /// through the returned receiver.
    pub(crate) fn submit(&mut self, batch: Vec<TileJob>) -> Result<PendingBatch> {
        match self {
            Self::Inline(context) => {
                let report = context.process_batch(&batch)?;
                let (reply, pending) = oneshot::channel();
                // the receiver is still alive
                reply.send(Ok(report)).ok();
                Ok(pending)
            }
            Self::Pool(pool) => pool.submit(batch),
        }
    }

    /// Waits for all workers to finish.
    pub(crate) fn shutdown(self) {
        if let Self::Pool(pool) = self {
            pool.shutdown();
        }
    }
}

/// A fixed number of threads pulling batches from a shared queue.
pub(crate) struct WorkerPool {
    submissions: mpsc::UnboundedSender<Submission>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts one thread per worker context.
    pub(crate) fn start(contexts: Vec<WorkerContext>) -> Result<Self> {
        let (submissions, receiver) = mpsc::unbounded_channel::<Submission>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(contexts.len());
        for (index, context) in contexts.into_iter().enumerate() {
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("render-worker-{index}"))
                .spawn(move || Self::run(index, context, &receiver))
                .context("starting render worker")?;
            workers.push(worker);
        }
        debug!("started {} render workers", workers.len());
        Ok(Self {
            submissions,
            workers,
        })
    }

    fn run(
        index: usize,
        mut context: WorkerContext,
        receiver: &Mutex<mpsc::UnboundedReceiver<Submission>>,
    ) {
        loop {
            // only one idle worker waits on the queue, the others wait for the lock
            let submission = receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .blocking_recv();
            let Some(Submission { batch, reply }) = submission else {
                break;
            };
            let result = context.process_batch(&batch).inspect_err(|error| {
                if RenderError::is_interrupt(error) {
                    trace!("render worker {index} skipped a batch after cancellation");
                } else {
                    error!("render worker {index} failed: {error:#}");
                }
            });
            if reply.send(result).is_err() {
                trace!("render worker {index}: nobody is waiting for the result anymore");
            }
        }
        trace!("render worker {index} finished");
    }

    fn submit(&self, batch: Vec<TileJob>) -> Result<PendingBatch> {
        let (reply, pending) = oneshot::channel();
        self.submissions
            .send(Submission { batch, reply })
            .map_err(|_| RenderError::WorkerTerminated)?;
        Ok(pending)
    }

    fn shutdown(self) {
        let Self {
            submissions,
            workers,
        } = self;
        drop(submissions);
        for worker in workers {
            if worker.join().is_err() {
                error!("a render worker panicked");
            }
        }
        debug!("all render workers finished");
    }
}
