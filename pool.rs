use crate::error::{InferError, RecognitionError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::oneshot;
use uuid::Uuid;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads for CPU-bound decode and inference work, fed by a
/// bounded queue. Async callers get an awaitable reply per job.
pub struct InferencePool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl InferencePool {
    pub fn new(workers: usize, queue_depth: usize) -> std::io::Result<Self> {
        let (sender, receiver) = bounded::<Job>(queue_depth.max(1));
        let mut handles = Vec::with_capacity(workers.max(1));
        for idx in 0..workers.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("recognition-worker-{idx}"))
                .spawn(move || worker_loop(receiver))?;
            handles.push(handle);
        }
        log::info!(
            "Started {} recognition workers (queue depth {})",
            handles.len(),
            queue_depth.max(1)
        );
        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Runs `task` on a worker thread and waits for its result without
    /// blocking the calling async task's thread.
    pub async fn run<T, F>(&self, task: F) -> Result<T, RecognitionError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| RecognitionError::Worker("pool shut down".into()))?
            .clone();
        let job_id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(task));
            log::debug!("Job {job_id} finished in {:.2?}", started.elapsed());
            let _ = reply_tx.send(outcome.map_err(|_| ()));
        });

        match sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::debug!("Recognition queue full; job {job_id} waiting for a slot");
                tokio::task::spawn_blocking(move || sender.send(job))
                    .await
                    .map_err(|e| RecognitionError::Worker(format!("Task join error: {e}")))?
                    .map_err(|_| RecognitionError::Worker("pool shut down".into()))?;
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(RecognitionError::Worker("pool shut down".into()));
            }
        }

        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => {
                log::warn!("Job {job_id} panicked on a recognition worker");
                Err(InferError::Execution(format!("job {job_id} panicked")).into())
            }
            Err(_) => Err(RecognitionError::Worker(format!(
                "job {job_id} dropped before replying"
            ))),
        }
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    for job in receiver.iter() {
        job();
    }
}

impl Drop for InferencePool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
