//! Background flush workers.
//!
//! A fixed pool of threads receives flush jobs over a channel. Every job
//! is counted in [`InFlight`] from the moment it is scheduled until it has
//! finished, which is what shutdown waits on.

use crate::publisher::{BatchPublisher, FlushOutcome};
use crate::queue::PayloadQueue;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Count of scheduled-but-unfinished flushes.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub(crate) fn begin(&self) {
        *self.lock() += 1;
    }

    pub(crate) fn finish(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn current(&self) -> usize {
        *self.lock()
    }

    /// Block until no flush is in flight.
    pub(crate) fn wait_idle(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .idle
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks a flush finished when dropped, even if the flush panicked.
struct FinishGuard<'a>(&'a InFlight);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Run one flush that was already counted with [`InFlight::begin`].
pub(crate) fn run_flush(
    publisher: &BatchPublisher,
    queue: &PayloadQueue,
    in_flight: &InFlight,
) -> FlushOutcome {
    let _guard = FinishGuard(in_flight);
    publisher.publish_batch(queue)
}

/// One scheduled flush.
#[derive(Debug)]
struct FlushJob;

/// Fixed pool of flush threads.
pub(crate) struct FlushWorkers {
    sender: Mutex<Option<Sender<FlushJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FlushWorkers {
    /// Start `workers` threads flushing `queue` through `publisher`.
    pub(crate) fn start(
        workers: usize,
        publisher: BatchPublisher,
        queue: Arc<PayloadQueue>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<FlushJob>();
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = rx.clone();
            let publisher = publisher.clone();
            let queue = queue.clone();
            let in_flight = in_flight.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("rustapi-metrics-flush-{}", id))
                .spawn(move || worker_loop(id, &rx, &publisher, &queue, &in_flight));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(worker = id, error = %e, "failed to spawn flush worker"),
            }
        }

        // With no live worker, jobs would sit in the channel forever; drop
        // the sender so `schedule` reports failure and callers flush inline.
        let sender = if handles.is_empty() { None } else { Some(tx) };

        Self {
            sender: Mutex::new(sender),
            handles: Mutex::new(handles),
        }
    }

    /// Hand a flush to the pool. Returns `false` if the pool is closed.
    pub(crate) fn schedule(&self) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match sender.as_ref() {
            Some(tx) => tx.send(FlushJob).is_ok(),
            None => false,
        }
    }

    /// Close the channel and wait for every worker to exit.
    ///
    /// Jobs already queued are still processed before the workers stop.
    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("flush worker panicked");
            }
        }
    }
}

fn worker_loop(
    id: usize,
    rx: &Mutex<Receiver<FlushJob>>,
    publisher: &BatchPublisher,
    queue: &PayloadQueue,
    in_flight: &InFlight,
) {
    tracing::debug!(worker = id, "flush worker started");
    loop {
        // The lock is released before the flush runs, so other workers can
        // pick up the next job meanwhile.
        let job = rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recv();
        match job {
            Ok(FlushJob) => {
                run_flush(publisher, queue, in_flight);
            }
            Err(_) => break,
        }
    }
    tracing::debug!(worker = id, "flush worker stopped");
}
