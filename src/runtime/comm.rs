//! The communication seam between the orchestrator and the runners.
//!
//! The orchestrator never talks to a runner directly; it goes through a
//! [`Communicator`], which any transport can implement. The in-process
//! implementation backs the two logical channels (jobs out, notifications
//! in) with crossbeam channels.

use crate::error::{Error, Result};
use crate::runtime::message::{JobMessage, Notification, RunnerMessage};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Condvar, Mutex};

/// Transport abstraction for job dispatch and runner notifications.
pub trait Communicator: Send + Sync {
    /// Send a message to runner `runner_ix`, preserving per-runner order.
    fn send(&self, runner_ix: usize, msg: RunnerMessage) -> Result<()>;

    /// Block until a runner notification arrives.
    fn recv_notification(&self) -> Result<Notification>;

    /// Non-blocking variant of [`Communicator::recv_notification`].
    fn try_recv_notification(&self) -> Result<Option<Notification>>;

    fn runner_count(&self) -> usize;

    /// Reset per-iteration synchronization state.
    fn begin_iteration(&self) {}

    fn send_job(&self, runner_ix: usize, job: JobMessage) -> Result<()> {
        self.send(runner_ix, RunnerMessage::Job(job))
    }
}

/// Shared completion counters used by runners to honor job constraints.
#[derive(Debug, Default)]
pub struct JobTracker {
    counts: Mutex<Vec<u32>>,
    cv: Condvar,
}

impl JobTracker {
    pub fn new(runner_count: usize) -> Self {
        JobTracker {
            counts: Mutex::new(vec![0; runner_count]),
            cv: Condvar::new(),
        }
    }

    /// Block until runner `runner_ix` has completed job `job_ix`.
    pub fn wait_for(&self, runner_ix: usize, job_ix: u32) {
        let mut counts = self.counts.lock().expect("tracker lock");
        while counts[runner_ix] <= job_ix {
            counts = self.cv.wait(counts).expect("tracker lock");
        }
    }

    /// Record one more completed job on `runner_ix`.
    pub fn mark_done(&self, runner_ix: usize) {
        let mut counts = self.counts.lock().expect("tracker lock");
        counts[runner_ix] += 1;
        self.cv.notify_all();
    }

    pub fn completed(&self, runner_ix: usize) -> u32 {
        self.counts.lock().expect("tracker lock")[runner_ix]
    }

    pub fn reset(&self) {
        let mut counts = self.counts.lock().expect("tracker lock");
        counts.fill(0);
        self.cv.notify_all();
    }
}

/// In-process communicator: one channel per runner plus one shared
/// notification channel.
pub struct ChannelCommunicator {
    job_txs: Vec<Sender<RunnerMessage>>,
    notif_rx: Receiver<Notification>,
    tracker: std::sync::Arc<JobTracker>,
}

impl ChannelCommunicator {
    /// Build the communicator and the runner-side endpoints.
    pub fn new(
        runner_count: usize,
    ) -> (Self, Vec<Receiver<RunnerMessage>>, Sender<Notification>, std::sync::Arc<JobTracker>) {
        let mut job_txs = Vec::with_capacity(runner_count);
        let mut job_rxs = Vec::with_capacity(runner_count);
        for _ in 0..runner_count {
            let (tx, rx) = unbounded();
            job_txs.push(tx);
            job_rxs.push(rx);
        }
        let (notif_tx, notif_rx) = unbounded();
        let tracker = std::sync::Arc::new(JobTracker::new(runner_count));
        (
            ChannelCommunicator {
                job_txs,
                notif_rx,
                tracker: tracker.clone(),
            },
            job_rxs,
            notif_tx,
            tracker,
        )
    }
}

impl Communicator for ChannelCommunicator {
    fn send(&self, runner_ix: usize, msg: RunnerMessage) -> Result<()> {
        self.job_txs
            .get(runner_ix)
            .ok_or_else(|| Error::Transport(format!("unknown runner {runner_ix}")))?
            .send(msg)
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn recv_notification(&self) -> Result<Notification> {
        self.notif_rx
            .recv()
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn try_recv_notification(&self) -> Result<Option<Notification>> {
        match self.notif_rx.try_recv() {
            Ok(n) => Ok(Some(n)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(e) => Err(Error::Transport(e.to_string())),
        }
    }

    fn runner_count(&self) -> usize {
        self.job_txs.len()
    }

    fn begin_iteration(&self) {
        self.tracker.reset();
    }
}
