//! Per-PE worker runners and the kernel registry.
//!
//! A runner drains its job queue in order, waits on the completion counters
//! of the runners it depends on, moves bytes for the built-in copy and
//! repeat operations, and calls user kernels for everything else. Config
//! kernels report their produced parameter values back to the orchestrator.

use crate::archi::{MemoryInterface, Platform};
use crate::runtime::comm::{ChannelCommunicator, Communicator, JobTracker};
use crate::runtime::message::{
    JobMessage, JobOp, Notification, ParameterMessage, RunnerMessage, TraceMessage,
};
use crate::sched::fifo::Fifo;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

/// A user kernel: `(params_in, params_out, inputs_per_port,
/// outputs_per_port)`. Returning `Err` aborts the iteration.
pub type KernelFn =
    Arc<dyn Fn(&[i64], &mut [i64], &[Vec<u8>], &mut [Vec<u8>]) -> std::result::Result<(), String> + Send + Sync>;

/// Dense registry of kernels; vertices reference entries by index.
#[derive(Clone, Default)]
pub struct KernelTable {
    kernels: Vec<KernelFn>,
}

impl KernelTable {
    pub fn new() -> Self {
        KernelTable::default()
    }

    pub fn register(&mut self, kernel: KernelFn) -> usize {
        self.kernels.push(kernel);
        self.kernels.len() - 1
    }

    pub fn get(&self, ix: usize) -> Option<&KernelFn> {
        self.kernels.get(ix)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// The live runtime platform: communicator plus one runner thread per PE.
pub struct RtPlatform {
    communicator: Arc<ChannelCommunicator>,
    tracker: Arc<JobTracker>,
    handles: Vec<JoinHandle<()>>,
}

impl RtPlatform {
    /// Spawn one runner per PE of `platform`. All runners resolve buffers
    /// through the GRT cluster's memory interface.
    pub fn start(platform: &Platform, kernels: KernelTable, trace: bool) -> Self {
        let runner_count = platform.pe_count();
        let (comm, job_rxs, notif_tx, tracker) = ChannelCommunicator::new(runner_count);
        let kernels = Arc::new(kernels);
        let memory = platform.grt_memory().clone();
        let mut handles = Vec::with_capacity(runner_count);
        for (ix, rx) in job_rxs.into_iter().enumerate() {
            let ctx = RunnerContext {
                ix,
                kernels: kernels.clone(),
                memory: memory.clone(),
                tracker: tracker.clone(),
                notif_tx: notif_tx.clone(),
                trace,
            };
            handles.push(
                std::thread::Builder::new()
                    .name(format!("runner-{ix}"))
                    .spawn(move || runner_loop(ctx, rx))
                    .expect("spawn runner thread"),
            );
        }
        RtPlatform {
            communicator: Arc::new(comm),
            tracker,
            handles,
        }
    }

    pub fn communicator(&self) -> Arc<ChannelCommunicator> {
        self.communicator.clone()
    }

    pub fn tracker(&self) -> Arc<JobTracker> {
        self.tracker.clone()
    }
}

impl Drop for RtPlatform {
    fn drop(&mut self) {
        for ix in 0..self.communicator.runner_count() {
            let _ = self.communicator.send(ix, RunnerMessage::Stop);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

struct RunnerContext {
    ix: usize,
    kernels: Arc<KernelTable>,
    memory: Arc<dyn MemoryInterface>,
    tracker: Arc<JobTracker>,
    notif_tx: Sender<Notification>,
    trace: bool,
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

fn runner_loop(ctx: RunnerContext, rx: Receiver<RunnerMessage>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            RunnerMessage::Job(job) => run_job(&ctx, job),
            RunnerMessage::Flush => {
                let _ = ctx.notif_tx.send(Notification::Flushed { runner_ix: ctx.ix });
            }
            RunnerMessage::Reset => {
                // drop whatever is still queued without executing it
                while let Ok(pending) = rx.try_recv() {
                    if matches!(pending, RunnerMessage::Stop) {
                        let _ = ctx.notif_tx.send(Notification::ResetDone { runner_ix: ctx.ix });
                        return;
                    }
                }
                let _ = ctx.notif_tx.send(Notification::ResetDone { runner_ix: ctx.ix });
            }
            RunnerMessage::Stop => return,
        }
    }
}

fn read_port(memory: &dyn MemoryInterface, pieces: &[Fifo]) -> Vec<u8> {
    let mut data = Vec::new();
    for piece in pieces {
        data.extend(memory.read(piece.address, u64::from(piece.offset), u64::from(piece.size)));
    }
    data
}

/// Write one produced window to its pieces: the first piece takes the whole
/// window, extra pieces take its suffix.
fn write_port(memory: &dyn MemoryInterface, pieces: &[Fifo], data: &[u8]) {
    for (n, piece) in pieces.iter().enumerate() {
        if n == 0 {
            memory.write(piece.address, u64::from(piece.offset), data);
        } else {
            let keep = (piece.size as usize).min(data.len());
            memory.write(piece.address, u64::from(piece.offset), &data[data.len() - keep..]);
        }
    }
}

fn run_job(ctx: &RunnerContext, job: JobMessage) {
    for constraint in &job.constraints {
        ctx.tracker.wait_for(constraint.runner_ix, constraint.job_ix);
    }
    let start = now_ns();

    let inputs: Vec<Vec<u8>> = job
        .inputs
        .iter()
        .map(|pieces| read_port(ctx.memory.as_ref(), pieces))
        .collect();

    match job.op {
        JobOp::None => {}
        JobOp::Copy => {
            let stream: Vec<u8> = inputs.concat();
            let mut cursor = 0usize;
            for pieces in &job.outputs {
                let size = pieces.first().map_or(0, |p| p.size as usize);
                let end = (cursor + size).min(stream.len());
                write_port(ctx.memory.as_ref(), pieces, &stream[cursor..end]);
                cursor = end;
            }
        }
        JobOp::Repeat => {
            let stream: Vec<u8> = inputs.concat();
            for pieces in &job.outputs {
                let size = pieces.first().map_or(0, |p| p.size as usize);
                let mut data = Vec::with_capacity(size);
                while data.len() < size && !stream.is_empty() {
                    let take = (size - data.len()).min(stream.len());
                    data.extend_from_slice(&stream[..take]);
                }
                write_port(ctx.memory.as_ref(), pieces, &data);
            }
        }
        JobOp::Kernel(kernel_ix) => {
            let Some(kernel) = ctx.kernels.get(kernel_ix) else {
                let _ = ctx.notif_tx.send(Notification::KernelError {
                    runner_ix: ctx.ix,
                    task_ix: job.task_ix,
                    message: format!("unknown kernel index {kernel_ix}"),
                });
                ctx.tracker.mark_done(ctx.ix);
                return;
            };
            let mut outputs: Vec<Vec<u8>> = job
                .outputs
                .iter()
                .map(|pieces| vec![0u8; pieces.first().map_or(0, |p| p.size as usize)])
                .collect();
            let mut params_out = vec![0i64; job.out_param_count as usize];
            match kernel(&job.params, &mut params_out, &inputs, &mut outputs) {
                Ok(()) => {
                    for (pieces, data) in job.outputs.iter().zip(&outputs) {
                        write_port(ctx.memory.as_ref(), pieces, data);
                    }
                    if job.out_param_count > 0 {
                        let _ = ctx.notif_tx.send(Notification::Param(ParameterMessage {
                            task_ix: job.task_ix,
                            values: params_out,
                        }));
                    }
                }
                Err(message) => {
                    let _ = ctx.notif_tx.send(Notification::KernelError {
                        runner_ix: ctx.ix,
                        task_ix: job.task_ix,
                        message,
                    });
                    ctx.tracker.mark_done(ctx.ix);
                    return;
                }
            }
        }
    }

    if ctx.trace {
        let _ = ctx.notif_tx.send(Notification::Trace(TraceMessage {
            runner_ix: ctx.ix,
            task_ix: job.task_ix,
            start_ns: start,
            end_ns: now_ns(),
        }));
    }
    ctx.tracker.mark_done(ctx.ix);
}
