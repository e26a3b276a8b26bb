//! Test fixtures and doubles.
//!
//! Small canonical graphs used across the test suite, a platform factory,
//! and a [`MockCommunicator`] that records dispatched messages and scripts
//! runner replies so orchestrator behavior can be tested without threads.

use crate::archi::{Platform, SharedMemory};
use crate::error::{Error, Result};
use crate::graph::{Graph, ParamKind, VertexKind};
use crate::runtime::comm::Communicator;
use crate::runtime::message::{Notification, ParameterMessage, RunnerMessage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One cluster, `pe_count` PEs, PE 0 as GRT, shared in-process memory.
pub fn test_platform(pe_count: usize) -> Platform {
    let mut platform = Platform::new();
    let cluster = platform.add_cluster("test", Arc::new(SharedMemory::new()));
    for ix in 0..pe_count {
        platform.add_pe(cluster, &format!("pe{ix}"));
    }
    platform
}

/// `A -(rate_a:rate_b)-> B`, no delay, no kernels.
pub fn producer_consumer(rate_a: i64, rate_b: i64) -> Graph {
    let mut graph = Graph::new("producer-consumer");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph.connect(a, 0, rate_a, b, 0, rate_b).expect("valid edge");
    graph
}

/// `A -(1:1, delay d)-> B`.
pub fn delayed_chain(delay: i64, persistent: bool) -> Graph {
    let mut graph = Graph::new("delayed-chain");
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph
        .connect_delayed(a, 0, 1, b, 0, 1, delay, persistent)
        .expect("valid edge");
    graph
}

/// Config actor C sets dynamic parameter `p`; A produces `p` tokens per
/// firing consumed by B at rate 1.
pub fn dynamic_rate_graph() -> Graph {
    let mut graph = Graph::new("dynamic-rate");
    let p = graph.add_param("p", ParamKind::Dynamic);
    graph.add_config("C", 0, 0, vec![p]);
    let a = graph.add_vertex("A", VertexKind::Normal, 0, 1);
    let b = graph.add_vertex("B", VertexKind::Normal, 1, 0);
    graph
        .connect(
            a,
            0,
            crate::expr::Expression::Dynamic(vec![crate::expr::ExprToken::Param(p)]),
            b,
            0,
            1,
        )
        .expect("valid edge");
    graph
}

/// Parent graph embedding a rate-adapting subgraph between two actors.
pub fn hierarchical_graph() -> Graph {
    let mut sub = Graph::new("downsample");
    let input = sub.add_input_interface("in");
    let output = sub.add_output_interface("out");
    let filter = sub.add_vertex("filter", VertexKind::Normal, 1, 1);
    sub.connect(input, 0, 4, filter, 0, 2).expect("valid edge");
    sub.connect(filter, 0, 1, output, 0, 2).expect("valid edge");

    let mut graph = Graph::new("top");
    let source = graph.add_vertex("source", VertexKind::Normal, 0, 1);
    let sink = graph.add_vertex("sink", VertexKind::Normal, 1, 0);
    let instance = graph.add_subgraph(sub);
    graph.connect(source, 0, 4, instance, 0, 4).expect("valid edge");
    graph.connect(instance, 0, 2, sink, 0, 2).expect("valid edge");
    graph
}

/// Scripted reply for config jobs: given the job's task index, the values
/// its parameter message should carry.
pub type ParamResponder = Box<dyn Fn(u32) -> Vec<i64> + Send + Sync>;

/// Communicator double: records everything sent, acknowledges flushes and
/// resets immediately, and answers config jobs through a scripted
/// responder.
pub struct MockCommunicator {
    runner_count: usize,
    sent: Mutex<Vec<(usize, RunnerMessage)>>,
    notifications: Mutex<VecDeque<Notification>>,
    responder: Option<ParamResponder>,
}

impl MockCommunicator {
    pub fn new(runner_count: usize) -> Self {
        MockCommunicator {
            runner_count,
            sent: Mutex::new(Vec::new()),
            notifications: Mutex::new(VecDeque::new()),
            responder: None,
        }
    }

    pub fn with_responder(runner_count: usize, responder: ParamResponder) -> Self {
        MockCommunicator {
            responder: Some(responder),
            ..MockCommunicator::new(runner_count)
        }
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(usize, RunnerMessage)> {
        self.sent.lock().expect("mock lock").clone()
    }

    /// Job messages sent to `runner_ix`, in order.
    pub fn jobs_for(&self, runner_ix: usize) -> Vec<crate::runtime::message::JobMessage> {
        self.sent
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|(ix, _)| *ix == runner_ix)
            .filter_map(|(_, msg)| match msg {
                RunnerMessage::Job(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Communicator for MockCommunicator {
    fn send(&self, runner_ix: usize, msg: RunnerMessage) -> Result<()> {
        if runner_ix >= self.runner_count {
            return Err(Error::Transport(format!("unknown runner {runner_ix}")));
        }
        let mut notifications = self.notifications.lock().expect("mock lock");
        match &msg {
            RunnerMessage::Job(job) if job.out_param_count > 0 => {
                if let Some(responder) = &self.responder {
                    notifications.push_back(Notification::Param(ParameterMessage {
                        task_ix: job.task_ix,
                        values: responder(job.task_ix),
                    }));
                }
            }
            RunnerMessage::Flush => {
                notifications.push_back(Notification::Flushed { runner_ix });
            }
            RunnerMessage::Reset => {
                notifications.push_back(Notification::ResetDone { runner_ix });
            }
            _ => {}
        }
        drop(notifications);
        self.sent.lock().expect("mock lock").push((runner_ix, msg));
        Ok(())
    }

    fn recv_notification(&self) -> Result<Notification> {
        self.notifications
            .lock()
            .expect("mock lock")
            .pop_front()
            .ok_or_else(|| Error::Transport("no notification queued".into()))
    }

    fn try_recv_notification(&self) -> Result<Option<Notification>> {
        Ok(self.notifications.lock().expect("mock lock").pop_front())
    }

    fn runner_count(&self) -> usize {
        self.runner_count
    }
}
