//! The simulation driver: a single-threaded event loop over the fabric
//! and the consensus machines.

use crate::error::SimulationError;
use crate::event_queue::EventQueue;
use crate::rng::endpoint_rng;
use crate::stats::ConsensusStatistics;
use latticebft_core::{ConsensusProcess, Event, ExpService, Outbound, StepOutput, TimerTag};
use latticebft_fabric::{build, Fabric, Port, TopologyKind};
use latticebft_types::{NodeId, Payload, SimTime, ValidatorId};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Message wrapper carrying the sender's identity. Messages are trusted by
/// structure; the envelope stands in for a signature.
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    pub from: ValidatorId,
    pub body: M,
}

impl<M: fmt::Display> fmt::Display for Envelope<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.body, self.from)
    }
}

/// Static configuration for one trial.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Validator count `N`.
    pub num_validators: usize,
    /// Terminate once every validator decides this many instances.
    pub num_consensus: u64,
    /// Exponential service rate for validators; `-1` for instantaneous.
    pub node_processing_rate: f64,
    /// Exponential service rate for switches; `-1` for instantaneous.
    pub switch_processing_rate: f64,
    /// Which fabric to construct.
    pub topology: TopologyKind,
    /// Per-topology parameters.
    pub topology_params: Vec<i64>,
    /// Optional real-time budget for the whole trial.
    pub wall_clock_budget: Option<Duration>,
}

/// Counters accumulated over one trial.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    /// Events dispatched.
    pub events_processed: u64,
    /// `QueueMessage` events scheduled (hops, not end-to-end messages).
    pub messages_routed: u64,
    /// Timer expiries dispatched (live or stale).
    pub timers_fired: u64,
    /// Service times drawn from the shared stream.
    pub service_draws: u64,
}

/// Deterministic simulation runner.
///
/// Owns the fabric, the consensus machines, the event queue, and the
/// shared uniform stream. Given the same seed and configuration it
/// produces a byte-identical trace every run.
pub struct SimulationRunner<P: ConsensusProcess> {
    fabric: Fabric<Envelope<P::Message>>,
    machines: Vec<P>,
    stats: Vec<ConsensusStatistics>,
    queue: EventQueue<Envelope<P::Message>>,
    /// The trial-wide uniform stream; every service draw advances it.
    rng: ChaCha8Rng,
    now: SimTime,
    num_consensus: u64,
    wall_clock_budget: Option<Duration>,
    started: Instant,
    summary: RunSummary,
}

impl<P: ConsensusProcess> SimulationRunner<P> {
    /// Construct the fabric and machines and schedule the initial events:
    /// one `PollQueue` and one `ProtocolStart` per validator, both at
    /// time zero.
    pub fn new(
        config: &RunnerConfig,
        seed: u64,
        mut make_machine: impl FnMut(ValidatorId) -> P,
    ) -> Result<Self, SimulationError> {
        let mut fabric = Fabric::new();
        for i in 0..config.num_validators as u32 {
            fabric.add_endpoint(
                format!("Validator-{i}"),
                ExpService::new(config.node_processing_rate),
                endpoint_rng(seed, ValidatorId(i)),
            );
        }
        build(
            &mut fabric,
            config.topology,
            &config.topology_params,
            config.switch_processing_rate,
        )?;

        let machines: Vec<P> = (0..config.num_validators as u32)
            .map(|i| make_machine(ValidatorId(i)))
            .collect();
        let stats = vec![ConsensusStatistics::new(P::state_names()); config.num_validators];

        let mut runner = Self {
            fabric,
            machines,
            stats,
            queue: EventQueue::new(),
            rng: crate::rng::trial_rng(seed),
            now: SimTime::ZERO,
            num_consensus: config.num_consensus,
            wall_clock_budget: config.wall_clock_budget,
            started: Instant::now(),
            summary: RunSummary::default(),
        };

        for i in 0..config.num_validators as u32 {
            let node = NodeId(i);
            runner.fabric.set_poll_pending(node, true);
            runner.queue.schedule(Event::PollQueue {
                time: SimTime::ZERO,
                node,
            });
        }
        for i in 0..config.num_validators as u32 {
            runner.queue.schedule(Event::ProtocolStart {
                time: SimTime::ZERO,
                node: NodeId(i),
            });
        }

        info!(
            validators = config.num_validators,
            topology = ?config.topology,
            ports = runner.fabric.len(),
            seed,
            "created simulation runner"
        );
        Ok(runner)
    }

    // ─── Accessors ───

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn machine(&self, id: ValidatorId) -> Option<&P> {
        self.machines.get(id.0 as usize)
    }

    pub fn statistics(&self, id: ValidatorId) -> Option<&ConsensusStatistics> {
        self.stats.get(id.0 as usize)
    }

    pub fn fabric(&self) -> &Fabric<Envelope<P::Message>> {
        &self.fabric
    }

    /// Whether the trial is finished: every validator reached the
    /// configured consensus count, the queue drained, or the wall-clock
    /// budget expired.
    pub fn is_over(&self) -> bool {
        if self.queue.is_empty() {
            return true;
        }
        if self
            .machines
            .iter()
            .all(|m| m.consensus_count() >= self.num_consensus)
        {
            return true;
        }
        if let Some(budget) = self.wall_clock_budget {
            if self.started.elapsed() >= budget {
                debug!("wall-clock budget expired");
                return true;
            }
        }
        false
    }

    /// Pop and dispatch the earliest event; returns its trace line.
    pub fn step(&mut self) -> Result<String, SimulationError> {
        let (key, event) = self
            .queue
            .pop_first()
            .ok_or_else(|| SimulationError::invariant("step called on an empty event queue"))?;
        self.now = key.time;
        self.summary.events_processed += 1;
        trace!(time = %self.now, event = event.type_name(), node = %event.node(), "dispatch");
        self.dispatch(event)
    }

    /// Run until [`is_over`](Self::is_over), feeding each trace line to
    /// `on_line`.
    pub fn run(&mut self, mut on_line: impl FnMut(&str)) -> Result<(), SimulationError> {
        while !self.is_over() {
            let line = self.step()?;
            on_line(&line);
        }
        Ok(())
    }

    /// Final snapshot: per-validator state, per-state cumulative time, and
    /// consensus count.
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        for (i, machine) in self.machines.iter().enumerate() {
            let id = ValidatorId(i as u32);
            let name = self.fabric.name(NodeId(id.0));
            out.push_str(&format!("{name} [{}]: ", machine.state_name()));
            if let Some(stats) = self.stats.get(i) {
                out.push_str(&stats.to_string());
            }
            out.push('\n');
        }
        out
    }

    // ─── Event dispatch ───

    fn dispatch(&mut self, event: Event<Envelope<P::Message>>) -> Result<String, SimulationError> {
        match event {
            Event::QueueMessage {
                time,
                node,
                payload,
            } => self.queue_message(time, node, payload),
            Event::PollQueue { time, node } => self.poll_queue(time, node),
            Event::ProcessPayload {
                time,
                node,
                payload,
            } => self.process_payload(time, node, payload),
            Event::TimerExpiry { time, node, tag } => self.timer_expiry(time, node, tag),
            Event::ProtocolStart { time, node } => self.protocol_start(time, node),
        }
    }

    /// Payload arrival: enqueue, and re-poll the port if it is idle with
    /// no poll already pending.
    fn queue_message(
        &mut self,
        time: SimTime,
        node: NodeId,
        payload: Payload<Envelope<P::Message>>,
    ) -> Result<String, SimulationError> {
        let line = format!(
            "{time} (QueueMessage): {} queued at {}",
            payload.message,
            self.fabric.name(node)
        );

        let busy = self
            .fabric
            .is_busy(node)
            .ok_or_else(|| SimulationError::invariant(format!("unknown port {node}")))?;
        let pending = self.fabric.poll_pending(node).unwrap_or(false);
        self.fabric.ingress_push(node, payload);
        if !busy && !pending {
            self.fabric.set_poll_pending(node, true);
            self.queue.schedule(Event::PollQueue { time, node });
        }
        Ok(line)
    }

    /// Service completion / re-poll: the port goes idle, then takes the
    /// next queued payload if there is one.
    fn poll_queue(&mut self, time: SimTime, node: NodeId) -> Result<String, SimulationError> {
        if self.fabric.port(node).is_none() {
            return Err(SimulationError::invariant(format!("unknown port {node}")));
        }
        self.fabric.set_poll_pending(node, false);
        self.fabric.set_busy(node, false);

        if let Some(payload) = self.fabric.ingress_pop(node) {
            self.fabric.set_busy(node, true);
            let line = format!(
                "{time} (PollQueue): {} dequeues {}",
                self.fabric.name(node),
                payload.message
            );
            self.queue.schedule(Event::ProcessPayload {
                time,
                node,
                payload,
            });
            Ok(line)
        } else {
            Ok(format!(
                "{time} (PollQueue): {} idle",
                self.fabric.name(node)
            ))
        }
    }

    /// One service: draw the service time, let the port act on the
    /// payload, convert the products into events at `time + s`.
    fn process_payload(
        &mut self,
        time: SimTime,
        node: NodeId,
        payload: Payload<Envelope<P::Message>>,
    ) -> Result<String, SimulationError> {
        let service = self
            .fabric
            .service(node)
            .ok_or_else(|| SimulationError::invariant(format!("unknown port {node}")))?;
        if !service.is_instant() {
            self.summary.service_draws += 1;
        }
        let duration = service.sample(&mut self.rng);
        let end = time.after(duration);

        let is_endpoint = match self.fabric.port(node) {
            Some(Port::Endpoint(_)) => true,
            Some(Port::Switch(_)) => false,
            None => {
                return Err(SimulationError::invariant(format!("unknown port {node}")));
            }
        };

        let line = if is_endpoint {
            if payload.destination != node {
                return Err(SimulationError::invariant(format!(
                    "endpoint {} got a payload destined for {}",
                    self.fabric.name(node),
                    payload.destination
                )));
            }
            let line = format!(
                "{time}-{end} (ProcessPayload): {} processing {}",
                self.fabric.name(node),
                payload.message
            );
            let Envelope { from, body } = payload.message;
            let id = ValidatorId(node.0);
            self.deliver_to_machine(id, node, end, from, body)?;
            line
        } else {
            let next = match self.fabric.port(node) {
                Some(Port::Switch(switch)) => switch.route(payload.destination),
                _ => None,
            }
            .ok_or_else(|| {
                SimulationError::invariant(format!(
                    "switch {} has no route to {}",
                    self.fabric.name(node),
                    payload.destination
                ))
            })?;
            let line = format!(
                "{time}-{end} (ProcessPayload): {} forwards {} to {}",
                self.fabric.name(node),
                payload.message,
                self.fabric.name(next)
            );
            let mut forwarded = payload;
            forwarded.last_hop = node;
            self.summary.messages_routed += 1;
            self.queue.schedule(Event::QueueMessage {
                time: end,
                node: next,
                payload: forwarded,
            });
            line
        };

        self.fabric.set_poll_pending(node, true);
        self.queue.schedule(Event::PollQueue { time: end, node });
        Ok(line)
    }

    fn timer_expiry(
        &mut self,
        time: SimTime,
        node: NodeId,
        tag: TimerTag,
    ) -> Result<String, SimulationError> {
        self.summary.timers_fired += 1;
        let id = ValidatorId(node.0);
        let machine = self
            .machines
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimulationError::invariant(format!("timer for non-validator {node}")))?;

        // A stale expiry must leave both validator state and statistics
        // untouched.
        if tag != machine.timer_tag() {
            return Ok(format!(
                "{time} (TimerExpiry): {} tag {} stale",
                self.fabric.name(node),
                tag.0
            ));
        }

        let state_before = machine.state_name();
        let out = machine.on_timer(time, tag);
        let count = machine.consensus_count();
        self.apply_output(id, node, time, out)?;
        self.record(id, state_before, time, count)?;
        Ok(format!(
            "{time} (TimerExpiry): {} tag {} fires in {state_before}",
            self.fabric.name(node),
            tag.0
        ))
    }

    fn protocol_start(&mut self, time: SimTime, node: NodeId) -> Result<String, SimulationError> {
        let id = ValidatorId(node.0);
        let machine = self
            .machines
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimulationError::invariant(format!("start for non-validator {node}")))?;
        let state_before = machine.state_name();
        let out = machine.start(time);
        let count = machine.consensus_count();
        self.apply_output(id, node, time, out)?;
        self.record(id, state_before, time, count)?;
        Ok(format!(
            "{time} (ProtocolStart): {} starts consensus",
            self.fabric.name(node)
        ))
    }

    // ─── Machine plumbing ───

    fn deliver_to_machine(
        &mut self,
        id: ValidatorId,
        node: NodeId,
        at: SimTime,
        from: ValidatorId,
        body: P::Message,
    ) -> Result<(), SimulationError> {
        let machine = self
            .machines
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimulationError::invariant(format!("no machine for {id}")))?;
        let state_before = machine.state_name();
        let out = machine.deliver(at, from, body);
        let count = machine.consensus_count();
        self.apply_output(id, node, at, out)?;
        self.record(id, state_before, at, count)
    }

    /// Convert a machine's output into events: broadcasts fan out one
    /// payload per validator in id order, each payload enters the fabric
    /// at the sender's chosen uplink, and a timer request becomes a
    /// `TimerExpiry`.
    fn apply_output(
        &mut self,
        id: ValidatorId,
        node: NodeId,
        at: SimTime,
        out: StepOutput<P::Message>,
    ) -> Result<(), SimulationError> {
        for outbound in out.outbound {
            match outbound {
                Outbound::Broadcast(message) => {
                    for dest in 0..self.machines.len() as u32 {
                        self.send(id, node, at, ValidatorId(dest), message.clone())?;
                    }
                }
                Outbound::Unicast(dest, message) => self.send(id, node, at, dest, message)?,
            }
        }
        if let Some(arm) = out.timer {
            self.queue.schedule(Event::TimerExpiry {
                time: at.after(arm.delay),
                node,
                tag: arm.tag,
            });
        }
        Ok(())
    }

    fn send(
        &mut self,
        from: ValidatorId,
        from_node: NodeId,
        at: SimTime,
        to: ValidatorId,
        body: P::Message,
    ) -> Result<(), SimulationError> {
        let dest_node = NodeId(to.0);
        let payload = Payload::new(Envelope { from, body }, from_node, dest_node);
        let uplink = self.fabric.next_hop(from_node, dest_node).ok_or_else(|| {
            SimulationError::invariant(format!(
                "endpoint {} has no uplink",
                self.fabric.name(from_node)
            ))
        })?;
        self.summary.messages_routed += 1;
        self.queue.schedule(Event::QueueMessage {
            time: at,
            node: uplink,
            payload,
        });
        Ok(())
    }

    fn record(
        &mut self,
        id: ValidatorId,
        state_before: &'static str,
        at: SimTime,
        count: u64,
    ) -> Result<(), SimulationError> {
        let stats = self
            .stats
            .get_mut(id.0 as usize)
            .ok_or_else(|| SimulationError::invariant(format!("no statistics for {id}")))?;
        stats.record(state_before, at, count);
        Ok(())
    }
}
