// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The node runtime: the single owner of one room's ordering engine,
//! reducer, and log, driven by wall-clock ticks and inbound transport
//! traffic.
//!
//! Everything here is single-threaded cooperative (§5): one task drains
//! `inbound_rx`/`peer_event_rx`/the ticker and runs the full commit
//! pipeline to completion before touching the next event. Callers that
//! need concurrency wrap a `NodeRuntime` in an actor or a single mutex,
//! mirroring the teacher's `Arc<Mutex<HubState>>`.

use crate::engine::Engine;
use crate::log::ActionLog;
use crate::ordering::{LockstepOrdering, Outbound};
use crate::room::RoomConfig;
use crate::rule::{ActionMeta, Rule};
use crate::systems::{Scheduler, System};
use crate::transport::Transport;
use lockstep_proto::{wire, Commit, NodeMessage, PeerEvent, PeerId, Tick};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Duration};

/// Errors a submission or the run loop can surface directly to the caller.
/// Wire-level and transport failures are logged and absorbed, per §7 — they
/// never reach here.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("action payload does not decode: {0}")]
    InvalidAction(String),
}

/// A notification delivered to every [`NodeRuntime::subscribe`] receiver.
#[derive(Debug, Clone)]
pub enum NodeEvent<S> {
    /// The optimistic (authoritative + pending) state changed after a local submission.
    Optimistic(S),
    /// A commit was fully reduced into authoritative state.
    Committed { commit: Commit, authoritative: S },
}

struct PendingLocalAction<A> {
    action: A,
    target_tick: Tick,
}

/// Ties [`LockstepOrdering`] to an [`Engine`], an [`ActionLog`], and a
/// [`Transport`], and owns the authoritative/optimistic state pair.
pub struct NodeRuntime<R: Rule, T: Transport, L: ActionLog> {
    self_id: PeerId,
    ordering: LockstepOrdering,
    engine: Engine<R>,
    log: L,
    transport: T,
    authoritative: R::State,
    optimistic: R::State,
    pending: VecDeque<PendingLocalAction<R::Action>>,
    inbound_rx: mpsc::Receiver<(PeerId, NodeMessage)>,
    peer_event_rx: mpsc::Receiver<PeerEvent>,
    events: broadcast::Sender<NodeEvent<R::State>>,
    /// Set once `Log.append` fails. Per §7, `HeightMismatch` is fatal:
    /// every subsequent commit is dropped without being processed.
    halted: bool,
}

impl<R, T, L> NodeRuntime<R, T, L>
where
    R: Rule,
    R::State: Clone + Send + Sync + 'static,
    T: Transport,
    L: ActionLog,
{
    /// Build a runtime for `self_id`, wiring a fresh [`Engine`] from `rule`,
    /// `systems`, and `schedulers` atop `log` and `transport`. Inbound
    /// traffic arrives on `inbound_rx`/`peer_event_rx`, typically fed by a
    /// transport's own receive loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: PeerId,
        config: RoomConfig,
        rule: R,
        systems: Vec<Box<dyn System<R> + Send + Sync>>,
        schedulers: Vec<Box<dyn Scheduler<R> + Send + Sync>>,
        log: L,
        transport: T,
        inbound_rx: mpsc::Receiver<(PeerId, NodeMessage)>,
        peer_event_rx: mpsc::Receiver<PeerEvent>,
    ) -> Self {
        let engine = Engine::new(rule, systems, schedulers);
        let authoritative = engine.initial_state();
        let optimistic = authoritative.clone();
        let (events, _) = broadcast::channel(256);
        Self {
            ordering: LockstepOrdering::new(self_id.clone(), config),
            self_id,
            engine,
            log,
            transport,
            authoritative,
            optimistic,
            pending: VecDeque::new(),
            inbound_rx,
            peer_event_rx,
            events,
            halted: false,
        }
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent<R::State>> {
        self.events.subscribe()
    }

    /// The last committed, fully-agreed state.
    pub fn authoritative_state(&self) -> &R::State {
        &self.authoritative
    }

    /// Authoritative state with this node's still-uncommitted local actions
    /// speculatively applied on top.
    pub fn optimistic_state(&self) -> &R::State {
        &self.optimistic
    }

    /// Start the ordering engine's lifecycle.
    pub fn start(&mut self) {
        self.ordering.start();
    }

    /// Submit a locally authored action. Assigns it a target tick via the
    /// input-delay horizon, updates optimistic state immediately, and
    /// broadcasts the proposal — mirroring §4.8's `submit`.
    pub async fn submit(&mut self, payload: serde_json::Value, now_ms: i64) -> Result<(), NodeError> {
        let action = self
            .engine
            .decode_action(&payload)
            .map_err(NodeError::InvalidAction)?;

        let Some(propose) = self.ordering.on_local_action(payload, now_ms) else {
            // Past its input-delay horizon: dropped silently (I4), nothing
            // to reduce or broadcast.
            return Ok(());
        };
        let NodeMessage::ActionPropose { tick, .. } = &propose else {
            unreachable!("on_local_action only ever returns ACTION_PROPOSE")
        };
        let target_tick = *tick;

        let meta = ActionMeta {
            from: self.self_id.clone(),
            ordering_tick: target_tick,
            height: None,
        };
        self.optimistic = self.engine.reduce(&self.optimistic, &action, &meta);
        self.pending.push_back(PendingLocalAction { action, target_tick });
        let _ = self.events.send(NodeEvent::Optimistic(self.optimistic.clone()));

        self.send_outbound(Outbound::Broadcast(propose), now_ms).await;
        Ok(())
    }

    /// Drain one inbound message or peer event, or advance the clock by one
    /// tick, whichever the caller's event loop selected. Exposed
    /// separately from [`Self::run`] so embedders can drive the runtime
    /// from their own `tokio::select!` if they need to multiplex other
    /// event sources too.
    /// Feed one inbound wire message from `from` through the ordering
    /// engine and drain whatever it produces.
    pub async fn on_message(&mut self, from: PeerId, msg: NodeMessage, now_ms: i64) {
        let output = self.ordering.on_message(from, msg, now_ms);
        self.drain(output.outbound, output.commits, now_ms).await;
    }

    /// Feed a peer connect/disconnect event through the ordering engine and
    /// drain whatever it produces.
    pub async fn on_peer_event(&mut self, event: PeerEvent, now_ms: i64) {
        let output = self.ordering.on_peer_event(event, now_ms);
        self.drain(output.outbound, output.commits, now_ms).await;
    }

    /// Advance the wall clock to `now_ms` and drain whatever sealing and
    /// commits fall out of it.
    pub async fn tick(&mut self, now_ms: i64) {
        let output = self.ordering.tick(now_ms);
        self.drain(output.outbound, output.commits, now_ms).await;
    }

    async fn drain(&mut self, outbound: Vec<Outbound>, commits: Vec<Commit>, now_ms: i64) {
        for msg in outbound {
            self.send_outbound(msg, now_ms).await;
        }
        for commit in commits {
            if self.halted {
                tracing::error!(height = commit.height, "node halted on prior log failure, dropping commit");
                continue;
            }
            self.process_commit(commit).await;
        }
    }

    async fn send_outbound(&self, msg: Outbound, now_ms: i64) {
        let ts = now_ms.max(0) as u64;
        let result = match msg {
            Outbound::Broadcast(message) => match wire::encode_message(&message, ts) {
                Ok(frame) => self.transport.broadcast(frame).await,
                Err(err) => {
                    tracing::warn!(%err, "failed to encode outbound broadcast");
                    return;
                }
            },
            Outbound::Unicast(to, message) => match wire::encode_message(&message, ts) {
                Ok(frame) => self.transport.send(to, frame).await,
                Err(err) => {
                    tracing::warn!(%err, "failed to encode outbound unicast");
                    return;
                }
            },
        };
        if let Err(err) = result {
            tracing::warn!(%err, "transport send failed, continuing (transport owns retry)");
        }
    }

    /// Steps 1-6 of §4.8's `onCommit`: append, rebuild authoritative,
    /// catch up schedulers, drop settled pending entries, rebuild
    /// optimistic, notify.
    async fn process_commit(&mut self, commit: Commit) {
        if let Err(err) = self.log.append(commit.clone()) {
            tracing::error!(%err, height = commit.height, "log append failed, halting further commits");
            self.halted = true;
            return;
        }

        let local_in_commit = commit.actions.iter().filter(|action| action.peer_id == self.self_id).count();

        for action in &commit.actions {
            let Ok(decoded) = self.engine.decode_action(&action.payload) else {
                tracing::warn!(peer_id = %action.peer_id, "committed action failed to decode, skipping");
                continue;
            };
            let meta = ActionMeta {
                from: action.peer_id.clone(),
                ordering_tick: commit.ordering_tick,
                height: Some(commit.height),
            };
            self.authoritative = self.engine.reduce(&self.authoritative, &decoded, &meta);
        }

        self.authoritative = self
            .engine
            .catch_up_schedulers(self.authoritative.clone(), commit.ordering_tick, Some(commit.height));

        for _ in 0..local_in_commit {
            self.pending.pop_front();
        }

        let mut optimistic = self.authoritative.clone();
        for entry in &self.pending {
            let meta = ActionMeta {
                from: self.self_id.clone(),
                ordering_tick: entry.target_tick,
                height: None,
            };
            optimistic = self.engine.reduce(&optimistic, &entry.action, &meta);
        }
        self.optimistic = optimistic;

        let _ = self.events.send(NodeEvent::Committed {
            commit,
            authoritative: self.authoritative.clone(),
        });
    }

    /// Drive the runtime forever: tick every `tick_interval_ms`, drain
    /// inbound messages and peer events as they arrive, until `shutdown`
    /// resolves.
    pub async fn run(&mut self, tick_interval_ms: u64, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = time::interval(Duration::from_millis(tick_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ms = now_ms_monotonic();
                    self.tick(now_ms).await;
                }
                Some((from, msg)) = self.inbound_rx.recv() => {
                    let now_ms = now_ms_monotonic();
                    self.on_message(from, msg, now_ms).await;
                }
                Some(event) = self.peer_event_rx.recv() => {
                    let now_ms = now_ms_monotonic();
                    self.on_peer_event(event, now_ms).await;
                }
                _ = &mut shutdown => {
                    tracing::info!("node runtime received shutdown signal");
                    break;
                }
            }
        }
    }
}

fn now_ms_monotonic() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}
