// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod state;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use hashgraph_config::{Peer, PeerId, PeerSet};
use parking_lot::Mutex;
use rand::{seq::SliceRandom as _, Rng as _};
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    app_proxy::AppProxy,
    context::Context,
    core::Core,
    error::{HashgraphError, HashgraphResult},
    event::Transaction,
    internal_transaction::{InternalTransaction, PeerOp},
    node::state::{NodeState, StateHandle},
    store::Store,
    transport::{
        messages::{
            EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse,
            JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, Request, Response, SyncRequest,
            SyncResponse,
        },
        InboundRpc, Transport,
    },
    types::RoundIndex,
};

/// Consecutive fast-forward failures tolerated before suspending.
const CATCH_UP_FAILURE_LIMIT: u32 = 20;

type Waiters = AsyncMutex<HashMap<PeerId, Vec<oneshot::Sender<Response>>>>;

/// The node controller: one gossiping validator. Multiplexes the inbound RPC
/// queue, the heartbeat-driven gossip loop and block commits over a single
/// serialized [`Core`].
pub struct Node {
    context: Arc<Context>,
    id: PeerId,
    core: Arc<AsyncMutex<Core>>,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    app_proxy: Arc<dyn AppProxy>,
    state: StateHandle,
    shutdown: watch::Sender<bool>,
    /// Join/leave requests whose responses wait for a commit.
    join_waiters: Waiters,
    leave_waiters: Waiters,
    /// Gossip backoff per peer: (consecutive failures, next eligible tick).
    backoff: Mutex<HashMap<PeerId, (u32, u64)>>,
    tick: AtomicU64,
    catch_up_failures: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(
        context: Context,
        validator: crate::validator::Validator,
        genesis_peers: PeerSet,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        app_proxy: Arc<dyn AppProxy>,
    ) -> HashgraphResult<Self> {
        if context.parameters.load_peers {
            store.set_peer_set(0, genesis_peers)?;
        }
        let context = Arc::new(context);
        let id = validator.id();
        let core = Core::new(context.clone(), validator, store.clone());

        let initial = if store
            .get_peer_set(RoundIndex::MAX)
            .map(|p| p.contains(id))
            .unwrap_or(false)
        {
            NodeState::Gossiping
        } else {
            NodeState::Joining
        };

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            context,
            id,
            core: Arc::new(AsyncMutex::new(core)),
            store,
            transport,
            app_proxy,
            state: StateHandle::new(initial),
            shutdown,
            join_waiters: AsyncMutex::new(HashMap::new()),
            leave_waiters: AsyncMutex::new(HashMap::new()),
            backoff: Mutex::new(HashMap::new()),
            tick: AtomicU64::new(0),
            catch_up_failures: AtomicU32::new(0),
            tasks: Mutex::new(vec![]),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn local_address(&self) -> String {
        self.transport.local_address()
    }

    /// Replays a pre-existing durable store into the graph, re-committing its
    /// blocks to the application. Call once, before `start`.
    pub async fn init(&self) -> HashgraphResult<()> {
        if !self.context.parameters.bootstrap {
            return Ok(());
        }
        let mut core = self.core.lock().await;
        core.bootstrap()?;
        self.commit_pending(&mut core).await?;
        info!(
            "bootstrap replayed up to block {:?}",
            self.store.last_block_index()
        );
        Ok(())
    }

    /// Spawns the node's tasks. With `gossip` disabled the node only serves
    /// inbound RPCs, which the RPC-level tests rely on.
    pub fn start(self: Arc<Self>, gossip: bool) {
        let mut tasks = self.tasks.lock();
        let node = self.clone();
        tasks.push(tokio::spawn(async move { node.inbound_loop().await }));
        if gossip {
            let node = self.clone();
            tasks.push(tokio::spawn(async move { node.control_loop().await }));
        }
    }

    /// Signals every task and waits briefly for them to drain.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.state.transition(NodeState::Shutdown);
        self.app_proxy.on_state_changed(NodeState::Shutdown).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Thread-safe submission into the pending pool, drained by the next
    /// self-event.
    pub async fn submit_transactions(&self, transactions: Vec<Transaction>) -> HashgraphResult<()> {
        self.core.lock().await.add_transactions(transactions)
    }

    /// Requests this node's own removal and keeps gossiping until it commits.
    pub async fn leave(&self) -> HashgraphResult<()> {
        let mut core = self.core.lock().await;
        let peer = core
            .validator()
            .peer(&self.transport.local_address());
        let transaction = InternalTransaction::new_signed(
            PeerOp::Leave,
            peer,
            &core.validator().keypair().clone(),
        );
        core.add_internal_transaction(transaction)?;
        drop(core);
        self.set_state(NodeState::Leaving).await;
        Ok(())
    }

    /// One explicit join attempt against a random member of the current set.
    pub async fn join(&self) -> HashgraphResult<RoundIndex> {
        let (peers, transaction) = {
            let core = self.core.lock().await;
            let peer = core.validator().peer(&self.transport.local_address());
            (
                core.peers()?,
                InternalTransaction::new_signed(
                    PeerOp::Join,
                    peer,
                    &core.validator().keypair().clone(),
                ),
            )
        };
        let Some(target) = self.pick_peer(&peers, false) else {
            return Err(HashgraphError::Network("no peers to join through".to_string()));
        };

        let response = self
            .transport
            .join(
                &target.address,
                JoinRequest { transaction },
                self.context.parameters.join_timeout,
            )
            .await?;
        if !response.accepted {
            return Err(HashgraphError::Rejected("join request declined".to_string()));
        }
        let accepted_round = response
            .accepted_round
            .ok_or_else(|| HashgraphError::Rejected("join response carried no round".to_string()))?;
        self.core.lock().await.note_accepted_round(accepted_round);
        info!("join accepted, effective round {}", accepted_round);
        Ok(accepted_round)
    }

    pub async fn accepted_round(&self) -> Option<RoundIndex> {
        self.core.lock().await.accepted_round()
    }

    pub async fn removed_round(&self) -> Option<RoundIndex> {
        self.core.lock().await.removed_round()
    }

    pub async fn first_consensus_round(&self) -> Option<RoundIndex> {
        self.core.lock().await.hashgraph().first_consensus_round()
    }

    async fn set_state(&self, next: NodeState) {
        if self.state.get() == next {
            return;
        }
        if self.state.transition(next) {
            self.context
                .metrics
                .node_metrics
                .state_transitions
                .with_label_values(&[&next.to_string()])
                .inc();
            self.app_proxy.on_state_changed(next).await;
        }
    }

    // ---- Inbound ----

    async fn inbound_loop(self: Arc<Self>) {
        let Some(mut inbound) = self.transport.take_inbound() else {
            warn!("transport consumer already taken");
            return;
        };
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                rpc = inbound.recv() => {
                    let Some(rpc) = rpc else { break };
                    self.handle_rpc(rpc).await;
                }
            }
        }
        self.drain_waiters(&mut inbound).await;
    }

    /// Answers whatever is still queued after shutdown so remote peers fail
    /// fast instead of timing out.
    async fn drain_waiters(&self, inbound: &mut mpsc::Receiver<InboundRpc>) {
        while let Ok(rpc) = inbound.try_recv() {
            let _ = rpc
                .respond
                .send(Response::Error(HashgraphError::Shutdown.to_string()));
        }
    }

    async fn handle_rpc(&self, rpc: InboundRpc) {
        match rpc.request {
            Request::Sync(request) => {
                let response = self.handle_sync(request).await;
                let _ = rpc.respond.send(response);
            }
            Request::EagerSync(request) => {
                let response = self.handle_eager_sync(request).await;
                let _ = rpc.respond.send(response);
            }
            Request::FastForward(request) => {
                let response = self.handle_fast_forward(request).await;
                let _ = rpc.respond.send(response);
            }
            Request::Join(request) => self.handle_join(request, rpc.respond).await,
            Request::Leave(request) => self.handle_leave(request, rpc.respond).await,
        }
    }

    async fn handle_sync(&self, request: SyncRequest) -> Response {
        let core = self.core.lock().await;
        match core.events_for_sync(&request.known) {
            Ok(mut events) => {
                events.truncate(request.sync_limit as usize);
                Response::Sync(SyncResponse {
                    from_id: core.id(),
                    events,
                    known: core.known_events(),
                })
            }
            Err(e) => Response::Error(e.to_string()),
        }
    }

    async fn handle_eager_sync(&self, request: EagerSyncRequest) -> Response {
        let mut core = self.core.lock().await;
        let from_id = core.id();
        let outcome = async {
            core.insert_events(request.events)?;
            core.run_consensus()?;
            self.commit_pending(&mut core).await
        }
        .await;
        match outcome {
            Ok(()) => Response::EagerSync(EagerSyncResponse {
                from_id,
                success: true,
            }),
            Err(e) => {
                debug!("eager sync failed: {}", e);
                if matches!(e, HashgraphError::Storage(_)) {
                    drop(core);
                    self.set_state(NodeState::Shutdown).await;
                }
                Response::EagerSync(EagerSyncResponse {
                    from_id,
                    success: false,
                })
            }
        }
    }

    async fn handle_fast_forward(&self, request: FastForwardRequest) -> Response {
        let core = self.core.lock().await;
        match core.fast_forward_response() {
            Ok((block, frame)) => {
                let snapshot = self
                    .app_proxy
                    .get_snapshot(block.index())
                    .await
                    .unwrap_or_default();
                debug!("serving fast-forward to {}", request.from_id);
                Response::FastForward(FastForwardResponse {
                    from_id: core.id(),
                    block,
                    frame,
                    snapshot,
                })
            }
            Err(e) => Response::Error(e.to_string()),
        }
    }

    /// The round at which `peer` most recently (re)entered the registered set.
    fn membership_round(&self, peer: PeerId) -> Option<RoundIndex> {
        let mut last_join = None;
        let mut was_member = false;
        for (round, set) in self.store.all_peer_sets() {
            let is_member = set.contains(peer);
            if is_member && !was_member {
                last_join = Some(round);
            }
            was_member = is_member;
        }
        last_join
    }

    /// Join responses wait for the commit that accepts the member; the
    /// response channel is parked with the waiters until then. A member that
    /// is already registered, even for a future round, is answered right away.
    async fn handle_join(&self, request: JoinRequest, respond: oneshot::Sender<Response>) {
        let transaction = request.transaction;
        if transaction.verify_signature().is_err()
            || transaction.body.op != PeerOp::Join
        {
            let _ = respond.send(Response::Error("invalid join request".to_string()));
            return;
        }
        let peer_id = transaction.body.peer.id();

        let mut core = self.core.lock().await;
        let registered = match core.latest_peers() {
            Ok(peers) => peers,
            Err(e) => {
                let _ = respond.send(Response::Error(e.to_string()));
                return;
            }
        };
        if registered.contains(peer_id) {
            let _ = respond.send(Response::Join(JoinResponse {
                from_id: core.id(),
                accepted: true,
                accepted_round: self.membership_round(peer_id),
                peers: registered.peers().to_vec(),
            }));
            return;
        }
        if let Err(e) = core.add_internal_transaction(transaction) {
            let _ = respond.send(Response::Error(e.to_string()));
            return;
        }
        drop(core);
        self.join_waiters
            .lock()
            .await
            .entry(peer_id)
            .or_default()
            .push(respond);
    }

    async fn handle_leave(&self, request: LeaveRequest, respond: oneshot::Sender<Response>) {
        let transaction = request.transaction;
        if transaction.verify_signature().is_err()
            || transaction.body.op != PeerOp::Leave
        {
            let _ = respond.send(Response::Error("invalid leave request".to_string()));
            return;
        }
        let peer_id = transaction.body.peer.id();

        let mut core = self.core.lock().await;
        let from_id = core.id();
        let registered = core
            .latest_peers()
            .map(|p| p.contains(peer_id))
            .unwrap_or(false);
        if !registered {
            let _ = respond.send(Response::Leave(LeaveResponse {
                from_id,
                accepted: true,
            }));
            return;
        }
        if let Err(e) = core.add_internal_transaction(transaction) {
            let _ = respond.send(Response::Error(e.to_string()));
            return;
        }
        drop(core);
        self.leave_waiters
            .lock()
            .await
            .entry(peer_id)
            .or_default()
            .push(respond);
    }

    // ---- Control ----

    async fn control_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.state.get() {
                NodeState::Shutdown => break,
                NodeState::Suspended => {}
                NodeState::Joining => self.try_join().await,
                NodeState::CatchingUp => self.try_fast_forward().await,
                NodeState::Gossiping | NodeState::Leaving => {
                    self.gossip_once().await;
                    self.check_liveness().await;
                }
            }

            // Heartbeat with multiplicative jitter so peers do not lock-step.
            let base = self.context.parameters.heartbeat_timeout;
            let jitter = rand::thread_rng().gen_range(0.875..1.125);
            let interval = base.mul_f64(jitter);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        self.state.transition(NodeState::Shutdown);
    }

    fn pick_peer(&self, peers: &PeerSet, respect_backoff: bool) -> Option<Peer> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let backoff = self.backoff.lock();
        let candidates: Vec<&Peer> = peers
            .peers()
            .iter()
            .filter(|p| p.id() != self.id)
            .filter(|p| {
                !respect_backoff
                    || backoff
                        .get(&p.id())
                        .map(|(_, until)| tick >= *until)
                        .unwrap_or(true)
            })
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|p| (*p).clone())
    }

    fn note_peer_failure(&self, peer: PeerId) {
        let tick = self.tick.load(Ordering::Relaxed);
        let mut backoff = self.backoff.lock();
        let entry = backoff.entry(peer).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = tick + (1u64 << entry.0.min(6));
    }

    fn note_peer_success(&self, peer: PeerId) {
        self.backoff.lock().remove(&peer);
    }

    async fn gossip_once(&self) {
        let parameters = self.context.parameters.clone();
        let peers = {
            let core = self.core.lock().await;
            match core.peers() {
                Ok(peers) => peers,
                Err(e) => {
                    warn!("no peer set available: {}", e);
                    return;
                }
            }
        };

        let Some(target) = self.pick_peer(&peers, true) else {
            // Babbling alone: a single validator still authors events so its
            // rounds and blocks keep advancing.
            let mut core = self.core.lock().await;
            if core.in_active_set() {
                let outcome = async {
                    core.sign_and_insert_self_event(None)?;
                    core.run_consensus()?;
                    self.commit_pending(&mut core).await
                }
                .await;
                if let Err(e) = outcome {
                    warn!("solo heartbeat failed: {}", e);
                }
            }
            return;
        };

        self.context.metrics.node_metrics.syncs_initiated.inc();
        let known = self.core.lock().await.known_events();
        let request = SyncRequest {
            from_id: self.id,
            known,
            sync_limit: parameters.sync_limit as u64,
        };

        let response = match self
            .transport
            .sync(&target.address, request, parameters.tcp_timeout)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.context.metrics.node_metrics.sync_failures.inc();
                self.note_peer_failure(target.id());
                debug!("sync with {:?} failed: {}", target, e);
                if matches!(e, HashgraphError::TooFarBehind) && parameters.fast_sync {
                    self.set_state(NodeState::CatchingUp).await;
                }
                return;
            }
        };
        self.note_peer_success(target.id());
        let pulled = response.events.len();
        self.context
            .metrics
            .node_metrics
            .events_per_sync
            .observe(pulled as f64);

        let push_back = {
            let mut core = self.core.lock().await;
            let outcome = async {
                core.sync(target.id(), response.events)?;
                let events = core.events_for_sync(&response.known)?;
                core.run_consensus()?;
                self.commit_pending(&mut core).await?;
                Ok::<_, HashgraphError>(events)
            }
            .await;
            match outcome {
                Ok(events) => events,
                Err(e) => {
                    warn!("processing sync response failed: {}", e);
                    if matches!(e, HashgraphError::Storage(_)) {
                        drop(core);
                        self.set_state(NodeState::Shutdown).await;
                    }
                    return;
                }
            }
        };

        if !push_back.is_empty() {
            let request = EagerSyncRequest {
                from_id: self.id,
                events: push_back,
            };
            if let Err(e) = self
                .transport
                .eager_sync(&target.address, request, parameters.tcp_timeout)
                .await
            {
                debug!("eager sync with {:?} failed: {}", target, e);
            }
        }

        // A full response means the responder had more than fits one sync:
        // this node is substantially behind.
        if pulled >= parameters.sync_limit && parameters.fast_sync {
            self.set_state(NodeState::CatchingUp).await;
        }
    }

    async fn check_liveness(&self) {
        let (excess, removed, last_consensus) = {
            let core = self.core.lock().await;
            (
                core.excess_undetermined(),
                core.removed_round(),
                self.store.last_consensus_round(),
            )
        };
        if excess {
            warn!("undetermined events exceeded the suspend limit");
            self.set_state(NodeState::Suspended).await;
            return;
        }
        if self.state.get() == NodeState::Leaving {
            if let (Some(removed), Some(last)) = (removed, last_consensus) {
                if last >= removed {
                    info!("own removal reached round {}, shutting down", removed);
                    self.set_state(NodeState::Shutdown).await;
                }
            }
        }
    }

    async fn try_join(&self) {
        {
            let core = self.core.lock().await;
            if core.in_active_set() {
                drop(core);
                self.set_state(NodeState::Gossiping).await;
                return;
            }
        }
        match self.join().await {
            Ok(_) => {
                let next = if self.context.parameters.fast_sync {
                    NodeState::CatchingUp
                } else {
                    NodeState::Gossiping
                };
                self.set_state(next).await;
            }
            Err(e) => debug!("join attempt failed: {}", e),
        }
    }

    async fn try_fast_forward(&self) {
        let peers = {
            let core = self.core.lock().await;
            match core.peers() {
                Ok(peers) => peers,
                Err(_) => return,
            }
        };
        let Some(target) = self.pick_peer(&peers, true) else {
            self.set_state(NodeState::Gossiping).await;
            return;
        };

        let outcome = async {
            let response = self
                .transport
                .fast_forward(
                    &target.address,
                    FastForwardRequest { from_id: self.id },
                    self.context.parameters.tcp_timeout,
                )
                .await?;
            let mut core = self.core.lock().await;
            core.fast_forward(response.block, response.frame)?;
            drop(core);
            if !response.snapshot.is_empty() {
                self.app_proxy.restore(&response.snapshot).await?;
            }
            Ok::<_, HashgraphError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                self.catch_up_failures.store(0, Ordering::Relaxed);
                info!("fast-forward complete");
                self.set_state(NodeState::Gossiping).await;
            }
            Err(e) => {
                debug!("fast-forward from {:?} failed: {}", target, e);
                let failures = self.catch_up_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= CATCH_UP_FAILURE_LIMIT {
                    self.set_state(NodeState::Suspended).await;
                }
            }
        }
    }

    /// Drains decided rounds: commits each block to the application in block
    /// order, then seals it with its outcome before the next round is ordered.
    /// Runs under the core lock: block N returns before block N+1 is offered,
    /// and no gossip interleaves with a commit.
    async fn commit_pending(&self, core: &mut Core) -> HashgraphResult<()> {
        while let Some(mut block) = core.next_decided_block()? {
            let started = Instant::now();
            let response = self.app_proxy.commit_block(block.clone()).await?;
            self.context
                .metrics
                .node_metrics
                .commit_latency
                .observe(started.elapsed().as_secs_f64());
            block.set_commit_outcome(response.state_hash, response.receipts);
            let changes = core.seal_committed_block(block)?;

            for change in changes {
                let peers = core.latest_peers()?.peers().to_vec();
                match change.op {
                    PeerOp::Join => {
                        if let Some(waiters) =
                            self.join_waiters.lock().await.remove(&change.peer.id())
                        {
                            for waiter in waiters {
                                let _ = waiter.send(Response::Join(JoinResponse {
                                    from_id: self.id,
                                    accepted: true,
                                    accepted_round: Some(change.effective_round),
                                    peers: peers.clone(),
                                }));
                            }
                        }
                    }
                    PeerOp::Leave => {
                        if let Some(waiters) =
                            self.leave_waiters.lock().await.remove(&change.peer.id())
                        {
                            for waiter in waiters {
                                let _ = waiter.send(Response::Leave(LeaveResponse {
                                    from_id: self.id,
                                    accepted: true,
                                }));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
