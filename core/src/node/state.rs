// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use tokio::sync::watch;
use tracing::info;

/// Controller states. Suspended only exits to Shutdown; Shutdown is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Normal operation: gossip, heartbeats, commits.
    Gossiping,
    /// Too far behind; catching up from a peer's frame.
    CatchingUp,
    /// Not in the peer set yet; requesting membership.
    Joining,
    /// Removal requested; gossiping until it takes effect.
    Leaving,
    /// Error floor exceeded; only an operator restart helps.
    Suspended,
    Shutdown,
}

impl NodeState {
    fn may_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match self {
            Gossiping => matches!(next, CatchingUp | Suspended | Leaving | Shutdown),
            CatchingUp => matches!(next, Gossiping | Suspended | Shutdown),
            Joining => matches!(next, Gossiping | CatchingUp | Suspended | Shutdown),
            Leaving => matches!(next, Shutdown | Suspended),
            Suspended => matches!(next, Shutdown),
            Shutdown => false,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Gossiping => "Gossiping",
            NodeState::CatchingUp => "CatchingUp",
            NodeState::Joining => "Joining",
            NodeState::Leaving => "Leaving",
            NodeState::Suspended => "Suspended",
            NodeState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Shared handle on the controller state, observable through a watch channel.
pub(crate) struct StateHandle {
    sender: watch::Sender<NodeState>,
}

impl StateHandle {
    pub fn new(initial: NodeState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn get(&self) -> NodeState {
        *self.sender.borrow()
    }

    /// Applies a transition if the table allows it. Returns whether it took.
    pub fn transition(&self, next: NodeState) -> bool {
        let current = self.get();
        if current == next {
            return true;
        }
        if !current.may_transition_to(next) {
            return false;
        }
        info!("state {} -> {}", current, next);
        self.sender.send_replace(next);
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.sender.subscribe()
    }
}
