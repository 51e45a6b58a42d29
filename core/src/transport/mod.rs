// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod memory;
pub mod messages;
pub mod tcp;

pub use memory::{MemNetwork, MemTransport};
pub use tcp::TcpTransport;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{HashgraphError, HashgraphResult};
use messages::{
    EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse, JoinRequest,
    JoinResponse, LeaveRequest, LeaveResponse, Request, Response, SyncRequest, SyncResponse,
};

/// One inbound RPC handed from the transport to the controller. Dropping
/// `respond` without sending tells the transport the handler gave up.
pub struct InboundRpc {
    pub request: Request,
    pub respond: oneshot::Sender<Response>,
}

/// Pairwise RPC between validators. Implementations enforce frame size limits
/// and per-call deadlines; request/response pairing is per connection, in
/// order.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_address(&self) -> String;

    /// The stream of inbound requests. Yields `Some` exactly once; the
    /// controller owns the receiver from then on.
    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundRpc>>;

    /// One request/response round trip, bounded by `deadline` end to end.
    async fn request(
        &self,
        target: &str,
        request: Request,
        deadline: Duration,
    ) -> HashgraphResult<Response>;

    async fn sync(
        &self,
        target: &str,
        request: SyncRequest,
        deadline: Duration,
    ) -> HashgraphResult<SyncResponse> {
        match self.request(target, Request::Sync(request), deadline).await? {
            Response::Sync(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn eager_sync(
        &self,
        target: &str,
        request: EagerSyncRequest,
        deadline: Duration,
    ) -> HashgraphResult<EagerSyncResponse> {
        match self
            .request(target, Request::EagerSync(request), deadline)
            .await?
        {
            Response::EagerSync(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn fast_forward(
        &self,
        target: &str,
        request: FastForwardRequest,
        deadline: Duration,
    ) -> HashgraphResult<FastForwardResponse> {
        match self
            .request(target, Request::FastForward(request), deadline)
            .await?
        {
            Response::FastForward(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn join(
        &self,
        target: &str,
        request: JoinRequest,
        deadline: Duration,
    ) -> HashgraphResult<JoinResponse> {
        match self.request(target, Request::Join(request), deadline).await? {
            Response::Join(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn leave(
        &self,
        target: &str,
        request: LeaveRequest,
        deadline: Duration,
    ) -> HashgraphResult<LeaveResponse> {
        match self.request(target, Request::Leave(request), deadline).await? {
            Response::Leave(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }
}

/// Maps a peer-reported error back into the local error taxonomy so callers
/// can tell "you are too far behind" apart from plain rejections.
fn unexpected(response: Response) -> HashgraphError {
    match response {
        Response::Error(message) if message.contains("too far behind") => {
            HashgraphError::TooFarBehind
        }
        Response::Error(message) => HashgraphError::Rejected(message),
        _ => HashgraphError::Network("unexpected response variant".to_string()),
    }
}
