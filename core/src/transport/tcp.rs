// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info};

use crate::{
    error::{HashgraphError, HashgraphResult},
    transport::{
        messages::{Request, Response},
        InboundRpc, Transport,
    },
};

/// Hard cap on a single RPC frame. Oversized frames terminate the connection.
const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const INBOUND_CHANNEL_SIZE: usize = 128;

/// How long a connection waits for the controller to answer one request.
/// Join decisions block on consensus, so this exceeds the plain RPC deadline.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Length-prefixed bcs frames over TCP. One in-flight request per connection;
/// responses pair with requests by order.
pub struct TcpTransport {
    local: String,
    inbound: Mutex<Option<mpsc::Receiver<InboundRpc>>>,
    listener_handle: JoinHandle<()>,
}

impl TcpTransport {
    pub async fn bind(address: &str) -> HashgraphResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| HashgraphError::Network(e.to_string()))?;
        let local = listener
            .local_addr()
            .map_err(|e| HashgraphError::Network(e.to_string()))?
            .to_string();
        let (sender, receiver) = mpsc::channel(INBOUND_CHANNEL_SIZE);

        let listener_handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, remote)) => {
                        debug!("inbound connection from {}", remote);
                        tokio::spawn(serve_connection(socket, sender.clone()));
                    }
                    Err(e) => {
                        info!("listener stopped accepting: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local,
            inbound: Mutex::new(Some(receiver)),
            listener_handle,
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.listener_handle.abort();
    }
}

/// Serves one remote peer. Requests on a connection are handled strictly one
/// at a time; a malformed frame terminates the connection.
async fn serve_connection(socket: TcpStream, sender: mpsc::Sender<InboundRpc>) {
    let mut framed = Framed::new(socket, codec());
    while let Some(frame) = framed.next().await {
        let Ok(bytes) = frame else {
            debug!("dropping connection on framing error");
            return;
        };
        let Ok(request) = bcs::from_bytes::<Request>(&bytes) else {
            debug!("dropping connection on malformed request");
            return;
        };

        let (respond, response_receiver) = oneshot::channel();
        if sender.send(InboundRpc { request, respond }).await.is_err() {
            return;
        }
        let response = match timeout(HANDLER_TIMEOUT, response_receiver).await {
            Ok(Ok(response)) => response,
            _ => Response::Error("request handler unavailable".to_string()),
        };

        let Ok(encoded) = bcs::to_bytes(&response) else {
            return;
        };
        if framed.send(Bytes::from(encoded)).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_address(&self) -> String {
        self.local.clone()
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundRpc>> {
        self.inbound.lock().take()
    }

    async fn request(
        &self,
        target: &str,
        request: Request,
        deadline: Duration,
    ) -> HashgraphResult<Response> {
        let round_trip = async {
            let socket = TcpStream::connect(target)
                .await
                .map_err(|e| HashgraphError::Network(e.to_string()))?;
            let mut framed = Framed::new(socket, codec());

            let encoded = bcs::to_bytes(&request)?;
            framed
                .send(Bytes::from(encoded))
                .await
                .map_err(|e| HashgraphError::Network(e.to_string()))?;

            match framed.next().await {
                Some(Ok(bytes)) => Ok(bcs::from_bytes::<Response>(&bytes)?),
                Some(Err(e)) => Err(HashgraphError::Network(e.to_string())),
                None => Err(HashgraphError::Network("connection closed".to_string())),
            }
        };
        match timeout(deadline, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(HashgraphError::Timeout),
        }
    }
}
