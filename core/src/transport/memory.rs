// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};

use crate::{
    error::{HashgraphError, HashgraphResult},
    transport::{
        messages::{Request, Response},
        InboundRpc, Transport,
    },
};

const INBOUND_CHANNEL_SIZE: usize = 128;

/// An in-process wire for the test suites: transports register under their
/// address and requests are routed through channels. The registry is an
/// instance, not a global, so independent networks coexist in one process.
#[derive(Clone, Default)]
pub struct MemNetwork {
    registry: Arc<RwLock<HashMap<String, mpsc::Sender<InboundRpc>>>>,
}

impl MemNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport listening on `address`.
    pub fn transport(&self, address: &str) -> MemTransport {
        let (sender, receiver) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        self.registry
            .write()
            .insert(address.to_string(), sender);
        MemTransport {
            address: address.to_string(),
            network: self.clone(),
            inbound: Mutex::new(Some(receiver)),
        }
    }

    /// Unregisters an address, simulating a peer going dark.
    pub fn disconnect(&self, address: &str) {
        self.registry.write().remove(address);
    }
}

pub struct MemTransport {
    address: String,
    network: MemNetwork,
    inbound: Mutex<Option<mpsc::Receiver<InboundRpc>>>,
}

#[async_trait]
impl Transport for MemTransport {
    fn local_address(&self) -> String {
        self.address.clone()
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
        let Some(sender) = self.network.registry.read().get(target).cloned() else {
            return Err(HashgraphError::Network(format!(
                "connection refused: {target}"
            )));
        };

        let round_trip = async {
            let (respond, response_receiver) = oneshot::channel();
            sender
                .send(InboundRpc { request, respond })
                .await
                .map_err(|_| HashgraphError::Network("peer stopped listening".to_string()))?;
            response_receiver
                .await
                .map_err(|_| HashgraphError::Network("peer dropped the request".to_string()))
        };
        match timeout(deadline, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(HashgraphError::Timeout),
        }
    }
}
