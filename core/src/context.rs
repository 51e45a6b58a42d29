// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use hashgraph_config::Parameters;
use prometheus::Registry;

use crate::metrics::{initialise_metrics, Metrics};

/// Configuration and metrics shared by all components of one node. Each node
/// carries its own `Context`: multiple nodes coexist in one process.
#[derive(Clone)]
pub struct Context {
    pub parameters: Parameters,
    pub(crate) metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(parameters: Parameters, registry: Registry) -> Self {
        Self {
            parameters,
            metrics: initialise_metrics(registry),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self {
            parameters: Parameters::default(),
            metrics: crate::metrics::test_metrics(),
        }
    }
}
