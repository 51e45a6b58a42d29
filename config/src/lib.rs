// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

mod crypto;
mod parameters;
mod peer;
mod test_peers;

pub use crypto::*;
pub use parameters::*;
pub use peer::*;
pub use test_peers::*;
