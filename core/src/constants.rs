// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::types::RoundIndex;

/// Fame elections fall back to a pseudo-random bit every `COIN_ROUND_FREQUENCY`
/// voting rounds so an election cannot stall forever. Protocol constant: every
/// validator must use the same value.
pub(crate) const COIN_ROUND_FREQUENCY: RoundIndex = 10;

/// Number of rounds between the decision accepting a membership change and the
/// round at which it takes effect. Protocol constant: every validator must
/// derive the identical effective round for the identical decision.
pub(crate) const MEMBERSHIP_DELAY: RoundIndex = 6;
