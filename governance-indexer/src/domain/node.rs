// This file is part of governance-indexer.
// Copyright (C) 2025 Midnight Foundation
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::RawLog;
use governance_common::domain::{Address, BlockNumber, Bytes, ChainId, Timestamp, Topic};
use std::error::Error as StdError;

/// Node abstraction, i.e. JSON-RPC access to the registered chains.
#[trait_variant::make(Send)]
pub trait Node
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    /// The number of the latest block of the given chain.
    async fn block_number(&self, chain_id: ChainId) -> Result<BlockNumber, Self::Error>;

    /// The timestamp of the given block of the given chain in Unix seconds.
    async fn block_timestamp(
        &self,
        chain_id: ChainId,
        block: BlockNumber,
    ) -> Result<Timestamp, Self::Error>;

    /// All logs of the given chain matching the given filter, in `(block_number, log_index)`
    /// order, without removed (reorged) logs.
    async fn get_logs(
        &self,
        chain_id: ChainId,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, Self::Error>;

    /// Execute the given calls in a single round trip via the given multicall contract, at the
    /// given block or at the latest one. Returns one outcome per call in the same order;
    /// individual reverts do not fail the whole batch.
    async fn multicall(
        &self,
        chain_id: ChainId,
        multicall: Address,
        calls: &[MulticallCall],
        block: Option<BlockNumber>,
    ) -> Result<Vec<CallOutcome>, Self::Error>;
}

/// Filter for logs within an inclusive block range, emitted by any of the given addresses, with
/// any of the given topics as first topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    pub addresses: Vec<Address>,
    pub topics: Vec<Topic>,
}

/// A single call within a multicall batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticallCall {
    pub target: Address,
    pub data: Bytes,
}

/// Outcome of a single call within a multicall batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(Bytes),
    Reverted(Bytes),
}

impl CallOutcome {
    pub fn success(&self) -> Option<&Bytes> {
        match self {
            CallOutcome::Success(data) => Some(data),
            CallOutcome::Reverted(_) => None,
        }
    }
}
