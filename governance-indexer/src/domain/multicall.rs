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

use crate::domain::{CallOutcome, ChainRegistry, MulticallCall, Node, UnknownChainError, abi};
use alloy_sol_types::{SolCall, SolValue};
use futures::future::try_join_all;
use governance_common::{
    domain::{Address, BlockNumber, Bytes, ChainId},
    error::BoxError,
};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// A contract read on some chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub chain_id: ChainId,
    pub target: Address,
    pub data: Bytes,
}

/// Groups independent contract reads into one multicall round trip per chain.
#[derive(Debug, Clone, Copy)]
pub struct MulticallBatcher<'a, N> {
    node: &'a N,
    registry: &'a ChainRegistry,
}

impl<'a, N> MulticallBatcher<'a, N>
where
    N: Node,
{
    pub fn new(node: &'a N, registry: &'a ChainRegistry) -> Self {
        Self { node, registry }
    }

    /// Execute the given calls, for each chain at the given block or at the latest one if
    /// absent. Returns one outcome per call in the same order; fails without any round trip if
    /// any chain has no registered multicall contract.
    pub async fn execute(
        &self,
        calls: &[Call],
        blocks: &HashMap<ChainId, BlockNumber>,
    ) -> Result<Vec<CallOutcome>, MulticallError> {
        let mut batches = BTreeMap::<ChainId, (Vec<usize>, Vec<MulticallCall>)>::new();
        for (index, call) in calls.iter().enumerate() {
            let (indexes, calls) = batches.entry(call.chain_id).or_default();
            indexes.push(index);
            calls.push(MulticallCall {
                target: call.target,
                data: call.data.clone(),
            });
        }

        let batches = batches
            .into_iter()
            .map(|(chain_id, batch)| {
                let multicall = self.registry.multicall(chain_id)?;
                Ok((chain_id, multicall, batch))
            })
            .collect::<Result<Vec<_>, UnknownChainError>>()?;

        let results = try_join_all(batches.into_iter().map(
            |(chain_id, multicall, (indexes, calls))| async move {
                let block = blocks.get(&chain_id).copied();
                let outcomes = self
                    .node
                    .multicall(chain_id, multicall, &calls, block)
                    .await
                    .map_err(|error| MulticallError::Node(chain_id, error.into()))?;

                if outcomes.len() != calls.len() {
                    return Err(MulticallError::LengthMismatch {
                        chain_id,
                        expected: calls.len(),
                        actual: outcomes.len(),
                    });
                }

                Ok::<_, MulticallError>(indexes.into_iter().zip(outcomes))
            },
        ))
        .await?;

        let mut outcomes = vec![None; calls.len()];
        for (index, outcome) in results.into_iter().flatten() {
            outcomes[index] = Some(outcome);
        }

        Ok(outcomes.into_iter().flatten().collect())
    }
}

#[derive(Debug, Error)]
pub enum MulticallError {
    #[error(transparent)]
    UnknownChain(#[from] UnknownChainError),

    #[error("cannot execute multicall on chain {0}")]
    Node(ChainId, #[source] BoxError),

    #[error("multicall on chain {chain_id} returned {actual} outcomes for {expected} calls")]
    LengthMismatch {
        chain_id: ChainId,
        expected: usize,
        actual: usize,
    },
}

/// Call data for `tryAggregate(false, calls)`, i.e. reverts of individual calls do not revert
/// the whole batch.
pub fn encode_try_aggregate(calls: &[MulticallCall]) -> Bytes {
    let calls = calls
        .iter()
        .map(|call| abi::AggregateCall {
            target: call.target,
            callData: call.data.clone(),
        })
        .collect();

    abi::tryAggregateCall {
        requireSuccess: false,
        calls,
    }
    .abi_encode()
    .into()
}

/// Decode the `(bool,bytes)[]` return data of `tryAggregate`.
pub fn decode_try_aggregate(data: &[u8]) -> Result<Vec<CallOutcome>, alloy_sol_types::Error> {
    let results = Vec::<abi::AggregateResult>::abi_decode(data)?;

    let outcomes = results
        .into_iter()
        .map(|result| {
            if result.success {
                CallOutcome::Success(result.returnData)
            } else {
                CallOutcome::Reverted(result.returnData)
            }
        })
        .collect();

    Ok(outcomes)
}
