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

use governance_common::domain::{Address, ChainId};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// The role a contract plays within a governance contract suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractRole {
    Multicall,
    Governance,
    Token,
    Timelock,
    Treasury,
    Comments,
}

/// Addresses of the contracts of a governance contract suite on one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChainContracts {
    pub multicall: Option<Address>,
    pub governance: Option<Address>,
    pub token: Option<Address>,
    pub timelock: Option<Address>,
    pub treasury: Option<Address>,

    /// Contract emitting comment events, if not the governance contract itself.
    pub comments: Option<Address>,
}

impl ChainContracts {
    pub fn get(&self, role: ContractRole) -> Option<Address> {
        match role {
            ContractRole::Multicall => self.multicall,
            ContractRole::Governance => self.governance,
            ContractRole::Token => self.token,
            ContractRole::Timelock => self.timelock,
            ContractRole::Treasury => self.treasury,
            ContractRole::Comments => self.comments,
        }
    }

    /// Addresses of all contracts emitting logs of interest, deduplicated, in role order.
    pub fn log_sources(&self) -> Vec<Address> {
        let mut addresses = Vec::with_capacity(3);
        for address in [self.governance, self.token, self.comments]
            .into_iter()
            .flatten()
        {
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        addresses
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let roles = [
            ContractRole::Multicall,
            ContractRole::Governance,
            ContractRole::Token,
            ContractRole::Timelock,
            ContractRole::Treasury,
            ContractRole::Comments,
        ];

        for role in roles {
            if self.get(role).is_some_and(|address| address.is_zero()) {
                return Err(RegistryError::ZeroAddress(role));
            }
        }

        Ok(())
    }
}

/// Mapping from chain to the addresses of its governance contract suite. Passed explicitly to
/// every component that needs contract addresses.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<ChainId, ChainContracts>,
}

impl ChainRegistry {
    /// Register the contracts of the given chain; re-registering overwrites.
    pub fn register_chain(
        &mut self,
        chain_id: ChainId,
        contracts: ChainContracts,
    ) -> Result<(), RegistryError> {
        contracts.validate()?;
        self.chains.insert(chain_id, contracts);
        Ok(())
    }

    /// Register the multicall contract of the given chain, also for a yet unknown chain.
    pub fn register_multicall(
        &mut self,
        chain_id: ChainId,
        address: Address,
    ) -> Result<(), RegistryError> {
        if address.is_zero() {
            return Err(RegistryError::ZeroAddress(ContractRole::Multicall));
        }

        self.chains.entry(chain_id).or_default().multicall = Some(address);
        Ok(())
    }

    pub fn contracts(&self, chain_id: ChainId) -> Result<&ChainContracts, UnknownChainError> {
        self.chains.get(&chain_id).ok_or(UnknownChainError(chain_id))
    }

    pub fn multicall(&self, chain_id: ChainId) -> Result<Address, UnknownChainError> {
        self.contracts(chain_id)?
            .multicall
            .ok_or(UnknownChainError(chain_id))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.chains.keys().copied()
    }
}

/// A chain, or the multicall contract for a chain, has not been registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown chain {0}")]
pub struct UnknownChainError(pub ChainId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{0:?} contract address must not be zero")]
    ZeroAddress(ContractRole),
}
