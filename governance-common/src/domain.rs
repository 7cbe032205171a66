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

pub use alloy_primitives::{Address, B256, Bytes, U256, keccak256};

use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub type BlockHash = B256;
pub type TransactionHash = B256;
pub type Topic = B256;

/// Block height; voting windows are expressed in blocks.
pub type BlockNumber = u64;

/// Unix seconds as reported in block headers; timelock etas and grace periods use these.
pub type Timestamp = u64;

/// EVM chain identifier, e.g. 1 for Ethereum mainnet.
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Into,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "u64", into = "u64")]
pub struct ChainId(u64);

impl ChainId {
    pub fn new(id: u64) -> Result<Self, InvalidChainIdError> {
        if id == 0 {
            Err(InvalidChainIdError::Zero)
        } else {
            Ok(Self(id))
        }
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for ChainId {
    type Error = InvalidChainIdError;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl FromStr for ChainId {
    type Err = InvalidChainIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .parse::<u64>()
            .map_err(|_| InvalidChainIdError::NotANumber(s.to_owned()))?;
        Self::new(id)
    }
}

#[derive(Debug, Error)]
pub enum InvalidChainIdError {
    #[error("chain ID must not be zero")]
    Zero,

    #[error("chain ID {0} is not a number")]
    NotANumber(String),
}
