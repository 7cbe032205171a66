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

use derive_more::Display;
use governance_common::domain::{
    Address, B256, BlockNumber, Bytes, Timestamp, TransactionHash, U256,
};
use serde::Serialize;
use thiserror::Error;

/// Opaque proposal identifier, i.e. the raw `uint256` proposal ID.
pub type ProposalId = U256;

/// Content hash over all mutable state, used as change-detection token only.
pub type StateHash = B256;

/// A governance proposal, merged from its event history and read-derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRecord {
    pub id: ProposalId,
    pub proposer: Address,
    pub targets: Vec<Address>,
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Bytes>,
    pub description: String,
    pub description_hash: B256,
    pub block_number: BlockNumber,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    pub transaction_hash: TransactionHash,
    pub status: ProposalStatus,
    pub for_votes: U256,
    pub against_votes: U256,
    pub abstain_votes: U256,
    pub queued_at: Option<BlockNumber>,
    pub eta: Option<Timestamp>,
    pub executed_at: Option<BlockNumber>,
    pub canceled_at: Option<BlockNumber>,
    pub reads: ReadFields,
}

/// Point-in-time contract reads for a proposal, refreshed by the multicall batcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFields {
    pub quorum: Option<U256>,

    /// Unix time from which a queued proposal can no longer be executed, i.e. its eta plus
    /// the grace period of the timelock.
    pub execution_deadline: Option<Timestamp>,

    /// Block at which the reads were taken; zero if never read. Not serialized and hence not
    /// part of the state hash.
    #[serde(skip)]
    pub as_of_block: BlockNumber,
}

/// Lifecycle status of a proposal. The numeric codes match the `ProposalState` enum of the
/// OpenZeppelin Governor.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ProposalStatus {
    Pending,
    Active,
    Canceled,
    Defeated,
    Succeeded,
    Queued,
    Expired,
    Executed,
}

impl ProposalStatus {
    /// Terminal statuses never change once reached.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Defeated | Self::Expired | Self::Executed
        )
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// How a vote was cast; the numeric values are those of the `VoteCast` event.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Support {
    Against = 0,
    For = 1,
    Abstain = 2,
    Comment = 3,
}

impl Support {
    /// Whether votes with this support count toward the tallies.
    pub fn is_counted(self) -> bool {
        self != Self::Comment
    }
}

impl TryFrom<u8> for Support {
    type Error = InvalidSupportError;

    fn try_from(support: u8) -> Result<Self, Self::Error> {
        match support {
            0 => Ok(Self::Against),
            1 => Ok(Self::For),
            2 => Ok(Self::Abstain),
            3 => Ok(Self::Comment),
            other => Err(InvalidSupportError(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid support {0}")]
pub struct InvalidSupportError(pub u8);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub proposal_id: ProposalId,
    pub voter: Address,
    pub support: Support,
    pub weight: U256,
    pub reason: String,
    pub block_number: BlockNumber,
    pub transaction_hash: TransactionHash,
    pub log_index: u64,
}

impl VoteRecord {
    pub fn key(&self) -> VoteKey {
        VoteKey {
            proposal_id: self.proposal_id,
            voter: self.voter,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

/// Deduplication key of a [VoteRecord].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoteKey {
    pub proposal_id: ProposalId,
    pub voter: Address,
    pub transaction_hash: TransactionHash,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    pub proposal_id: ProposalId,
    pub author: Address,
    pub body: String,
    pub block_number: BlockNumber,
    pub transaction_hash: TransactionHash,
    pub log_index: u64,
}

impl CommentRecord {
    pub fn key(&self) -> CommentKey {
        CommentKey {
            proposal_id: self.proposal_id,
            author: self.author,
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

/// Deduplication key of a [CommentRecord].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommentKey {
    pub proposal_id: ProposalId,
    pub author: Address,
    pub transaction_hash: TransactionHash,
    pub log_index: u64,
}

/// Latest voting weight of a delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingPower {
    pub votes: U256,
    pub block_number: BlockNumber,
    pub log_index: u64,
}

/// On-chain roles and voting weight of the operator, i.e. the account the consumers act as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperatorRoles {
    pub proposer: bool,
    pub executor: bool,
    pub canceller: bool,
    pub votes: U256,
    pub proposal_threshold: Option<U256>,
}

impl OperatorRoles {
    pub fn meets_proposal_threshold(&self) -> bool {
        self.proposal_threshold
            .is_some_and(|threshold| self.votes >= threshold)
    }
}

/// What the operator may do with a proposal in its current status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_queue: bool,
    pub can_execute: bool,
    pub can_cancel: bool,
    pub can_propose: bool,
    pub can_reopen: bool,
}
