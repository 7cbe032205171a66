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


use crate::domain::{InvalidSupportError, ProposalId, Support, abi};
use alloy_sol_types::SolEvent;
use governance_common::domain::{
    Address, B256, BlockNumber, Bytes, Timestamp, Topic, TransactionHash, U256, keccak256,
};
use std::collections::HashMap;
use thiserror::Error;

/// Default signature of the comment event; all parameters are non-indexed.
pub const DEFAULT_COMMENT: &str = abi::ProposalComment::SIGNATURE;

/// A raw log entry as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<Topic>,
    pub data: Bytes,
    pub block_number: BlockNumber,
    pub transaction_hash: TransactionHash,
    pub log_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ProposalCreated,
    VoteCast,
    ProposalQueued,
    ProposalExecuted,
    ProposalCanceled,
    Comment,
    DelegateVotesChanged,
}

/// The set of recognized events, keyed by their topic.
#[derive(Debug, Clone)]
pub struct EventAbi {
    kinds: HashMap<Topic, EventKind>,
}

impl EventAbi {
    /// Create the set of recognized events with the given signature for the comment event.
    pub fn new(comment_signature: &str) -> Self {
        let kinds = [
            (
                abi::ProposalCreated::SIGNATURE_HASH,
                EventKind::ProposalCreated,
            ),
            (abi::VoteCast::SIGNATURE_HASH, EventKind::VoteCast),
            (abi::ProposalQueued::SIGNATURE_HASH, EventKind::ProposalQueued),
            (
                abi::ProposalExecuted::SIGNATURE_HASH,
                EventKind::ProposalExecuted,
            ),
            (
                abi::ProposalCanceled::SIGNATURE_HASH,
                EventKind::ProposalCanceled,
            ),
            (keccak256(comment_signature), EventKind::Comment),
            (
                abi::DelegateVotesChanged::SIGNATURE_HASH,
                EventKind::DelegateVotesChanged,
            ),
        ]
        .into_iter()
        .collect();

        Self { kinds }
    }

    pub fn kind(&self, topic: &Topic) -> Option<EventKind> {
        self.kinds.get(topic).copied()
    }

    /// All recognized topics, sorted, e.g. to filter logs.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics = self.kinds.keys().copied().collect::<Vec<_>>();
        topics.sort_unstable();
        topics
    }
}

impl Default for EventAbi {
    fn default() -> Self {
        Self::new(DEFAULT_COMMENT)
    }
}

/// A decoded governance event along with the position of its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernanceEvent {
    pub block_number: BlockNumber,
    pub log_index: u64,
    pub transaction_hash: TransactionHash,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    ProposalCreated(ProposalCreated),

    VoteCast {
        proposal_id: ProposalId,
        voter: Address,
        support: Support,
        weight: U256,
        reason: String,
    },

    ProposalQueued {
        proposal_id: ProposalId,
        eta: Timestamp,
    },

    ProposalExecuted {
        proposal_id: ProposalId,
    },

    ProposalCanceled {
        proposal_id: ProposalId,
    },

    Comment {
        proposal_id: ProposalId,
        author: Address,
        body: String,
    },

    DelegateVotesChanged {
        delegate: Address,
        previous_votes: U256,
        new_votes: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalCreated {
    pub proposal_id: ProposalId,
    pub proposer: Address,
    pub targets: Vec<Address>,
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Bytes>,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    pub description: String,
    pub description_hash: B256,
}

/// Decode the given logs in order, skipping logs with unrecognized topics.
pub fn decode_logs<'a>(
    logs: &'a [RawLog],
    abi: &'a EventAbi,
) -> impl Iterator<Item = Result<GovernanceEvent, DecodeError>> + 'a {
    logs.iter().filter_map(|log| decode_log(log, abi).transpose())
}

/// Decode the given log; `None` if its topic is not recognized.
pub fn decode_log(log: &RawLog, abi: &EventAbi) -> Result<Option<GovernanceEvent>, DecodeError> {
    let Some(kind) = log.topics.first().and_then(|topic| abi.kind(topic)) else {
        return Ok(None);
    };

    let payload = decode_payload(kind, log).map_err(|reason| DecodeError {
        kind,
        block_number: log.block_number,
        log_index: log.log_index,
        transaction_hash: log.transaction_hash,
        reason,
    })?;

    Ok(Some(GovernanceEvent {
        block_number: log.block_number,
        log_index: log.log_index,
        transaction_hash: log.transaction_hash,
        payload,
    }))
}

fn decode_payload(kind: EventKind, log: &RawLog) -> Result<EventPayload, DecodeReason> {
    let topics = log.topics.iter().copied();

    let payload = match kind {
        EventKind::ProposalCreated => {
            let event = abi::ProposalCreated::decode_raw_log(topics, &log.data)?;
            let targets = event.targets.len();
            if event.values.len() != targets
                || event.signatures.len() != targets
                || event.calldatas.len() != targets
            {
                return Err(DecodeReason::MismatchedLengths);
            }

            let start_block = to_u64(event.voteStart, "voteStart")?;
            let end_block = to_u64(event.voteEnd, "voteEnd")?;
            if start_block > end_block {
                return Err(DecodeReason::InvalidVotingPeriod {
                    start_block,
                    end_block,
                });
            }

            EventPayload::ProposalCreated(ProposalCreated {
                proposal_id: event.proposalId,
                proposer: event.proposer,
                targets: event.targets,
                values: event.values,
                signatures: event.signatures,
                calldatas: event.calldatas,
                start_block,
                end_block,
                description_hash: keccak256(&event.description),
                description: event.description,
            })
        }

        EventKind::VoteCast => {
            let event = abi::VoteCast::decode_raw_log(topics, &log.data)?;
            EventPayload::VoteCast {
                proposal_id: event.proposalId,
                voter: event.voter,
                support: Support::try_from(event.support)?,
                weight: event.weight,
                reason: event.reason,
            }
        }

        EventKind::ProposalQueued => {
            let event = abi::ProposalQueued::decode_raw_log(topics, &log.data)?;
            EventPayload::ProposalQueued {
                proposal_id: event.proposalId,
                eta: to_u64(event.etaSeconds, "etaSeconds")?,
            }
        }

        EventKind::ProposalExecuted => {
            let event = abi::ProposalExecuted::decode_raw_log(topics, &log.data)?;
            EventPayload::ProposalExecuted {
                proposal_id: event.proposalId,
            }
        }

        EventKind::ProposalCanceled => {
            let event = abi::ProposalCanceled::decode_raw_log(topics, &log.data)?;
            EventPayload::ProposalCanceled {
                proposal_id: event.proposalId,
            }
        }

        // The topic of the comment event is configurable, hence only its data is checked.
        EventKind::Comment => {
            let (proposal_id, author, body) =
                abi::ProposalComment::abi_decode_data(&log.data)?;
            EventPayload::Comment {
                proposal_id,
                author,
                body,
            }
        }

        EventKind::DelegateVotesChanged => {
            let event = abi::DelegateVotesChanged::decode_raw_log(topics, &log.data)?;
            EventPayload::DelegateVotesChanged {
                delegate: event.delegate,
                previous_votes: event.previousVotes,
                new_votes: event.newVotes,
            }
        }
    };

    Ok(payload)
}

fn to_u64(value: U256, field: &'static str) -> Result<u64, DecodeReason> {
    u64::try_from(value).map_err(|_| DecodeReason::Overflow(field))
}

/// A log with a recognized topic could not be decoded.
#[derive(Debug, Error)]
#[error(
    "cannot decode {kind:?} log {log_index} in block {block_number}, transaction {transaction_hash}"
)]
pub struct DecodeError {
    pub kind: EventKind,
    pub block_number: BlockNumber,
    pub log_index: u64,
    pub transaction_hash: TransactionHash,
    #[source]
    pub reason: DecodeReason,
}

#[derive(Debug, Error)]
pub enum DecodeReason {
    #[error("malformed log")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("{0} does not fit into 64 bits")]
    Overflow(&'static str),

    #[error(transparent)]
    InvalidSupport(#[from] InvalidSupportError),

    #[error("start block {start_block} after end block {end_block}")]
    InvalidVotingPeriod {
        start_block: BlockNumber,
        end_block: BlockNumber,
    },

    #[error("targets, values, signatures and calldatas differ in length")]
    MismatchedLengths,
}
