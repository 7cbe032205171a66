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

use crate::domain::{
    ChainTime, CommentKey, CommentRecord, EventPayload, GovernanceEvent, OperatorRoles, Permissions,
    ProposalCreated, ProposalId, ProposalRecord, ProposalStatus, ReadFields, StateHash, Support,
    VoteKey, VoteRecord, VotingPower, resolve_permissions, resolve_status,
};
use governance_common::domain::{
    Address, BlockNumber, ChainId, Timestamp, TransactionHash, U256,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// The authoritative merged state of one chain: proposals, votes, comments and voting power.
///
/// Ingestion is commutative and idempotent: records are keyed by their deduplication keys,
/// lifecycle events keep the earliest block and tallies are always recomputed from the full
/// set of votes.
#[derive(Debug, Clone, Default)]
pub struct ProposalStore {
    proposals: BTreeMap<ProposalId, ProposalRecord>,
    lifecycles: BTreeMap<ProposalId, Lifecycle>,
    votes: BTreeMap<VoteKey, VoteRecord>,
    comments: BTreeMap<CommentKey, CommentRecord>,
    voting_power: BTreeMap<Address, VotingPower>,
    permissions: BTreeMap<ProposalId, Permissions>,
    can_propose: bool,
}

/// Lifecycle events of a proposal, tracked independently of its creation so that ingestion
/// order does not matter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Lifecycle {
    queued: Option<(BlockNumber, Timestamp)>,
    executed_at: Option<BlockNumber>,
    canceled_at: Option<BlockNumber>,
}

/// What a call to [ProposalStore::ingest] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub proposals: usize,
    pub votes: usize,
    pub comments: usize,
    pub duplicates: usize,
}

impl ProposalStore {
    /// Merge the given events, then recompute the tallies of all proposals.
    pub fn ingest(
        &mut self,
        events: impl IntoIterator<Item = GovernanceEvent>,
    ) -> Result<IngestOutcome, MergeConflictError> {
        let mut outcome = IngestOutcome::default();

        for event in events {
            self.apply(event, &mut outcome)?;
        }
        self.recompute_tallies();

        Ok(outcome)
    }

    fn apply(
        &mut self,
        event: GovernanceEvent,
        outcome: &mut IngestOutcome,
    ) -> Result<(), MergeConflictError> {
        let GovernanceEvent {
            block_number,
            log_index,
            transaction_hash,
            payload,
        } = event;

        match payload {
            EventPayload::ProposalCreated(created) => {
                let id = created.proposal_id;
                if self.proposals.contains_key(&id) {
                    outcome.duplicates += 1;
                } else {
                    let mut record = new_record(created, block_number, transaction_hash);
                    if let Some(lifecycle) = self.lifecycles.get(&id) {
                        lifecycle.apply_to(&mut record);
                    }
                    self.proposals.insert(id, record);
                    outcome.proposals += 1;
                }
            }

            EventPayload::VoteCast {
                proposal_id,
                voter,
                support,
                weight,
                reason,
            } => {
                let vote = VoteRecord {
                    proposal_id,
                    voter,
                    support,
                    weight,
                    reason,
                    block_number,
                    transaction_hash,
                    log_index,
                };

                if insert_deduplicated(&mut self.votes, vote.key(), vote, "vote")? {
                    outcome.votes += 1;
                } else {
                    outcome.duplicates += 1;
                }
            }

            EventPayload::Comment {
                proposal_id,
                author,
                body,
            } => {
                let comment = CommentRecord {
                    proposal_id,
                    author,
                    body,
                    block_number,
                    transaction_hash,
                    log_index,
                };

                if insert_deduplicated(&mut self.comments, comment.key(), comment, "comment")? {
                    outcome.comments += 1;
                } else {
                    outcome.duplicates += 1;
                }
            }

            EventPayload::ProposalQueued { proposal_id, eta } => {
                self.update_lifecycle(proposal_id, |lifecycle| {
                    lifecycle.queued = earliest(lifecycle.queued, (block_number, eta));
                });
            }

            EventPayload::ProposalExecuted { proposal_id } => {
                self.update_lifecycle(proposal_id, |lifecycle| {
                    lifecycle.executed_at = earliest(lifecycle.executed_at, block_number);
                });
            }

            EventPayload::ProposalCanceled { proposal_id } => {
                self.update_lifecycle(proposal_id, |lifecycle| {
                    lifecycle.canceled_at = earliest(lifecycle.canceled_at, block_number);
                });
            }

            EventPayload::DelegateVotesChanged {
                delegate,
                new_votes,
                ..
            } => {
                let power = VotingPower {
                    votes: new_votes,
                    block_number,
                    log_index,
                };

                match self.voting_power.get(&delegate) {
                    Some(current) if current == &power => outcome.duplicates += 1,

                    Some(current)
                        if (current.block_number, current.log_index)
                            == (block_number, log_index) =>
                    {
                        return Err(MergeConflictError {
                            entity: "voting power",
                            key: format!("{delegate}@{block_number}/{log_index}"),
                        });
                    }

                    Some(current)
                        if (current.block_number, current.log_index)
                            > (block_number, log_index) => {}

                    _ => {
                        self.voting_power.insert(delegate, power);
                    }
                }
            }
        }

        Ok(())
    }

    fn update_lifecycle(&mut self, proposal_id: ProposalId, update: impl FnOnce(&mut Lifecycle)) {
        let lifecycle = self.lifecycles.entry(proposal_id).or_default();
        update(lifecycle);

        if let Some(record) = self.proposals.get_mut(&proposal_id) {
            lifecycle.apply_to(record);
        }
    }

    fn recompute_tallies(&mut self) {
        let mut tallies = HashMap::<ProposalId, [U256; 3]>::new();

        for vote in self.votes.values().filter(|vote| vote.support.is_counted()) {
            let tally = tallies.entry(vote.proposal_id).or_default();
            let slot = match vote.support {
                Support::For => 0,
                Support::Against => 1,
                Support::Abstain => 2,
                Support::Comment => continue,
            };
            tally[slot] = tally[slot].saturating_add(vote.weight);
        }

        for (id, record) in self.proposals.iter_mut() {
            let [for_votes, against_votes, abstain_votes] =
                tallies.get(id).copied().unwrap_or_default();
            record.for_votes = for_votes;
            record.against_votes = against_votes;
            record.abstain_votes = abstain_votes;
        }
    }

    /// Overlay the given reads onto the given proposal unless they are older than the current
    /// ones: last write by block number wins, not last write by arrival. Returns whether the
    /// reads were applied.
    pub fn apply_reads(&mut self, proposal_id: ProposalId, reads: ReadFields) -> bool {
        match self.proposals.get_mut(&proposal_id) {
            Some(record) if reads.as_of_block >= record.reads.as_of_block => {
                record.reads = reads;
                true
            }

            _ => false,
        }
    }

    /// Resolve status and permissions of all proposals at the given chain time.
    pub fn resolve(&mut self, now: ChainTime, roles: &OperatorRoles) {
        self.permissions.clear();

        for (id, record) in self.proposals.iter_mut() {
            record.status = resolve_status(record, now);
            self.permissions
                .insert(*id, resolve_permissions(record.status, roles));
        }

        self.can_propose = roles.meets_proposal_threshold();
    }

    /// Proposals whose last resolved status is not terminal; terminal ones never need reads.
    pub fn non_terminal(&self) -> impl Iterator<Item = &ProposalRecord> {
        self.proposals
            .values()
            .filter(|record| !record.status.is_terminal())
    }

    pub fn proposal(&self, proposal_id: &ProposalId) -> Option<&ProposalRecord> {
        self.proposals.get(proposal_id)
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.len()
    }

    /// Number of delegates with nonzero voting weight, if any voting power has been observed.
    pub fn holders(&self) -> Option<u64> {
        if self.voting_power.is_empty() {
            None
        } else {
            let holders = self
                .voting_power
                .values()
                .filter(|power| !power.votes.is_zero())
                .count();
            Some(holders as u64)
        }
    }

    /// Deterministic hash over all mutable state; does not depend on the block the state was
    /// resolved at unless that changed any status.
    pub fn state_hash(&self) -> StateHash {
        let state = HashedState {
            proposals: &self.proposals,
            votes: self.votes.values().collect(),
            comments: self.comments.values().collect(),
            voting_power: &self.voting_power,
            permissions: &self.permissions,
            can_propose: self.can_propose,
        };

        let bytes = serde_json::to_vec(&state).expect("state can be serialized as JSON");
        StateHash::new(Sha256::digest(bytes).into())
    }

    /// Create an immutable snapshot of the current state.
    pub fn snapshot(&self, chain_id: ChainId, as_of_block: BlockNumber) -> Snapshot {
        Snapshot {
            chain_id,
            as_of_block,
            state_hash: self.state_hash(),
            proposals: self.proposals.clone(),
            votes: self.votes.values().cloned().collect(),
            comments: self.comments.values().cloned().collect(),
            permissions: self.permissions.clone(),
            can_propose: self.can_propose,
            holders: self.holders(),
        }
    }
}

/// An immutable view of the merged state of one chain at a given block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub chain_id: ChainId,
    pub as_of_block: BlockNumber,
    pub state_hash: StateHash,
    pub proposals: BTreeMap<ProposalId, ProposalRecord>,
    pub votes: Vec<VoteRecord>,
    pub comments: Vec<CommentRecord>,
    pub permissions: BTreeMap<ProposalId, Permissions>,
    pub can_propose: bool,
    pub holders: Option<u64>,
}

impl Snapshot {
    /// Proposals with the given status.
    pub fn with_status(&self, status: ProposalStatus) -> impl Iterator<Item = &ProposalRecord> {
        self.proposals
            .values()
            .filter(move |record| record.status == status)
    }
}

/// A record with an already known deduplication key but different content; unreachable as long
/// as logs are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting {entity} for key {key}")]
pub struct MergeConflictError {
    pub entity: &'static str,
    pub key: String,
}

#[derive(Serialize)]
struct HashedState<'a> {
    proposals: &'a BTreeMap<ProposalId, ProposalRecord>,
    votes: Vec<&'a VoteRecord>,
    comments: Vec<&'a CommentRecord>,
    voting_power: &'a BTreeMap<Address, VotingPower>,
    permissions: &'a BTreeMap<ProposalId, Permissions>,
    can_propose: bool,
}

impl Lifecycle {
    fn apply_to(&self, record: &mut ProposalRecord) {
        record.queued_at = self.queued.map(|(block_number, _)| block_number);
        record.eta = self.queued.map(|(_, eta)| eta);
        record.executed_at = self.executed_at;
        record.canceled_at = self.canceled_at;
    }
}

fn new_record(
    created: ProposalCreated,
    block_number: BlockNumber,
    transaction_hash: TransactionHash,
) -> ProposalRecord {
    let ProposalCreated {
        proposal_id,
        proposer,
        targets,
        values,
        signatures,
        calldatas,
        start_block,
        end_block,
        description,
        description_hash,
    } = created;

    ProposalRecord {
        id: proposal_id,
        proposer,
        targets,
        values,
        signatures,
        calldatas,
        description,
        description_hash,
        block_number,
        start_block,
        end_block,
        transaction_hash,
        status: ProposalStatus::Pending,
        for_votes: U256::ZERO,
        against_votes: U256::ZERO,
        abstain_votes: U256::ZERO,
        queued_at: None,
        eta: None,
        executed_at: None,
        canceled_at: None,
        reads: ReadFields::default(),
    }
}

/// Insert the given value unless its key is already known; returns whether it was inserted.
fn insert_deduplicated<K, V>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    entity: &'static str,
) -> Result<bool, MergeConflictError>
where
    K: Ord + std::fmt::Debug,
    V: PartialEq,
{
    match map.get(&key) {
        Some(existing) if existing == &value => Ok(false),

        Some(_) => Err(MergeConflictError {
            entity,
            key: format!("{key:?}"),
        }),

        None => {
            map.insert(key, value);
            Ok(true)
        }
    }
}

fn earliest<T>(current: Option<T>, candidate: T) -> Option<T>
where
    T: Ord,
{
    match current {
        Some(current) => Some(current.min(candidate)),
        None => Some(candidate),
    }
}
