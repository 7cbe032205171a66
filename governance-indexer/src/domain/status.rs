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

use crate::domain::{OperatorRoles, Permissions, ProposalRecord, ProposalStatus};
use governance_common::domain::{BlockNumber, Timestamp};

/// Height and timestamp of a block, usually the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTime {
    pub block_number: BlockNumber,
    pub timestamp: Timestamp,
}

/// Derive the status of the given proposal at the given chain time.
///
/// This is a strict priority chain: cancellation and execution are terminal and short-circuit
/// everything else, then the voting period thresholds, then the outcome of the vote. Quorum and
/// execution deadline are read-derived and never computed locally.
///
/// Voting periods are measured in blocks, the execution deadline of the timelock in seconds.
pub fn resolve_status(record: &ProposalRecord, now: ChainTime) -> ProposalStatus {
    if record.canceled_at.is_some() {
        return ProposalStatus::Canceled;
    }

    if record.executed_at.is_some() {
        return ProposalStatus::Executed;
    }

    if now.block_number < record.start_block {
        return ProposalStatus::Pending;
    }

    if now.block_number <= record.end_block {
        return ProposalStatus::Active;
    }

    if record.for_votes <= record.against_votes || !quorum_reached(record) {
        return ProposalStatus::Defeated;
    }

    if record.queued_at.is_some() {
        let expired = record
            .reads
            .execution_deadline
            .is_some_and(|deadline| now.timestamp >= deadline);

        return if expired {
            ProposalStatus::Expired
        } else {
            ProposalStatus::Queued
        };
    }

    ProposalStatus::Succeeded
}

/// Quorum counts for and abstain votes. Without a quorum read yet, the quorum counts as reached.
fn quorum_reached(record: &ProposalRecord) -> bool {
    record.reads.quorum.is_none_or(|quorum| {
        record.for_votes.saturating_add(record.abstain_votes) >= quorum
    })
}

/// Derive what the operator may do with a proposal in the given status.
pub fn resolve_permissions(status: ProposalStatus, roles: &OperatorRoles) -> Permissions {
    let can_propose = roles.meets_proposal_threshold();

    Permissions {
        can_queue: status == ProposalStatus::Succeeded,
        can_execute: status == ProposalStatus::Queued && roles.executor,
        can_cancel: matches!(
            status,
            ProposalStatus::Pending | ProposalStatus::Succeeded | ProposalStatus::Queued
        ) && roles.canceller,
        can_propose,
        can_reopen: matches!(
            status,
            ProposalStatus::Defeated | ProposalStatus::Expired | ProposalStatus::Canceled
        ) && can_propose,
    }
}
