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

use crate::domain::{CommentRecord, ProposalId, Support, VoteRecord};
use governance_common::domain::{Address, U256};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Vote and comment statistics over the merged history of a chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub by_support: BTreeMap<Support, SupportStats>,
    pub by_proposal: BTreeMap<ProposalId, ProposalStats>,
    pub unique_voters: u64,

    /// Unique voters relative to holders with nonzero voting weight; absent if the number of
    /// holders is unknown.
    pub participation: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupportStats {
    pub count: u64,
    pub weight: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStats {
    pub by_support: BTreeMap<Support, SupportStats>,
    pub comments: u64,
}

/// Aggregate the given votes and comments. Comment-only votes are grouped under
/// [Support::Comment] but do not make their voters count as participants.
pub fn aggregate<'a>(
    votes: impl IntoIterator<Item = &'a VoteRecord>,
    comments: impl IntoIterator<Item = &'a CommentRecord>,
    holders: Option<u64>,
) -> Stats {
    let mut stats = Stats::default();
    let mut voters = BTreeSet::<Address>::new();

    for vote in votes {
        add(&mut stats.by_support, vote);
        add(
            &mut stats
                .by_proposal
                .entry(vote.proposal_id)
                .or_default()
                .by_support,
            vote,
        );

        if vote.support.is_counted() {
            voters.insert(vote.voter);
        }
    }

    for comment in comments {
        stats
            .by_proposal
            .entry(comment.proposal_id)
            .or_default()
            .comments += 1;
    }

    stats.unique_voters = voters.len() as u64;
    stats.participation = holders
        .filter(|holders| *holders > 0)
        .map(|holders| (stats.unique_voters as f64 / holders as f64).min(1.0));

    stats
}

fn add(by_support: &mut BTreeMap<Support, SupportStats>, vote: &VoteRecord) {
    let stats = by_support.entry(vote.support).or_default();
    stats.count += 1;
    stats.weight = stats.weight.saturating_add(vote.weight);
}
