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

use governance_common::domain::{BlockNumber, ChainId};
use metrics::{Counter, Gauge, counter, gauge};

/// Sync loop metrics of a single chain.
#[derive(Clone)]
pub struct Metrics {
    pub cycles: Counter,
    pub failures: Counter,
    pub dropped_ticks: Counter,
    pub decode_errors: Counter,
    pub published_snapshots: Counter,
    head: Gauge,
    cursor: Gauge,
    proposals: Gauge,
}

impl Metrics {
    pub fn new(chain_id: ChainId) -> Self {
        let chain_id = chain_id.to_string();

        Self {
            cycles: counter!("governance_indexer_cycles", "chain_id" => chain_id.clone()),
            failures: counter!("governance_indexer_cycle_failures", "chain_id" => chain_id.clone()),
            dropped_ticks: counter!("governance_indexer_dropped_ticks", "chain_id" => chain_id.clone()),
            decode_errors: counter!("governance_indexer_decode_errors", "chain_id" => chain_id.clone()),
            published_snapshots: counter!(
                "governance_indexer_published_snapshots",
                "chain_id" => chain_id.clone()
            ),
            head: gauge!("governance_indexer_head", "chain_id" => chain_id.clone()),
            cursor: gauge!("governance_indexer_cursor", "chain_id" => chain_id.clone()),
            proposals: gauge!("governance_indexer_proposals", "chain_id" => chain_id),
        }
    }

    pub fn update(&self, head: BlockNumber, cursor: Option<BlockNumber>, proposals: usize) {
        self.head.set(head as f64);
        if let Some(cursor) = cursor {
            self.cursor.set(cursor as f64);
        }
        self.proposals.set(proposals as f64);
    }
}
