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

use governance_common::domain::BlockNumber;

/// Position of the sync loop of a chain: the last successfully processed inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    start_block: BlockNumber,
    processed: Option<(BlockNumber, BlockNumber)>,
}

impl SyncCursor {
    /// A cursor for a chain whose contracts were deployed at the given block.
    pub fn new(start_block: BlockNumber) -> Self {
        Self {
            start_block,
            processed: None,
        }
    }

    /// The first block not yet processed.
    pub fn next_block(&self) -> BlockNumber {
        self.processed
            .map(|(_, to_block)| to_block + 1)
            .unwrap_or(self.start_block)
    }

    /// The last processed block, if any.
    pub fn to_block(&self) -> Option<BlockNumber> {
        self.processed.map(|(_, to_block)| to_block)
    }

    pub fn processed(&self) -> Option<(BlockNumber, BlockNumber)> {
        self.processed
    }

    /// Whether there are blocks up to the given head not yet processed.
    pub fn is_behind(&self, head: BlockNumber) -> bool {
        head >= self.next_block()
    }

    /// Record the processing of all blocks up to the given head; never moves backwards.
    pub fn advance(&mut self, head: BlockNumber) {
        if self.is_behind(head) {
            self.processed = Some((self.next_block(), head));
        }
    }

    /// The inclusive block ranges from the first unprocessed block up to the given head, with at
    /// most `max_block_range` blocks each.
    pub fn chunks(
        &self,
        head: BlockNumber,
        max_block_range: u64,
    ) -> impl Iterator<Item = (BlockNumber, BlockNumber)> {
        let max_block_range = max_block_range.max(1);
        let mut from_block = self.next_block();

        std::iter::from_fn(move || {
            (from_block <= head).then(|| {
                let to_block = from_block
                    .saturating_add(max_block_range - 1)
                    .min(head);
                let chunk = (from_block, to_block);
                from_block = to_block + 1;
                chunk
            })
        })
    }
}
