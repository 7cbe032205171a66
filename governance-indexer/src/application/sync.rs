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

use crate::{
    application::{Config, metrics::Metrics},
    domain::{
        CallOutcome, ChainRegistry, ChainTime, EventAbi, LogFilter, MergeConflictError, MulticallBatcher,
        MulticallError, Node, OperatorRoles, ProposalStore, RawLog, ReadPlan, Snapshot, StateHash,
        SyncCursor, UnknownChainError, decode_logs,
    },
};
use derive_more::Display;
use fastrace::trace;
use governance_common::{
    domain::{BlockNumber, ChainId},
    error::{BoxError, StdErrorExt},
};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::{
    collections::HashMap, error::Error as StdError, future::Future, sync::Arc, time::Duration,
};
use thiserror::Error;
use tokio::{sync::Mutex, time::timeout};

/// Callback invoked with every published snapshot whose state hash differs from the previous one.
pub type SnapshotCallback = Arc<dyn Fn(Arc<Snapshot>) + Send + Sync + 'static>;

/// Phase of the sync loop of a chain.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Fetching,
    Merging,
    Publishing,
}

/// Sync state of a single chain. The mutex around [SyncState] ensures at most one cycle in flight.
pub struct ChainSync {
    chain_id: ChainId,
    state: Mutex<SyncState>,
    phase: RwLock<SyncPhase>,
    latest: RwLock<Option<Arc<Snapshot>>>,
    subscribers: RwLock<Vec<SnapshotCallback>>,
    metrics: Metrics,
}

/// Cursor, store and last published hash; only updated by a successful cycle.
#[derive(Debug)]
struct SyncState {
    cursor: SyncCursor,
    store: ProposalStore,
    state_hash: Option<StateHash>,
}

impl ChainSync {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            state: Mutex::new(SyncState {
                cursor: SyncCursor::new(0),
                store: ProposalStore::default(),
                state_hash: None,
            }),
            phase: RwLock::default(),
            latest: RwLock::default(),
            subscribers: RwLock::default(),
            metrics: Metrics::new(chain_id),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.read().clone()
    }

    pub fn subscribe(&self, callback: SnapshotCallback) {
        self.subscribers.write().push(callback);
    }

    /// Reset the cursor to the given block unless blocks have already been processed.
    pub async fn set_start_block(&self, start_block: BlockNumber) -> bool {
        let mut state = self.state.lock().await;

        if state.cursor.processed().is_some() {
            false
        } else {
            state.cursor = SyncCursor::new(start_block);
            true
        }
    }

    /// Run a cycle unless one is already in flight, in which case the tick is dropped.
    pub async fn tick<N>(&self, context: &SyncContext<'_, N>) -> Result<(), SyncError>
    where
        N: Node,
    {
        let Ok(mut state) = self.state.try_lock() else {
            debug!(chain_id:% = self.chain_id; "cycle in flight, dropping tick");
            self.metrics.dropped_ticks.increment(1);
            return Ok(());
        };

        self.cycle(context, &mut state).await.map(|_| ())
    }

    /// Wait for a cycle in flight, if any, then run a cycle.
    pub async fn refresh<N>(&self, context: &SyncContext<'_, N>) -> Result<Arc<Snapshot>, SyncError>
    where
        N: Node,
    {
        let mut state = self.state.lock().await;
        self.cycle(context, &mut state).await
    }

    async fn cycle<N>(
        &self,
        context: &SyncContext<'_, N>,
        state: &mut SyncState,
    ) -> Result<Arc<Snapshot>, SyncError>
    where
        N: Node,
    {
        self.metrics.cycles.increment(1);

        let result = self.run_cycle(context, state).await;
        self.set_phase(SyncPhase::Idle);

        if let Err(error) = &result {
            self.metrics.failures.increment(1);
            warn!(
                chain_id:% = self.chain_id,
                next_block = state.cursor.next_block(),
                error:% = error.as_chain();
                "sync cycle failed"
            );
        }

        result
    }

    #[trace]
    async fn run_cycle<N>(
        &self,
        context: &SyncContext<'_, N>,
        state: &mut SyncState,
    ) -> Result<Arc<Snapshot>, SyncError>
    where
        N: Node,
    {
        let chain_id = self.chain_id;

        // Without a multicall contract no reads can be taken, hence no status resolved.
        context.registry.multicall(chain_id)?;

        self.set_phase(SyncPhase::Fetching);
        let head = with_timeout(
            "get block number",
            context.config.rpc_timeout,
            context.node.block_number(chain_id),
        )
        .await?;

        if !state.cursor.is_behind(head) {
            debug!(chain_id:%, head, next_block = state.cursor.next_block(); "up to date");

            let snapshot = match self.latest() {
                Some(snapshot) => snapshot,
                None => Arc::new(state.store.snapshot(chain_id, head)),
            };
            return Ok(snapshot);
        }

        let (logs, roles, timestamp) = tokio::try_join!(
            context.fetch_logs(chain_id, &state.cursor, head),
            context.operator_roles(chain_id, head),
            with_timeout(
                "get block timestamp",
                context.config.rpc_timeout,
                context.node.block_timestamp(chain_id, head),
            )
        )?;
        debug!(chain_id:%, head, logs = logs.len(); "fetched logs");

        self.set_phase(SyncPhase::Merging);
        let mut store = state.store.clone();
        let events = decode_logs(&logs, context.abi)
            .filter_map(|event| match event {
                Ok(event) => Some(event),

                Err(error) => {
                    warn!(chain_id:%, error:% = error.as_chain(); "cannot decode log");
                    self.metrics.decode_errors.increment(1);
                    None
                }
            })
            .collect::<Vec<_>>();

        let outcome = store.ingest(events)?;
        debug!(chain_id:%, outcome:?; "ingested events");

        context.refresh_reads(chain_id, &mut store, head).await?;

        self.set_phase(SyncPhase::Publishing);
        let now = ChainTime {
            block_number: head,
            timestamp,
        };
        store.resolve(now, &roles);
        let state_hash = store.state_hash();
        let snapshot = Arc::new(store.snapshot(chain_id, head));

        state.store = store;
        state.cursor.advance(head);
        *self.latest.write() = Some(snapshot.clone());
        self.metrics
            .update(head, state.cursor.to_block(), state.store.proposal_count());

        if state.state_hash == Some(state_hash) {
            debug!(chain_id:%, head, state_hash:%; "state unchanged");
        } else {
            info!(
                chain_id:%,
                head,
                proposals = state.store.proposal_count(),
                state_hash:%;
                "publishing snapshot"
            );

            state.state_hash = Some(state_hash);
            self.metrics.published_snapshots.increment(1);

            let subscribers = self.subscribers.read().clone();
            for subscriber in subscribers {
                subscriber(snapshot.clone());
            }
        }

        Ok(snapshot)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }
}

/// Everything a sync cycle needs besides the state of its chain.
pub struct SyncContext<'a, N> {
    pub config: &'a Config,
    pub node: &'a N,
    pub abi: &'a EventAbi,
    pub registry: ChainRegistry,
}

impl<N> SyncContext<'_, N>
where
    N: Node,
{
    /// Logs from the first unprocessed block up to the given head, fetched in chunks of at most
    /// the configured maximum block range.
    #[trace]
    async fn fetch_logs(
        &self,
        chain_id: ChainId,
        cursor: &SyncCursor,
        head: BlockNumber,
    ) -> Result<Vec<RawLog>, SyncError> {
        let addresses = self.registry.contracts(chain_id)?.log_sources();
        if addresses.is_empty() {
            return Ok(vec![]);
        }
        let topics = self.abi.topics();

        let mut logs = vec![];
        for (from_block, to_block) in cursor.chunks(head, self.config.max_block_range) {
            let filter = LogFilter {
                from_block,
                to_block,
                addresses: addresses.clone(),
                topics: topics.clone(),
            };

            let chunk = with_timeout(
                "get logs",
                self.config.rpc_timeout,
                self.node.get_logs(chain_id, &filter),
            )
            .await?;
            logs.extend(chunk);
        }

        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    /// Roles and voting weight of the configured operator, if any.
    #[trace]
    async fn operator_roles(
        &self,
        chain_id: ChainId,
        head: BlockNumber,
    ) -> Result<OperatorRoles, SyncError> {
        let Some(operator) = self.config.operator else {
            return Ok(OperatorRoles::default());
        };

        let contracts = self.registry.contracts(chain_id)?;
        let plan = ReadPlan::operator(chain_id, contracts, operator, head);
        let outcomes = self.multicall(chain_id, &plan, head).await?;

        Ok(plan.operator_roles(&outcomes))
    }

    /// Refresh the read-derived fields of all non-terminal proposals with one multicall batch.
    #[trace]
    async fn refresh_reads(
        &self,
        chain_id: ChainId,
        store: &mut ProposalStore,
        head: BlockNumber,
    ) -> Result<(), SyncError> {
        let contracts = self.registry.contracts(chain_id)?;
        let plan = ReadPlan::proposals(chain_id, contracts, store.non_terminal(), head);
        let outcomes = self.multicall(chain_id, &plan, head).await?;

        for (proposal_id, reads) in plan.proposal_reads(&outcomes, head) {
            store.apply_reads(proposal_id, reads);
        }

        Ok(())
    }

    async fn multicall(
        &self,
        chain_id: ChainId,
        plan: &ReadPlan,
        head: BlockNumber,
    ) -> Result<Vec<CallOutcome>, SyncError> {
        if plan.is_empty() {
            return Ok(vec![]);
        }

        let batcher = MulticallBatcher::new(self.node, &self.registry);
        let blocks = HashMap::from([(chain_id, head)]);
        let outcomes = timeout(
            self.config.rpc_timeout,
            batcher.execute(plan.calls(), &blocks),
        )
        .await
        .map_err(|_| SyncError::Timeout("multicall", self.config.rpc_timeout))??;

        Ok(outcomes)
    }
}

async fn with_timeout<T, E, F>(
    operation: &'static str,
    duration: Duration,
    future: F,
) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, E>>,
    E: StdError + Send + Sync + 'static,
{
    timeout(duration, future)
        .await
        .map_err(|_| SyncError::Timeout(operation, duration))?
        .map_err(|error| SyncError::Rpc(operation, error.into()))
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot {0}")]
    Rpc(&'static str, #[source] BoxError),

    #[error("cannot {0} within {1:?}")]
    Timeout(&'static str, Duration),

    #[error(transparent)]
    UnknownChain(#[from] UnknownChainError),

    #[error(transparent)]
    MergeConflict(#[from] MergeConflictError),
}

impl SyncError {
    /// Fatal errors stop the sync loop of the chain; all others are retried with the next tick.
    /// An unknown chain needs a new registration, which no retry provides.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::MergeConflict(_) | SyncError::UnknownChain(_)
        )
    }
}

impl From<MulticallError> for SyncError {
    fn from(error: MulticallError) -> Self {
        match error {
            MulticallError::UnknownChain(error) => SyncError::UnknownChain(error),
            error => SyncError::Rpc("execute multicall", error.into()),
        }
    }
}
