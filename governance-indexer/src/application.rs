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

mod metrics;
mod sync;

pub use sync::{SnapshotCallback, SyncError, SyncPhase};

use crate::{
    application::sync::{ChainSync, SyncContext},
    domain::{
        ChainContracts, ChainRegistry, DEFAULT_COMMENT, EventAbi, Node, RegistryError, Snapshot,
        Stats, UnknownChainError, aggregate,
    },
};
use anyhow::Context;
use fastrace::{Span, future::FutureExt, prelude::SpanContext};
use futures::StreamExt;
use governance_common::{
    domain::{Address, BlockNumber, ChainId},
    error::StdErrorExt,
};
use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::{
    collections::HashMap,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use stream_cancel::{StreamExt as _, Trigger, Tripwire};
use thiserror::Error;
use tokio::{
    signal::unix::Signal,
    task::{self, JoinHandle},
    time::{MissedTickBehavior, interval},
};
use tokio_stream::wrappers::IntervalStream;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde", default = "sync_interval_default")]
    pub sync_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub rpc_timeout: Duration,

    /// Maximum number of blocks per log request.
    pub max_block_range: u64,

    /// Account whose roles and voting weight determine the permission flags.
    pub operator: Option<Address>,

    #[serde(default = "comment_event_signature_default")]
    pub comment_event_signature: String,
}

/// A chain to be synced: its contract suite and the block to start syncing from.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,

    #[serde(default)]
    pub start_block: BlockNumber,

    #[serde(flatten)]
    pub contracts: ChainContracts,
}

/// Syncs the governance state of the registered chains and publishes snapshots.
pub struct GovernanceIndexer<N> {
    inner: Arc<Inner<N>>,
}

struct Inner<N> {
    config: Config,
    node: N,
    abi: EventAbi,
    registry: RwLock<ChainRegistry>,
    chains: RwLock<HashMap<ChainId, Arc<ChainSync>>>,
    tasks: Mutex<HashMap<ChainId, SyncTask>>,
    next_generation: AtomicU64,
}

/// A running sync loop; the generation tells apart loops of the same chain started one after
/// the other.
struct SyncTask {
    generation: u64,
    trigger: Trigger,
    handle: JoinHandle<()>,
}

impl<N> Clone for GovernanceIndexer<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N> GovernanceIndexer<N>
where
    N: Node,
{
    pub fn new(config: Config, node: N) -> Self {
        let abi = EventAbi::new(&config.comment_event_signature);

        let inner = Inner {
            config,
            node,
            abi,
            registry: RwLock::default(),
            chains: RwLock::default(),
            tasks: Mutex::default(),
            next_generation: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register the contracts of the given chain; re-registering overwrites the contracts, but
    /// keeps the sync state.
    pub fn register_chain(
        &self,
        chain_id: ChainId,
        contracts: ChainContracts,
    ) -> Result<(), RegistryError> {
        self.inner
            .registry
            .write()
            .register_chain(chain_id, contracts)?;
        self.ensure_chain(chain_id);

        Ok(())
    }

    pub fn register_multicall(
        &self,
        chain_id: ChainId,
        address: Address,
    ) -> Result<(), RegistryError> {
        self.inner
            .registry
            .write()
            .register_multicall(chain_id, address)?;
        self.ensure_chain(chain_id);

        Ok(())
    }

    /// Set the block to start syncing the given chain from; ignored once blocks have been
    /// processed. Returns whether the start block was set.
    pub async fn set_start_block(
        &self,
        chain_id: ChainId,
        start_block: BlockNumber,
    ) -> Result<bool, UnknownChainError> {
        let chain = self.chain(chain_id)?;
        Ok(chain.set_start_block(start_block).await)
    }

    /// Start the periodic sync of the given chain. Overlapping ticks are dropped. A fatal sync
    /// error stops the sync, after which it can be started again.
    pub fn start(&self, chain_id: ChainId, period: Duration) -> Result<(), ControlError> {
        let chain = self.chain(chain_id)?;
        self.inner.registry.read().multicall(chain_id)?;

        let mut tasks = self.inner.tasks.lock();
        if tasks.contains_key(&chain_id) {
            return Err(ControlError::AlreadyStarted(chain_id));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (trigger, tripwire) = Tripwire::new();
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ticks = IntervalStream::new(interval).take_until_if(tripwire);

        let handle = task::spawn({
            let indexer = self.clone();

            async move {
                let mut ticks = pin!(ticks);

                while ticks.next().await.is_some() {
                    let context = indexer.context();
                    let result = chain
                        .tick(&context)
                        .in_span(Span::root("sync-cycle", SpanContext::random()))
                        .await;

                    match result {
                        Err(error) if error.is_fatal() => {
                            error!(
                                chain_id:%,
                                error:% = error.as_chain();
                                "fatal sync error, stopping sync"
                            );
                            indexer.remove_task(chain_id, generation);
                            break;
                        }

                        _ => {}
                    }
                }

                info!(chain_id:%; "sync stopped");
            }
        });

        tasks.insert(
            chain_id,
            SyncTask {
                generation,
                trigger,
                handle,
            },
        );
        info!(chain_id:%, period:?; "sync started");

        Ok(())
    }

    /// Stop the periodic sync of the given chain, letting a cycle in flight complete.
    pub async fn stop(&self, chain_id: ChainId) -> Result<(), ControlError> {
        self.chain(chain_id)?;

        let task = self.inner.tasks.lock().remove(&chain_id);
        if let Some(SyncTask {
            trigger, handle, ..
        }) = task
        {
            trigger.cancel();
            handle
                .await
                .map_err(|error| ControlError::TaskPanicked(chain_id, error.to_string()))?;
        }

        Ok(())
    }

    /// Run a cycle right away, after waiting for a cycle in flight, and return the resulting
    /// snapshot.
    pub async fn refresh_now(&self, chain_id: ChainId) -> Result<Arc<Snapshot>, ControlError> {
        let chain = self.chain(chain_id)?;
        self.inner.registry.read().multicall(chain_id)?;
        let context = self.context();

        let snapshot = chain
            .refresh(&context)
            .in_span(Span::root("refresh-now", SpanContext::random()))
            .await?;

        Ok(snapshot)
    }

    /// Register a callback invoked with every snapshot with a changed state hash.
    pub fn on_snapshot<F>(&self, chain_id: ChainId, callback: F) -> Result<(), UnknownChainError>
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        let chain = self.chain(chain_id)?;
        chain.subscribe(Arc::new(callback));
        Ok(())
    }

    pub fn latest_snapshot(
        &self,
        chain_id: ChainId,
    ) -> Result<Option<Arc<Snapshot>>, UnknownChainError> {
        Ok(self.chain(chain_id)?.latest())
    }

    /// Statistics over the latest snapshot; empty before the first snapshot.
    pub fn get_stats(&self, chain_id: ChainId) -> Result<Stats, UnknownChainError> {
        let stats = self
            .chain(chain_id)?
            .latest()
            .map(|snapshot| aggregate(&snapshot.votes, &snapshot.comments, snapshot.holders))
            .unwrap_or_default();

        Ok(stats)
    }

    pub fn phase(&self, chain_id: ChainId) -> Result<SyncPhase, UnknownChainError> {
        Ok(self.chain(chain_id)?.phase())
    }

    /// Whether the periodic sync of the given chain is running.
    pub fn is_running(&self, chain_id: ChainId) -> Result<bool, UnknownChainError> {
        self.chain(chain_id)?;
        Ok(self.inner.tasks.lock().contains_key(&chain_id))
    }

    /// Remove the task of the given chain unless it has been replaced by a later start.
    fn remove_task(&self, chain_id: ChainId, generation: u64) {
        let mut tasks = self.inner.tasks.lock();
        if tasks
            .get(&chain_id)
            .is_some_and(|task| task.generation == generation)
        {
            tasks.remove(&chain_id);
        }
    }

    fn chain(&self, chain_id: ChainId) -> Result<Arc<ChainSync>, UnknownChainError> {
        self.inner
            .chains
            .read()
            .get(&chain_id)
            .cloned()
            .ok_or(UnknownChainError(chain_id))
    }

    fn ensure_chain(&self, chain_id: ChainId) {
        self.inner
            .chains
            .write()
            .entry(chain_id)
            .or_insert_with(|| Arc::new(ChainSync::new(chain_id)));
    }

    fn context(&self) -> SyncContext<'_, N> {
        SyncContext {
            config: &self.inner.config,
            node: &self.inner.node,
            abi: &self.inner.abi,
            registry: self.inner.registry.read().clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    UnknownChain(#[from] UnknownChainError),

    #[error("sync for chain {0} already started")]
    AlreadyStarted(ChainId),

    #[error("sync task for chain {0} panicked: {1}")]
    TaskPanicked(ChainId, String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Register and start syncing the given chains, then stop them all on SIGTERM.
pub async fn run<N>(
    config: Config,
    chains: Vec<ChainConfig>,
    node: N,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    N: Node,
{
    let sync_interval = config.sync_interval;
    let indexer = GovernanceIndexer::new(config, node);

    let mut chain_ids = Vec::with_capacity(chains.len());
    for ChainConfig {
        chain_id,
        start_block,
        contracts,
    } in chains
    {
        indexer
            .register_chain(chain_id, contracts)
            .with_context(|| format!("register chain {chain_id}"))?;
        indexer
            .set_start_block(chain_id, start_block)
            .await
            .with_context(|| format!("set start block for chain {chain_id}"))?;

        indexer
            .on_snapshot(chain_id, |snapshot| {
                info!(
                    chain_id:% = snapshot.chain_id,
                    as_of_block = snapshot.as_of_block,
                    proposals = snapshot.proposals.len(),
                    votes = snapshot.votes.len(),
                    state_hash:% = snapshot.state_hash;
                    "snapshot published"
                );
            })
            .with_context(|| format!("subscribe to snapshots for chain {chain_id}"))?;

        indexer
            .start(chain_id, sync_interval)
            .with_context(|| format!("start sync for chain {chain_id}"))?;
        chain_ids.push(chain_id);
    }

    sigterm.recv().await;
    warn!("SIGTERM received");

    for chain_id in chain_ids {
        indexer
            .stop(chain_id)
            .await
            .with_context(|| format!("stop sync for chain {chain_id}"))?;
    }

    Ok(())
}

fn sync_interval_default() -> Duration {
    Duration::from_millis(500)
}

fn comment_event_signature_default() -> String {
    DEFAULT_COMMENT.to_owned()
}

#[cfg(test)]
mod tests {
    use crate::{
        application::{Config, ControlError, GovernanceIndexer, SyncError, SyncPhase},
        domain::{
            CallOutcome, ChainContracts, DEFAULT_COMMENT, EXECUTOR_ROLE, ProposalStatus, Snapshot,
            Support, UnknownChainError, abi,
            mock::{MockNode, timestamp},
            role_id,
            testing::{
                GOVERNANCE, log, proposal_created_log, proposal_executed_log, proposal_id,
                proposal_queued_log, vote_cast_log,
            },
        },
    };
    use alloy_sol_types::{SolCall, SolValue};
    use assert_matches::assert_matches;
    use governance_common::domain::{Address, Bytes, ChainId, U256, keccak256};
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    const MULTICALL: Address = Address::repeat_byte(0xfe);
    const TIMELOCK: Address = Address::repeat_byte(0xbb);
    const OPERATOR: Address = Address::repeat_byte(0x07);

    /// Grace period of the timelock in seconds.
    const GRACE_PERIOD: u64 = 1_000;

    fn chain_id() -> ChainId {
        ChainId::new(1).expect("chain ID is valid")
    }

    fn config(max_block_range: u64) -> Config {
        Config {
            sync_interval: Duration::from_millis(10),
            rpc_timeout: Duration::from_secs(1),
            max_block_range,
            operator: Some(OPERATOR),
            comment_event_signature: DEFAULT_COMMENT.to_owned(),
        }
    }

    fn contracts() -> ChainContracts {
        ChainContracts {
            multicall: Some(MULTICALL),
            governance: Some(GOVERNANCE),
            timelock: Some(TIMELOCK),
            ..Default::default()
        }
    }

    fn word(n: u64) -> CallOutcome {
        CallOutcome::Success(U256::from(n).abi_encode().into())
    }

    fn call_data(call: impl SolCall) -> Bytes {
        call.abi_encode().into()
    }

    /// Quorum of 5 at block 105, grace period of [GRACE_PERIOD] seconds, operator is executor.
    fn node() -> MockNode {
        let node = MockNode::default();

        node.respond(
            GOVERNANCE,
            call_data(abi::quorumCall {
                timepoint: U256::from(105),
            }),
            word(5),
        );
        node.respond(
            TIMELOCK,
            call_data(abi::GRACE_PERIODCall {}),
            word(GRACE_PERIOD),
        );
        node.respond(
            TIMELOCK,
            call_data(abi::hasRoleCall {
                role: role_id(EXECUTOR_ROLE),
                account: OPERATOR,
            }),
            word(1),
        );

        node
    }

    /// Create a proposal voting from block 105 to 205 with the given for and against weights.
    fn propose(node: &MockNode, for_votes: u64, against_votes: u64) {
        let id = proposal_id(1);
        node.add_logs(
            chain_id(),
            [
                proposal_created_log(id, 105, 205, 100),
                vote_cast_log(id, Address::repeat_byte(3), 1, for_votes, 151, 0),
                vote_cast_log(id, Address::repeat_byte(4), 0, against_votes, 152, 0),
            ],
        );
    }

    async fn wait_for_block(indexer: &GovernanceIndexer<MockNode>, block: u64) -> Arc<Snapshot> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let latest = indexer
                    .latest_snapshot(chain_id())
                    .expect("chain is registered");
                if let Some(snapshot) = latest.filter(|snapshot| snapshot.as_of_block == block) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("snapshot is published")
    }

    async fn indexer(node: &MockNode, max_block_range: u64) -> GovernanceIndexer<MockNode> {
        let indexer = GovernanceIndexer::new(config(max_block_range), node.clone());
        indexer
            .register_chain(chain_id(), contracts())
            .expect("chain can be registered");
        indexer
            .set_start_block(chain_id(), 90)
            .await
            .expect("chain is registered");
        indexer
    }

    fn status(snapshot: &Snapshot) -> Option<ProposalStatus> {
        snapshot
            .proposals
            .get(&proposal_id(1))
            .map(|record| record.status)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let node = node();
        let indexer = indexer(&node, 5).await;
        let id = proposal_id(1);

        let notifications = Arc::new(AtomicUsize::new(0));
        indexer
            .on_snapshot(chain_id(), {
                let notifications = notifications.clone();
                move |_| {
                    notifications.fetch_add(1, Ordering::SeqCst);
                }
            })
            .expect("chain is registered");

        node.add_logs(chain_id(), [proposal_created_log(id, 105, 205, 100)]);
        node.set_head(chain_id(), 102);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(snapshot.as_of_block, 102);
        assert_eq!(status(&snapshot), Some(ProposalStatus::Pending));
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        node.set_head(chain_id(), 150);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Active));
        assert_eq!(notifications.load(Ordering::SeqCst), 2);

        node.add_logs(
            chain_id(),
            [
                vote_cast_log(id, Address::repeat_byte(3), 1, 10, 151, 0),
                vote_cast_log(id, Address::repeat_byte(4), 0, 2, 152, 0),
            ],
        );
        node.set_head(chain_id(), 210);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        let record = snapshot.proposals.get(&id).expect("proposal exists");
        assert_eq!(record.status, ProposalStatus::Succeeded);
        assert_eq!(
            (record.for_votes, record.against_votes),
            (U256::from(10), U256::from(2))
        );
        assert_eq!(record.reads.quorum, Some(U256::from(5)));
        assert_matches!(snapshot.permissions.get(&id), Some(p) if p.can_queue && !p.can_execute);

        let eta = timestamp(211) + 60;
        node.add_logs(chain_id(), [proposal_queued_log(id, eta, 211)]);
        node.set_head(chain_id(), 212);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        let record = snapshot.proposals.get(&id).expect("proposal exists");
        assert_eq!(record.status, ProposalStatus::Queued);
        assert_eq!(record.eta, Some(eta));
        assert_eq!(record.reads.execution_deadline, Some(eta + GRACE_PERIOD));
        assert_matches!(snapshot.permissions.get(&id), Some(p) if p.can_execute);

        node.add_logs(chain_id(), [proposal_executed_log(id, 220)]);
        node.set_head(chain_id(), 221);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Executed));

        node.set_head(chain_id(), 5_000);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Executed));

        let stats = indexer.get_stats(chain_id()).expect("chain is registered");
        assert_eq!(stats.unique_voters, 2);
        assert_eq!(
            stats.by_support.get(&Support::For).map(|stats| stats.weight),
            Some(U256::from(10))
        );
    }

    #[tokio::test]
    async fn test_queued_expires() {
        let node = node();
        let indexer = indexer(&node, 1_000).await;
        let id = proposal_id(1);

        // Realistic timelock: eta in Unix seconds, two weeks of grace.
        let eta = 1_700_000_000;
        let grace_period = 1_209_600;
        node.respond(
            TIMELOCK,
            call_data(abi::GRACE_PERIODCall {}),
            word(grace_period),
        );

        propose(&node, 10, 2);
        node.add_logs(chain_id(), [proposal_queued_log(id, eta, 211)]);
        node.set_head(chain_id(), 212);
        node.set_timestamp(chain_id(), 212, eta - 60);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Queued));
        assert_matches!(snapshot.permissions.get(&id), Some(p) if p.can_execute);

        // Far beyond the eta in blocks, but still within the grace period in time.
        node.set_head(chain_id(), 2_000);
        node.set_timestamp(chain_id(), 2_000, eta + grace_period - 1);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Queued));

        node.set_head(chain_id(), 2_001);
        node.set_timestamp(chain_id(), 2_001, eta + grace_period);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Expired));
        assert_matches!(snapshot.permissions.get(&id), Some(p) if !p.can_execute);

        // Expired is terminal.
        node.set_head(chain_id(), 2_628_211);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(status(&snapshot), Some(ProposalStatus::Expired));
    }

    #[tokio::test]
    async fn test_defeated_across_ticks() {
        let node = node();
        let indexer = indexer(&node, 100).await;
        let id = proposal_id(1);

        propose(&node, 2, 10);
        node.set_head(chain_id(), 210);
        indexer
            .start(chain_id(), Duration::from_millis(10))
            .expect("sync can be started");

        let snapshot = wait_for_block(&indexer, 210).await;
        assert_eq!(status(&snapshot), Some(ProposalStatus::Defeated));
        let defeated = snapshot.state_hash;

        for head in [300, 1_000] {
            node.set_head(chain_id(), head);
            let snapshot = wait_for_block(&indexer, head).await;
            assert_eq!(status(&snapshot), Some(ProposalStatus::Defeated));
            assert_eq!(snapshot.state_hash, defeated);
            assert_matches!(snapshot.permissions.get(&id), Some(p) if !p.can_queue);
        }

        indexer.stop(chain_id()).await.expect("sync can be stopped");
    }

    #[tokio::test]
    async fn test_unchanged_hash() {
        let node = node();
        let indexer = indexer(&node, 100).await;

        let notifications = Arc::new(AtomicUsize::new(0));
        indexer
            .on_snapshot(chain_id(), {
                let notifications = notifications.clone();
                move |_| {
                    notifications.fetch_add(1, Ordering::SeqCst);
                }
            })
            .expect("chain is registered");

        node.add_logs(chain_id(), [proposal_created_log(proposal_id(1), 105, 205, 100)]);
        node.set_head(chain_id(), 150);
        let first = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");

        node.set_head(chain_id(), 160);
        let second = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");

        assert_eq!(first.state_hash, second.state_hash);
        assert_eq!(second.as_of_block, 160);
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
        assert_matches!(
            indexer.latest_snapshot(chain_id()),
            Ok(Some(snapshot)) if snapshot.as_of_block == 160
        );

        // Head not advanced: nothing fetched.
        let requests = node.log_requests().len();
        let third = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(third.as_of_block, 160);
        assert_eq!(node.log_requests().len(), requests);
    }

    #[tokio::test]
    async fn test_failure_keeps_cursor() {
        let node = node();
        let indexer = GovernanceIndexer::new(config(100), node.clone());
        indexer
            .register_chain(chain_id(), contracts())
            .expect("chain can be registered");
        indexer
            .set_start_block(chain_id(), 990)
            .await
            .expect("chain is registered");

        node.set_head(chain_id(), 999);
        indexer.refresh_now(chain_id()).await.expect("refresh succeeds");

        node.add_logs(chain_id(), [proposal_created_log(proposal_id(1), 1_005, 1_100, 1_001)]);
        node.set_head(chain_id(), 1_010);
        node.fail_logs_at(Some(1_005));
        let result = indexer.refresh_now(chain_id()).await;
        assert_matches!(result, Err(ControlError::Sync(SyncError::Rpc("get logs", _))));
        assert_matches!(
            indexer.latest_snapshot(chain_id()),
            Ok(Some(snapshot)) if snapshot.as_of_block == 999 && snapshot.proposals.is_empty()
        );
        assert_eq!(indexer.phase(chain_id()).ok(), Some(SyncPhase::Idle));

        // Retry of the same range.
        node.fail_logs_at(None);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(snapshot.as_of_block, 1_010);
        assert_eq!(snapshot.proposals.len(), 1);
        assert_eq!(
            node.log_requests(),
            [(990, 999), (1_000, 1_010), (1_000, 1_010)]
        );

        // Cannot go back.
        let changed = indexer.set_start_block(chain_id(), 0).await;
        assert_matches!(changed, Ok(false));
    }

    #[tokio::test]
    async fn test_timeout() {
        let node = node();
        let mut config = config(100);
        config.rpc_timeout = Duration::from_millis(20);
        let indexer = GovernanceIndexer::new(config, node.clone());
        indexer
            .register_chain(chain_id(), contracts())
            .expect("chain can be registered");

        node.set_head(chain_id(), 100);
        node.set_delay(Duration::from_millis(200));
        let result = indexer.refresh_now(chain_id()).await;
        assert_matches!(
            result,
            Err(ControlError::Sync(SyncError::Timeout("get block number", _)))
        );
    }

    #[tokio::test]
    async fn test_decode_error_and_merge_conflict() {
        let node = node();
        let indexer = indexer(&node, 100).await;
        let id = proposal_id(1);

        // Invalid support: skipped.
        let invalid_vote = vote_cast_log(id, Address::repeat_byte(3), 7, 10, 151, 1);
        node.add_logs(
            chain_id(),
            [proposal_created_log(id, 105, 205, 100), invalid_vote],
        );
        node.set_head(chain_id(), 160);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert_eq!(snapshot.proposals.len(), 1);
        assert!(snapshot.votes.is_empty());

        // Same dedup key, different content.
        node.add_logs(
            chain_id(),
            [
                vote_cast_log(id, Address::repeat_byte(3), 1, 10, 170, 0),
                vote_cast_log(id, Address::repeat_byte(3), 0, 10, 170, 0),
            ],
        );
        node.set_head(chain_id(), 180);
        let result = indexer.refresh_now(chain_id()).await;
        assert_matches!(result, Err(ControlError::Sync(error)) if error.is_fatal());
        assert_matches!(
            indexer.latest_snapshot(chain_id()),
            Ok(Some(snapshot)) if snapshot.as_of_block == 160
        );
    }

    #[tokio::test]
    async fn test_unknown_topics_ignored() {
        let node = node();
        let indexer = indexer(&node, 100).await;

        node.add_logs(
            chain_id(),
            [log(
                vec![keccak256("Transfer(address,address,uint256)")],
                Bytes::from(vec![0; 32]),
                95,
                0,
            )],
        );
        node.set_head(chain_id(), 100);
        let snapshot = indexer.refresh_now(chain_id()).await.expect("refresh succeeds");
        assert!(snapshot.proposals.is_empty());
        assert_eq!(indexer.get_stats(chain_id()).map(|s| s.unique_voters), Ok(0));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let node = node();
        let indexer = indexer(&node, 100).await;

        let notifications = Arc::new(AtomicUsize::new(0));
        indexer
            .on_snapshot(chain_id(), {
                let notifications = notifications.clone();
                move |_| {
                    notifications.fetch_add(1, Ordering::SeqCst);
                }
            })
            .expect("chain is registered");

        node.add_logs(chain_id(), [proposal_created_log(proposal_id(1), 105, 205, 100)]);
        node.set_head(chain_id(), 150);

        indexer
            .start(chain_id(), Duration::from_millis(10))
            .expect("sync can be started");
        assert_matches!(
            indexer.start(chain_id(), Duration::from_millis(10)),
            Err(ControlError::AlreadyStarted(_))
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while notifications.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("snapshot is published");

        indexer.stop(chain_id()).await.expect("sync can be stopped");
        assert_eq!(indexer.phase(chain_id()).ok(), Some(SyncPhase::Idle));

        // No more cycles after stop.
        let requests = node.log_requests().len();
        node.set_head(chain_id(), 170);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.log_requests().len(), requests);

        // Can be restarted.
        indexer
            .start(chain_id(), Duration::from_millis(10))
            .expect("sync can be restarted");
        indexer.stop(chain_id()).await.expect("sync can be stopped");
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let node = node();
        let indexer = GovernanceIndexer::new(config(100), node);
        let unknown = ChainId::new(42).expect("chain ID is valid");

        assert_matches!(
            indexer.start(unknown, Duration::from_millis(10)),
            Err(ControlError::UnknownChain(UnknownChainError(id))) if id == unknown
        );
        assert_matches!(
            indexer.stop(unknown).await,
            Err(ControlError::UnknownChain(_))
        );
        assert_matches!(
            indexer.refresh_now(unknown).await,
            Err(ControlError::UnknownChain(_))
        );
        assert_matches!(indexer.get_stats(unknown), Err(UnknownChainError(_)));

        // Registered, but without multicall contract.
        let contracts = ChainContracts {
            multicall: None,
            ..contracts()
        };
        indexer
            .register_chain(chain_id(), contracts)
            .expect("chain can be registered");
        assert_matches!(
            indexer.start(chain_id(), Duration::from_millis(10)),
            Err(ControlError::UnknownChain(UnknownChainError(id))) if id == chain_id()
        );
        assert_matches!(indexer.is_running(chain_id()), Ok(false));
        assert_matches!(
            indexer.refresh_now(chain_id()).await,
            Err(ControlError::UnknownChain(_))
        );
    }

    #[tokio::test]
    async fn test_fatal_error_stops_sync() {
        let node = node();
        let indexer = indexer(&node, 100).await;

        node.add_logs(chain_id(), [proposal_created_log(proposal_id(1), 105, 205, 100)]);
        node.set_head(chain_id(), 150);
        indexer
            .start(chain_id(), Duration::from_millis(10))
            .expect("sync can be started");
        wait_for_block(&indexer, 150).await;
        assert_matches!(indexer.is_running(chain_id()), Ok(true));

        // Re-registering without multicall contract is not recoverable by retrying.
        let contracts = ChainContracts {
            multicall: None,
            ..contracts()
        };
        indexer
            .register_chain(chain_id(), contracts)
            .expect("chain can be registered");
        node.set_head(chain_id(), 160);

        tokio::time::timeout(Duration::from_secs(5), async {
            while indexer.is_running(chain_id()).expect("chain is registered") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("sync stops");

        // Not stuck as already started.
        indexer
            .register_multicall(chain_id(), MULTICALL)
            .expect("multicall can be registered");
        indexer
            .start(chain_id(), Duration::from_millis(10))
            .expect("sync can be restarted");
        let snapshot = wait_for_block(&indexer, 160).await;
        assert_eq!(snapshot.proposals.len(), 1);
        indexer.stop(chain_id()).await.expect("sync can be stopped");
    }
}
