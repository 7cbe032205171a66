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

//! Planning and interpretation of the contract reads refreshing volatile fields.

use crate::domain::{
    Call, CallOutcome, ChainContracts, OperatorRoles, ProposalId, ProposalRecord, ReadFields, abi,
};
use alloy_sol_types::{SolCall, SolValue};
use governance_common::domain::{
    Address, B256, BlockNumber, Bytes, ChainId, Timestamp, U256, keccak256,
};
use std::collections::BTreeMap;

pub const PROPOSER_ROLE: &str = "PROPOSER_ROLE";
pub const EXECUTOR_ROLE: &str = "EXECUTOR_ROLE";
pub const CANCELLER_ROLE: &str = "CANCELLER_ROLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Quorum(ProposalId),
    Eta(ProposalId),
    GracePeriod,
    HasRole(Role),
    Votes,
    ProposalThreshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Proposer,
    Executor,
    Canceller,
}

/// A set of calls along with what each of them reads.
#[derive(Debug, Clone, Default)]
pub struct ReadPlan {
    calls: Vec<Call>,
    slots: Vec<Slot>,
    proposals: Vec<(ProposalId, Option<Timestamp>)>,
}

impl ReadPlan {
    /// Reads for the given (non-terminal) proposals at the given head: quorum at the start of
    /// the voting period (or the latest past block if the voting period has not started yet),
    /// the eta and the timelock grace period for the execution deadline.
    pub fn proposals<'a>(
        chain_id: ChainId,
        contracts: &ChainContracts,
        proposals: impl IntoIterator<Item = &'a ProposalRecord>,
        head: BlockNumber,
    ) -> Self {
        let mut plan = Self::default();

        let Some(governance) = contracts.governance else {
            return plan;
        };

        for record in proposals {
            let timepoint = record.start_block.min(head.saturating_sub(1));
            plan.push(
                chain_id,
                governance,
                abi::quorumCall {
                    timepoint: U256::from(timepoint),
                }
                .abi_encode(),
                Slot::Quorum(record.id),
            );
            plan.push(
                chain_id,
                governance,
                abi::proposalEtaCall {
                    proposalId: record.id,
                }
                .abi_encode(),
                Slot::Eta(record.id),
            );
            plan.proposals.push((record.id, record.eta));
        }

        if let Some(timelock) = contracts.timelock.filter(|_| !plan.proposals.is_empty()) {
            plan.push(
                chain_id,
                timelock,
                abi::GRACE_PERIODCall {}.abi_encode(),
                Slot::GracePeriod,
            );
        }

        plan
    }

    /// Reads for the on-chain roles and voting weight of the given operator at the given head.
    pub fn operator(
        chain_id: ChainId,
        contracts: &ChainContracts,
        operator: Address,
        head: BlockNumber,
    ) -> Self {
        let mut plan = Self::default();

        if let Some(timelock) = contracts.timelock {
            let roles = [
                (PROPOSER_ROLE, Role::Proposer),
                (EXECUTOR_ROLE, Role::Executor),
                (CANCELLER_ROLE, Role::Canceller),
            ];

            for (name, role) in roles {
                plan.push(
                    chain_id,
                    timelock,
                    abi::hasRoleCall {
                        role: role_id(name),
                        account: operator,
                    }
                    .abi_encode(),
                    Slot::HasRole(role),
                );
            }
        }

        if let Some(governance) = contracts.governance {
            plan.push(
                chain_id,
                governance,
                abi::getVotesCall {
                    account: operator,
                    timepoint: U256::from(head.saturating_sub(1)),
                }
                .abi_encode(),
                Slot::Votes,
            );
            plan.push(
                chain_id,
                governance,
                abi::proposalThresholdCall {}.abi_encode(),
                Slot::ProposalThreshold,
            );
        }

        plan
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Read-derived fields per proposal from the outcomes of the calls of this plan. Reverted
    /// or undecodable reads leave the respective field unknown; the eta falls back to the one
    /// from the `ProposalQueued` event.
    pub fn proposal_reads(
        &self,
        outcomes: &[CallOutcome],
        as_of_block: BlockNumber,
    ) -> BTreeMap<ProposalId, ReadFields> {
        let mut quorums = BTreeMap::new();
        let mut etas = BTreeMap::new();
        let mut grace_period = None;

        for (slot, outcome) in self.slots.iter().zip(outcomes) {
            let Some(data) = outcome.success() else {
                continue;
            };

            match slot {
                Slot::Quorum(id) => {
                    if let Some(quorum) = decode_uint(data) {
                        quorums.insert(*id, quorum);
                    }
                }

                // Zero means not queued.
                Slot::Eta(id) => {
                    if let Some(eta) = decode_timestamp(data) {
                        etas.insert(*id, Some(eta).filter(|&eta| eta > 0));
                    }
                }

                Slot::GracePeriod => grace_period = decode_timestamp(data),

                _ => {}
            }
        }

        self.proposals
            .iter()
            .map(|(id, event_eta)| {
                let eta = etas.get(id).copied().flatten().or(*event_eta);
                let execution_deadline = eta
                    .zip(grace_period)
                    .map(|(eta, grace_period)| eta.saturating_add(grace_period));

                let reads = ReadFields {
                    quorum: quorums.get(id).copied(),
                    execution_deadline,
                    as_of_block,
                };
                (*id, reads)
            })
            .collect()
    }

    /// Operator roles from the outcomes of the calls of this plan. Unknown roles count as not
    /// granted.
    pub fn operator_roles(&self, outcomes: &[CallOutcome]) -> OperatorRoles {
        let mut roles = OperatorRoles::default();

        for (slot, outcome) in self.slots.iter().zip(outcomes) {
            let Some(data) = outcome.success() else {
                continue;
            };

            match slot {
                Slot::HasRole(role) => {
                    let granted = bool::abi_decode(data).unwrap_or_default();
                    match role {
                        Role::Proposer => roles.proposer = granted,
                        Role::Executor => roles.executor = granted,
                        Role::Canceller => roles.canceller = granted,
                    }
                }

                Slot::Votes => roles.votes = decode_uint(data).unwrap_or_default(),

                Slot::ProposalThreshold => roles.proposal_threshold = decode_uint(data),

                _ => {}
            }
        }

        roles
    }

    fn push(&mut self, chain_id: ChainId, target: Address, data: Vec<u8>, slot: Slot) {
        self.calls.push(Call {
            chain_id,
            target,
            data: Bytes::from(data),
        });
        self.slots.push(slot);
    }
}

/// Role id as used by `AccessControl`, i.e. the Keccak-256 of the role name.
pub fn role_id(name: &str) -> B256 {
    keccak256(name)
}

fn decode_uint(data: &[u8]) -> Option<U256> {
    U256::abi_decode(data).ok()
}

/// Timestamps and durations beyond 64 bits are treated like undecodable reads.
fn decode_timestamp(data: &[u8]) -> Option<Timestamp> {
    decode_uint(data).and_then(|value| u64::try_from(value).ok())
}

#[cfg(test)]
mod tests {
    use crate::domain::{
        CallOutcome, ChainContracts, OperatorRoles, ProposalRecord, ProposalStatus, ReadFields,
        ReadPlan, abi, role_id,
        testing::proposal_id,
    };
    use alloy_sol_types::{SolCall, SolValue};
    use governance_common::domain::{Address, B256, Bytes, ChainId, U256};

    fn contracts() -> ChainContracts {
        ChainContracts {
            governance: Some(Address::repeat_byte(1)),
            timelock: Some(Address::repeat_byte(2)),
            ..Default::default()
        }
    }

    fn record(n: u8, start_block: u64, eta: Option<u64>) -> ProposalRecord {
        ProposalRecord {
            id: proposal_id(n),
            proposer: Address::repeat_byte(9),
            targets: vec![],
            values: vec![],
            signatures: vec![],
            calldatas: vec![],
            description: String::new(),
            description_hash: B256::ZERO,
            block_number: 100,
            start_block,
            end_block: start_block + 100,
            transaction_hash: B256::ZERO,
            status: ProposalStatus::Active,
            for_votes: U256::ZERO,
            against_votes: U256::ZERO,
            abstain_votes: U256::ZERO,
            queued_at: eta.map(|_| 211),
            eta,
            executed_at: None,
            canceled_at: None,
            reads: ReadFields::default(),
        }
    }

    fn word(n: u64) -> CallOutcome {
        CallOutcome::Success(U256::from(n).abi_encode().into())
    }

    fn reverted() -> CallOutcome {
        CallOutcome::Reverted(Bytes::new())
    }

    #[test]
    fn test_role_id() {
        assert_eq!(
            role_id("PROPOSER_ROLE").to_string(),
            "0xb09aa5aeb3702cfd50b6b62bc4532604938f21248a27a1d5ca736082b6819cc1"
        );
    }

    #[test]
    fn test_proposal_reads() {
        let chain_id = ChainId::new(1).expect("chain ID is valid");
        let records = [
            record(1, 105, None),
            record(2, 305, Some(1_700_000_500)),
        ];

        let plan = ReadPlan::proposals(chain_id, &contracts(), &records, 210);
        // Quorum and eta per proposal, grace period once.
        assert_eq!(plan.calls().len(), 5);

        // Quorum at the start of the voting period, or at the latest past block.
        let quorum_at = |timepoint: u64| {
            Bytes::from(
                abi::quorumCall {
                    timepoint: U256::from(timepoint),
                }
                .abi_encode(),
            )
        };
        assert_eq!(plan.calls()[0].data, quorum_at(105));
        assert_eq!(plan.calls()[2].data, quorum_at(209));
        assert_eq!(plan.calls()[4].target, Address::repeat_byte(2));

        let outcomes = [
            word(10),
            word(1_700_000_700),
            word(20),
            reverted(),
            word(1_209_600),
        ];
        let reads = plan.proposal_reads(&outcomes, 210);

        assert_eq!(
            reads.get(&proposal_id(1)),
            Some(&ReadFields {
                quorum: Some(U256::from(10)),
                execution_deadline: Some(1_700_000_700 + 1_209_600),
                as_of_block: 210
            })
        );
        // Eta read reverted, fall back to the event.
        assert_eq!(
            reads.get(&proposal_id(2)),
            Some(&ReadFields {
                quorum: Some(U256::from(20)),
                execution_deadline: Some(1_700_000_500 + 1_209_600),
                as_of_block: 210
            })
        );
    }

    #[test]
    fn test_proposal_reads_without_grace_period() {
        let chain_id = ChainId::new(1).expect("chain ID is valid");
        let records = [record(1, 105, None)];

        let plan = ReadPlan::proposals(chain_id, &contracts(), &records, 210);
        let reads = plan.proposal_reads(&[word(10), word(0), reverted()], 210);

        assert_eq!(
            reads.get(&proposal_id(1)),
            Some(&ReadFields {
                quorum: Some(U256::from(10)),
                execution_deadline: None,
                as_of_block: 210
            })
        );

        // Nothing to read without proposals.
        let none: [ProposalRecord; 0] = [];
        let plan = ReadPlan::proposals(chain_id, &contracts(), &none, 210);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_full_width_quorum() {
        let chain_id = ChainId::new(1).expect("chain ID is valid");
        let records = [record(1, 105, None)];
        let plan = ReadPlan::proposals(chain_id, &contracts(), &records, 210);

        let quorum = U256::from(u128::MAX) * U256::from(1_000);
        let outcomes = [
            CallOutcome::Success(quorum.abi_encode().into()),
            reverted(),
            word(1_209_600),
        ];
        let reads = plan.proposal_reads(&outcomes, 210);
        assert_eq!(reads.get(&proposal_id(1)).and_then(|r| r.quorum), Some(quorum));
    }

    #[test]
    fn test_operator_roles() {
        let chain_id = ChainId::new(1).expect("chain ID is valid");
        let plan = ReadPlan::operator(chain_id, &contracts(), Address::repeat_byte(7), 210);
        assert_eq!(plan.calls().len(), 5);

        let outcomes = [word(1), word(0), reverted(), word(100), word(50)];
        assert_eq!(
            plan.operator_roles(&outcomes),
            OperatorRoles {
                proposer: true,
                executor: false,
                canceller: false,
                votes: U256::from(100),
                proposal_threshold: Some(U256::from(50)),
            }
        );

        // Without timelock no roles are read.
        let contracts = ChainContracts {
            governance: Some(Address::repeat_byte(1)),
            ..Default::default()
        };
        let plan = ReadPlan::operator(chain_id, &contracts, Address::repeat_byte(7), 210);
        assert_eq!(plan.calls().len(), 2);
    }
}
