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


//! Solidity interfaces of the governance contracts and the multicall aggregator.

use alloy_sol_types::sol;

sol! {
    event ProposalCreated(
        uint256 proposalId,
        address proposer,
        address[] targets,
        uint256[] values,
        string[] signatures,
        bytes[] calldatas,
        uint256 voteStart,
        uint256 voteEnd,
        string description
    );

    event VoteCast(
        address indexed voter,
        uint256 proposalId,
        uint8 support,
        uint256 weight,
        string reason
    );

    event ProposalQueued(uint256 proposalId, uint256 etaSeconds);

    event ProposalExecuted(uint256 proposalId);

    event ProposalCanceled(uint256 proposalId);

    /// Default comment event; the signature of the deployed comments contract is configurable,
    /// the data layout is not.
    event ProposalComment(uint256 proposalId, address author, string body);

    event DelegateVotesChanged(
        address indexed delegate,
        uint256 previousVotes,
        uint256 newVotes
    );

    function quorum(uint256 timepoint) external view returns (uint256);

    function proposalEta(uint256 proposalId) external view returns (uint256);

    function proposalThreshold() external view returns (uint256);

    function getVotes(address account, uint256 timepoint) external view returns (uint256);

    function GRACE_PERIOD() external view returns (uint256);

    function hasRole(bytes32 role, address account) external view returns (bool);

    struct AggregateCall {
        address target;
        bytes callData;
    }

    struct AggregateResult {
        bool success;
        bytes returnData;
    }

    function tryAggregate(bool requireSuccess, AggregateCall[] calls)
        external
        returns (AggregateResult[] returnData);
}
