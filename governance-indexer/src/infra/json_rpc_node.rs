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
    CallOutcome, LogFilter, MulticallCall, Node, RawLog, decode_try_aggregate,
    encode_try_aggregate,
};
use alloy_json_rpc::{ErrorPayload, Id, Request, Response, ResponsePayload, RpcSend};
use alloy_primitives::U64;
use alloy_rpc_types_eth::{
    Block, BlockId, BlockNumberOrTag, Filter, Log, TransactionInput, TransactionRequest,
};
use fastrace::trace;
use governance_common::domain::{Address, BlockNumber, Bytes, ChainId, Timestamp};
use log::debug;
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;

const NO_PARAMS: [(); 0] = [];

/// Config for the JSON-RPC endpoints of the chains.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub chain_id: ChainId,

    /// May contain an API key.
    pub url: SecretString,
}

/// A [Node] implementation based on Ethereum JSON-RPC over HTTP.
#[derive(Clone)]
pub struct JsonRpcNode {
    http: HttpClient,
    urls: Arc<HashMap<ChainId, SecretString>>,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcNode {
    /// Create a new [JsonRpcNode] with the given [Config].
    pub fn new(config: Config) -> Result<Self, JsonRpcNodeError> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(JsonRpcNodeError::Client)?;

        let urls = config
            .endpoints
            .into_iter()
            .map(|endpoint| (endpoint.chain_id, endpoint.url))
            .collect::<HashMap<_, _>>();

        Ok(Self {
            http,
            urls: Arc::new(urls),
            next_id: Arc::default(),
        })
    }

    async fn request<P, T>(
        &self,
        chain_id: ChainId,
        method: &'static str,
        params: P,
    ) -> Result<T, JsonRpcNodeError>
    where
        P: RpcSend,
        T: DeserializeOwned,
    {
        let url = self
            .urls
            .get(&chain_id)
            .ok_or(JsonRpcNodeError::UnknownChain(chain_id))?;

        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = Request::new(method, id, params);

        let response = self
            .http
            .post(url.expose_secret())
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| JsonRpcNodeError::Http(method, error))?
            .json::<Response<T>>()
            .await
            .map_err(|error| JsonRpcNodeError::Http(method, error))?;

        match response.payload {
            ResponsePayload::Success(result) => Ok(result),

            ResponsePayload::Failure(ErrorPayload { code, message, .. }) => {
                Err(JsonRpcNodeError::Rpc {
                    method,
                    code,
                    message: message.into_owned(),
                })
            }
        }
    }
}

impl Node for JsonRpcNode {
    type Error = JsonRpcNodeError;

    #[trace]
    async fn block_number(&self, chain_id: ChainId) -> Result<BlockNumber, Self::Error> {
        let block_number = self
            .request::<_, U64>(chain_id, "eth_blockNumber", NO_PARAMS)
            .await?;

        Ok(block_number.to())
    }

    #[trace]
    async fn block_timestamp(
        &self,
        chain_id: ChainId,
        block: BlockNumber,
    ) -> Result<Timestamp, Self::Error> {
        let params = (BlockNumberOrTag::Number(block), false);
        let block = self
            .request::<_, Option<Block>>(chain_id, "eth_getBlockByNumber", params)
            .await?
            .ok_or(JsonRpcNodeError::MissingBlock(block))?;

        Ok(block.header.timestamp)
    }

    #[trace]
    async fn get_logs(
        &self,
        chain_id: ChainId,
        filter: &LogFilter,
    ) -> Result<Vec<RawLog>, Self::Error> {
        let logs = self
            .request::<_, Vec<Log>>(chain_id, "eth_getLogs", (log_filter(filter),))
            .await?;
        let total = logs.len();

        let mut logs = logs
            .into_iter()
            .filter(|log| !log.removed)
            .map(RawLog::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        if logs.len() < total {
            debug!(chain_id:%, removed = total - logs.len(); "skipped removed logs");
        }

        Ok(logs)
    }

    #[trace]
    async fn multicall(
        &self,
        chain_id: ChainId,
        multicall: Address,
        calls: &[MulticallCall],
        block: Option<BlockNumber>,
    ) -> Result<Vec<CallOutcome>, Self::Error> {
        let block = block.map(BlockId::number).unwrap_or_else(BlockId::latest);
        let call = TransactionRequest::default()
            .to(multicall)
            .input(TransactionInput::new(encode_try_aggregate(calls)));

        let data = self
            .request::<_, Bytes>(chain_id, "eth_call", (call, block))
            .await?;
        let outcomes = decode_try_aggregate(&data)?;

        Ok(outcomes)
    }
}

fn log_filter(filter: &LogFilter) -> Filter {
    Filter::new()
        .from_block(filter.from_block)
        .to_block(filter.to_block)
        .address(filter.addresses.clone())
        .event_signature(filter.topics.clone())
}

impl TryFrom<Log> for RawLog {
    type Error = JsonRpcNodeError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let (Some(block_number), Some(transaction_hash), Some(log_index)) =
            (log.block_number, log.transaction_hash, log.log_index)
        else {
            return Err(JsonRpcNodeError::IncompleteLog);
        };

        let log = log.inner;

        Ok(Self {
            address: log.address,
            topics: log.data.topics().to_vec(),
            data: log.data.data,
            block_number,
            transaction_hash,
            log_index,
        })
    }
}

#[derive(Debug, Error)]
pub enum JsonRpcNodeError {
    #[error("no endpoint configured for chain {0}")]
    UnknownChain(ChainId),

    #[error("cannot create HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("cannot make {0} request")]
    Http(&'static str, #[source] reqwest::Error),

    #[error("{method} request failed with code {code}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },

    #[error("block {0} not found")]
    MissingBlock(BlockNumber),

    #[error("log without block number, transaction hash or log index")]
    IncompleteLog,

    #[error("cannot decode multicall return data")]
    Abi(#[from] alloy_sol_types::Error),
}
