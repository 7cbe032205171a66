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

use fastrace::collector::{Config as CollectorConfig, ConsoleReporter};
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "tracing")]
    pub tracing_config: TracingConfig,

    #[serde(rename = "metrics")]
    pub metrics_config: MetricsConfig,
}

/// Tracing configuration: spans are reported to the console if enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    pub enabled: bool,
}

/// Metrics configuration: a Prometheus scrape endpoint is exposed if enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: IpAddr,
    pub port: u16,
}

/// Initialize logging; the level is taken from `RUST_LOG`, defaulting to info.
pub fn init_logging() {
    logforth::starter_log::stdout().apply();
}

/// Initialize tracing, if enabled.
pub fn init_tracing(config: TracingConfig) {
    if config.enabled {
        fastrace::set_reporter(ConsoleReporter, CollectorConfig::default());
        info!("tracing enabled");
    }
}

/// Initialize metrics, if enabled. Must be called from within a Tokio runtime.
pub fn init_metrics(config: MetricsConfig) {
    let MetricsConfig {
        enabled,
        address,
        port,
    } = config;

    if enabled {
        let address = SocketAddr::new(address, port);
        match PrometheusBuilder::new().with_http_listener(address).install() {
            Ok(()) => info!(address:%; "metrics enabled"),
            Err(error) => warn!(error:%; "cannot install Prometheus exporter"),
        }
    }
}

/// Flush pending spans; call before the process exits.
pub fn shutdown() {
    fastrace::flush();
}
