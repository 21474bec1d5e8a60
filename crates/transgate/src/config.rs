// Transgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Configuration and dispatch metrics for the transcoding bridge

use serde::Serialize;
use std::env;

/// Configuration for the transcoding bridge
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Request timeout in seconds, applied by the HTTP glue
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Response buffer size above which the write side reports its queue
    /// as full
    pub write_high_water_mark: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_size: 10 * 1024 * 1024, // 10MB
            write_high_water_mark: 1024 * 1024,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("TRANSGATE_BIND_ADDRESS").unwrap_or(defaults.bind_address),

            request_timeout_secs: env::var("TRANSGATE_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_secs),

            max_body_size: env::var("TRANSGATE_MAX_BODY_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_body_size),

            write_high_water_mark: env::var("TRANSGATE_WRITE_HIGH_WATER_MARK")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.write_high_water_mark),
        }
    }
}

/// Dispatch metrics for the bridge
#[derive(Debug, Default, Clone, Serialize)]
pub struct BridgeMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_latency_ms: f64,
}

impl BridgeMetrics {
    /// Record one dispatched request and fold its latency into the
    /// rolling average
    pub fn record(&mut self, success: bool, latency_ms: f64) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        let total = self.total_requests.max(1);
        self.avg_latency_ms = (self.avg_latency_ms * (total - 1) as f64 + latency_ms) / total as f64;
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }
}
