// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::Path;

use anyhow::anyhow;
use clap::Parser;
use config::{Config, File};
use serde::Deserialize;

use crate::classify::ProtocolVariant;

const DEFAULT_SOCKET: &str = "0.0.0.0:3000";
const DEFAULT_PAYLOAD_REQUEST_SIZE: u32 = 2;
const DEFAULT_PROTOCOL: &str = "field_inference";

/// Seconds to wait for a verifier before giving up.
pub const DEFAULT_TIMEOUT: u64 = 30;

pub const DEFAULT_INTEL_DCAP_URL: &str =
    "https://cloud-api.phala.network/proofofcloud/attestations/verify";
pub const DEFAULT_AMD_SEV_MEASUREMENT_URL: &str =
    "https://nilcc-verifier.nillion.network/v1/attestations/verify";
pub const DEFAULT_AMD_SEV_REPORT_URL: &str =
    "https://nilcc-verifier.nillion.network/v1/attestations/verify-amd";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Socket addresses (IP:port) to listen on, e.g. 0.0.0.0:3000.
    pub sockets: Vec<SocketAddr>,

    /// Request payload size in MB
    pub payload_request_size: u32,
}

impl HttpServerConfig {
    /// Request payload limit in bytes.
    pub fn payload_limit(&self) -> usize {
        (self.payload_request_size as usize).saturating_mul(1024 * 1024)
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            sockets: vec![DEFAULT_SOCKET.parse().expect("unexpected parse error")],
            payload_request_size: DEFAULT_PAYLOAD_REQUEST_SIZE,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CollaboratorConfig {
    pub url: String,
}

impl CollaboratorConfig {
    fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifiersConfig {
    /// Timeout in seconds applied to every outbound verification call.
    pub timeout: u64,

    /// Intel DCAP (TDX/SGX) quote verifier.
    pub intel_dcap: CollaboratorConfig,

    /// AMD SEV-SNP verifier taking the four measurement fields.
    pub amd_sev_measurement: CollaboratorConfig,

    /// AMD SEV-SNP verifier taking a raw report.
    pub amd_sev_report: CollaboratorConfig,
}

impl Default for VerifiersConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            intel_dcap: CollaboratorConfig::with_url(DEFAULT_INTEL_DCAP_URL),
            amd_sev_measurement: CollaboratorConfig::with_url(DEFAULT_AMD_SEV_MEASUREMENT_URL),
            amd_sev_report: CollaboratorConfig::with_url(DEFAULT_AMD_SEV_REPORT_URL),
        }
    }
}

/// Contains all configurable gateway properties.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Which revision of the verification protocol `/attestations/verify` speaks.
    pub protocol: ProtocolVariant,

    /// Configuration for the gateway HTTP server
    pub http_server: HttpServerConfig,

    /// Remote verification services.
    pub verifiers: VerifiersConfig,

    /// Hardware ids reported as verified by `/hardware_id/{id}`.
    pub hardware_ids: Vec<String>,
}

impl GatewayConfig {
    /// Listen on all interfaces at `port` instead of the configured sockets.
    pub fn with_port(mut self, port: u16) -> Self {
        self.http_server.sockets = vec![SocketAddr::from(([0, 0, 0, 0], port))];
        self
    }
}

impl TryFrom<&Path> for GatewayConfig {
    type Error = anyhow::Error;

    /// Load `Config` from a configuration file. Supported formats are all formats supported by the
    /// `config` crate. See `GatewayConfig` for schema information.
    fn try_from(config_path: &Path) -> Result<Self, Self::Error> {
        let c = Config::builder()
            .set_default("protocol", DEFAULT_PROTOCOL)?
            .set_default("http_server.sockets", vec![DEFAULT_SOCKET])?
            .set_default(
                "http_server.payload_request_size",
                DEFAULT_PAYLOAD_REQUEST_SIZE,
            )?
            .set_default("verifiers.timeout", DEFAULT_TIMEOUT)?
            .set_default("verifiers.intel_dcap.url", DEFAULT_INTEL_DCAP_URL)?
            .set_default(
                "verifiers.amd_sev_measurement.url",
                DEFAULT_AMD_SEV_MEASUREMENT_URL,
            )?
            .set_default("verifiers.amd_sev_report.url", DEFAULT_AMD_SEV_REPORT_URL)?
            .set_default("hardware_ids", Vec::<&str>::new())?
            .add_source(File::from(config_path))
            .build()?;

        c.try_deserialize()
            .map_err(|e| anyhow!("invalid config: {}", e))
    }
}

/// Gateway command-line arguments.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a gateway config file. Supported formats: TOML, YAML, JSON and possibly other
    /// formats supported by the `config` crate. Built-in defaults are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG_FILE")]
    pub config_file: Option<String>,

    /// Port to listen on, on all interfaces. Overrides `http_server.sockets`.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,
}
