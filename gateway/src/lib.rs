// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Proof-of-Cloud attestation verification gateway

/// Gateway config
pub mod config;
pub use config::GatewayConfig;

/// Classification and validation of inbound requests
pub mod classify;

pub mod collaborator;
pub mod dispatch;
pub mod hardware;

pub mod api_server;
pub use api_server::ApiServer;

pub mod error;
pub use error::*;

mod prometheus;
