// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Proof-of-Cloud attestation verification gateway

use std::path::Path;

use anyhow::Result;
use attestation_gateway::{
    config::{Cli, GatewayConfig},
    ApiServer,
};
use clap::Parser;
use log::{debug, info};

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(config_file) => {
            info!("Using config file {config_file}");
            GatewayConfig::try_from(Path::new(config_file))?
        }
        None => {
            info!("No config file given, using built-in defaults");
            GatewayConfig::default()
        }
    };

    if let Some(port) = cli.port {
        config = config.with_port(port);
    }

    debug!("Config: {:#?}", config);

    let api_server = ApiServer::new(config)?;

    api_server.serve().await?;
    Ok(())
}
