// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! External verification services the gateway forwards to.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::{config::CollaboratorConfig, dispatch::DispatchError};

const GATEWAY_USER_AGENT: &str = "Proof-of-Cloud-verifiers";

/// Interface for remote verifiers.
///
/// A collaborator receives the normalized request body and returns the JSON
/// it answered with. It never interprets the verdict.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Whether calls can succeed at all. An unavailable collaborator is
    /// never dispatched to.
    fn is_available(&self) -> bool {
        true
    }

    async fn verify(&self, body: &Value) -> Result<Value, DispatchError>;
}

/// A verifier reached with a single JSON `POST`.
pub struct HttpCollaborator {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpCollaborator {
    pub fn new(name: &str, config: &CollaboratorConfig, timeout: Duration) -> anyhow::Result<Self> {
        let user_agent = format!(
            "{GATEWAY_USER_AGENT} {}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .with_context(|| format!("Failed to build HTTP client for {name}"))?;

        Ok(Self {
            name: name.to_string(),
            url: config.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(&self, body: &Value) -> Result<Value, DispatchError> {
        info!("POST {} verification request ...", self.name);
        debug!("{} URL: {:?}", self.name, &self.url);

        let resp = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|source| DispatchError::Unreachable {
                collaborator: self.name.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                collaborator: self.name.clone(),
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| DispatchError::MalformedResponse {
                collaborator: self.name.clone(),
                source: e.into(),
            })
    }
}

/// A dispatch target that is known but has no backing verifier yet.
pub struct Unavailable {
    name: String,
}

impl Unavailable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Collaborator for Unavailable {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn verify(&self, _body: &Value) -> Result<Value, DispatchError> {
        Err(DispatchError::NotImplemented {
            target: self.name.clone(),
        })
    }
}
