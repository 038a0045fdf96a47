// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Dispatch of validated requests to the external verifiers, and shaping of
//! their answers into the uniform response envelope.

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::{
    classify::NormalizedRequest,
    collaborator::{Collaborator, HttpCollaborator, Unavailable},
    config::VerifiersConfig,
    prometheus::{DISPATCH_DURATION, DISPATCH_FAILURES, DISPATCH_TOTAL},
};

pub const TEE_AMD_SEV_SNP: &str = "TEE_AMD_SEV_SNP";

const CHIP_ID_FIELD: &str = "chip_id";

/// Collaborator failures. The snake_case variant name labels the failure
/// metrics.
#[derive(Error, AsRefStr, Debug)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchError {
    #[error("{collaborator} API error: {status} {reason}")]
    Rejected {
        collaborator: String,
        status: u16,
        reason: String,
    },

    #[error("{collaborator} API unreachable: {source}")]
    Unreachable {
        collaborator: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{collaborator} API returned a malformed response")]
    MalformedResponse {
        collaborator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{target} verification not implemented")]
    NotImplemented { target: String },
}

/// Where a normalized request is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchTarget {
    IntelDcap,
    AmdSevMeasurement,
    AmdSevReport,
    AwsNitro,
}

/// How a collaborator's answer becomes an [`AttestationResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    /// The collaborator already answers with the envelope.
    PassThrough,

    /// The collaborator answers with partial data and the gateway fills in
    /// the structural fields for the given TEE type.
    Synthesized { tee_type: &'static str },
}

impl DispatchTarget {
    pub fn shape(self) -> ResponseShape {
        match self {
            DispatchTarget::AmdSevReport => ResponseShape::Synthesized {
                tee_type: TEE_AMD_SEV_SNP,
            },
            DispatchTarget::IntelDcap
            | DispatchTarget::AmdSevMeasurement
            | DispatchTarget::AwsNitro => ResponseShape::PassThrough,
        }
    }
}

impl NormalizedRequest {
    pub fn target(&self) -> DispatchTarget {
        match self {
            NormalizedRequest::IntelDcap { .. } => DispatchTarget::IntelDcap,
            NormalizedRequest::AmdSevMeasurement(_) => DispatchTarget::AmdSevMeasurement,
            NormalizedRequest::AmdSevReport { .. } => DispatchTarget::AmdSevReport,
            NormalizedRequest::AwsNitro { .. } => DispatchTarget::AwsNitro,
        }
    }

    /// The body sent to the collaborator.
    fn into_body(self) -> Value {
        match self {
            NormalizedRequest::IntelDcap { hex } | NormalizedRequest::AwsNitro { hex } => {
                json!({ "hex": hex })
            }
            NormalizedRequest::AmdSevMeasurement(measurement) => json!(measurement),
            NormalizedRequest::AmdSevReport { report } => json!({ "report": report }),
        }
    }
}

/// The uniform envelope returned to callers on success.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttestationResult {
    PassThrough(Value),
    Synthesized(SynthesizedVerdict),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SynthesizedVerdict {
    pub success: bool,
    pub proof_of_cloud: bool,
    pub quote: QuoteSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chip_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteSummary {
    pub header: QuoteHeader,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteHeader {
    pub tee_type: String,
}

impl SynthesizedVerdict {
    fn from_response(tee_type: &str, response: &Value) -> Self {
        let chip_id = response
            .get(CHIP_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Self {
            success: true,
            proof_of_cloud: true,
            quote: QuoteSummary {
                header: QuoteHeader {
                    tee_type: tee_type.to_string(),
                },
            },
            chip_id,
        }
    }
}

/// Maps each dispatch target to the collaborator serving it.
#[derive(Clone, Default)]
pub struct Dispatcher {
    collaborators: HashMap<DispatchTarget, Arc<dyn Collaborator>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, target: DispatchTarget, collaborator: Arc<dyn Collaborator>) -> Self {
        self.collaborators.insert(target, collaborator);
        self
    }

    /// Build the production dispatcher: Phala for Intel DCAP, nilCC for both
    /// AMD flavours and a placeholder for AWS Nitro.
    pub fn from_config(config: &VerifiersConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout);

        let dispatcher = Self::new()
            .register(
                DispatchTarget::IntelDcap,
                Arc::new(HttpCollaborator::new("Phala", &config.intel_dcap, timeout)?),
            )
            .register(
                DispatchTarget::AmdSevMeasurement,
                Arc::new(HttpCollaborator::new(
                    "Nillion",
                    &config.amd_sev_measurement,
                    timeout,
                )?),
            )
            .register(
                DispatchTarget::AmdSevReport,
                Arc::new(HttpCollaborator::new(
                    "Nillion",
                    &config.amd_sev_report,
                    timeout,
                )?),
            )
            .register(DispatchTarget::AwsNitro, Arc::new(Unavailable::new("AWS Nitro")));

        Ok(dispatcher)
    }

    /// Forward `request` to its collaborator, exactly once, and shape the
    /// answer.
    pub async fn dispatch(
        &self,
        request: NormalizedRequest,
    ) -> Result<AttestationResult, DispatchError> {
        let target = request.target();
        let collaborator =
            self.collaborators
                .get(&target)
                .ok_or_else(|| DispatchError::NotImplemented {
                    target: target.to_string(),
                })?;

        if !collaborator.is_available() {
            return Err(DispatchError::NotImplemented {
                target: collaborator.name().to_string(),
            });
        }

        let body = request.into_body();
        info!("Dispatching to {} ({target})", collaborator.name());
        debug!("Normalized request: {body}");

        DISPATCH_TOTAL.with_label_values(&[target.as_ref()]).inc();
        let timer = DISPATCH_DURATION.start_timer();
        let response = collaborator.verify(&body).await;
        timer.observe_duration();

        let response = response.inspect_err(|e| {
            warn!("{target} dispatch failed: {e}");
            DISPATCH_FAILURES
                .with_label_values(&[target.as_ref(), e.as_ref()])
                .inc();
        })?;

        let result = match target.shape() {
            ResponseShape::PassThrough => AttestationResult::PassThrough(response),
            ResponseShape::Synthesized { tee_type } => {
                AttestationResult::Synthesized(SynthesizedVerdict::from_response(tee_type, &response))
            }
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_json_diff::assert_json_eq;
    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::{classify::Measurement, prometheus::export_metrics};

    /// Answers every call with a canned response and remembers what it got.
    struct StandIn {
        response: Value,
        calls: Mutex<Vec<Value>>,
    }

    impl StandIn {
        fn new(response: Value) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: Mutex::new(vec![]),
            })
        }

        fn calls(&self) -> Vec<Value> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Collaborator for StandIn {
        fn name(&self) -> &str {
            "stand-in"
        }

        async fn verify(&self, body: &Value) -> Result<Value, DispatchError> {
            self.calls.lock().unwrap().push(body.clone());
            Ok(self.response.clone())
        }
    }

    struct Refusing {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Collaborator for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn verify(&self, _body: &Value) -> Result<Value, DispatchError> {
            *self.calls.lock().unwrap() += 1;
            Err(DispatchError::Rejected {
                collaborator: "refusing".into(),
                status: 503,
                reason: "Service Unavailable".into(),
            })
        }
    }

    #[tokio::test]
    async fn intel_passes_through() {
        let verdict = json!({"success": true, "proof_of_cloud": true, "quote": {"header": {"tee_type": "TEE_TDX"}}});
        let phala = StandIn::new(verdict.clone());
        let dispatcher = Dispatcher::new().register(DispatchTarget::IntelDcap, phala.clone());

        let result = dispatcher
            .dispatch(NormalizedRequest::IntelDcap {
                hex: "0xabcd".into(),
            })
            .await
            .unwrap();

        assert_eq!(result, AttestationResult::PassThrough(verdict));
        assert_eq!(phala.calls(), vec![json!({"hex": "0xabcd"})]);
    }

    #[tokio::test]
    async fn measurement_is_forwarded_renamed() {
        let nillion = StandIn::new(json!({"success": true}));
        let dispatcher =
            Dispatcher::new().register(DispatchTarget::AmdSevMeasurement, nillion.clone());

        let request = NormalizedRequest::AmdSevMeasurement(Measurement {
            measurement_hash: "mh".into(),
            docker_compose_hash: "dch".into(),
            nilcc_version: "0.2.1".into(),
            vcpus: 2,
        });
        let result = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(result, AttestationResult::PassThrough(json!({"success": true})));
        assert_eq!(
            nillion.calls(),
            vec![json!({
                "measurement_hash": "mh",
                "docker_compose_hash": "dch",
                "nilcc_version": "0.2.1",
                "vcpus": 2,
            })]
        );
    }

    #[rstest]
    #[case::with_chip(json!({"chip_id": "X1"}), json!({
        "success": true,
        "proof_of_cloud": true,
        "quote": {"header": {"tee_type": "TEE_AMD_SEV_SNP"}},
        "chip_id": "X1",
    }))]
    #[case::without_chip(json!({}), json!({
        "success": true,
        "proof_of_cloud": true,
        "quote": {"header": {"tee_type": "TEE_AMD_SEV_SNP"}},
    }))]
    #[case::empty_chip(json!({"chip_id": ""}), json!({
        "success": true,
        "proof_of_cloud": true,
        "quote": {"header": {"tee_type": "TEE_AMD_SEV_SNP"}},
    }))]
    #[tokio::test]
    async fn raw_report_envelope_is_synthesized(#[case] response: Value, #[case] expected: Value) {
        let nillion = StandIn::new(response);
        let dispatcher = Dispatcher::new().register(DispatchTarget::AmdSevReport, nillion.clone());

        let result = dispatcher
            .dispatch(NormalizedRequest::AmdSevReport {
                report: "abcd".into(),
            })
            .await
            .unwrap();

        assert_json_eq!(serde_json::to_value(&result).unwrap(), expected);
        assert_eq!(nillion.calls(), vec![json!({"report": "abcd"})]);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let refusing = Arc::new(Refusing {
            calls: Mutex::new(0),
        });
        let dispatcher = Dispatcher::new().register(DispatchTarget::IntelDcap, refusing.clone());

        let err = dispatcher
            .dispatch(NormalizedRequest::IntelDcap {
                hex: "0x00".into(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "refusing API error: 503 Service Unavailable");
        assert_eq!(*refusing.calls.lock().unwrap(), 1);

        let metrics = export_metrics().unwrap();
        assert!(metrics.contains(
            "verification_dispatch_failures_total{kind=\"rejected\",target=\"intel_dcap\"}"
        ));
    }

    #[tokio::test]
    async fn unregistered_target_is_not_implemented() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .dispatch(NormalizedRequest::AwsNitro { hex: "00".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::NotImplemented { .. }));
    }

    #[tokio::test]
    async fn nitro_is_registered_but_unavailable() {
        let config = VerifiersConfig::default();
        let dispatcher = Dispatcher::from_config(&config).unwrap();

        let err = dispatcher
            .dispatch(NormalizedRequest::AwsNitro { hex: "00".into() })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "AWS Nitro verification not implemented");

        // Not a dispatch, so nothing is counted or timed.
        let metrics = export_metrics().unwrap();
        assert!(!metrics.contains("target=\"aws_nitro\""), "{metrics}");
    }
}
