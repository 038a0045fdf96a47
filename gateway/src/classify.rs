// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Request classification and validation.
//!
//! An inbound verification request is an arbitrary JSON object. Before anything
//! leaves the gateway it is assigned to exactly one TEE verification path, its
//! required fields are checked, and its encoding is shaped for the collaborator
//! that will receive it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

const TYPE_FIELD: &str = "type";
const HEX_FIELD: &str = "hex";

const MEASUREMENT_HASH_FIELD: &str = "measurementHash";
const DOCKER_COMPOSE_HASH_FIELD: &str = "dockerComposeHash";
const NILCC_VERSION_FIELD: &str = "nilccVersion";
const VCPUS_FIELD: &str = "vcpus";

/// Any one of these marks a request as measurement-shaped.
const AMD_MEASUREMENT_FIELDS: [&str; 4] = [
    MEASUREMENT_HASH_FIELD,
    DOCKER_COMPOSE_HASH_FIELD,
    NILCC_VERSION_FIELD,
    VCPUS_FIELD,
];

const HEX_PREFIX: &str = "0x";

/// Contract violations detected before dispatch. The strum name of each
/// variant is the machine-readable code returned to the caller.
#[derive(Error, IntoStaticStr, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[strum(serialize = "missing_type")]
    #[error("request is missing the `type` discriminator")]
    MissingType,

    #[strum(serialize = "invalid_type")]
    #[error("unknown TEE type {tee}")]
    InvalidType { tee: String },

    #[strum(serialize = "missing_hex")]
    #[error("request is missing a non-empty `hex` report")]
    MissingHex,

    #[strum(serialize = "missing_measurementHash")]
    #[error("request is missing `measurementHash`")]
    MissingMeasurementHash,

    #[strum(serialize = "missing_dockerComposeHash")]
    #[error("request is missing `dockerComposeHash`")]
    MissingDockerComposeHash,

    #[strum(serialize = "missing_nilccVersion")]
    #[error("request is missing `nilccVersion`")]
    MissingNilccVersion,

    #[strum(serialize = "missing_vcpus")]
    #[error("request is missing `vcpus`")]
    MissingVcpus,

    #[strum(serialize = "invalid_vcpus")]
    #[error("`vcpus` must be a non-negative integer")]
    InvalidVcpus,

    #[strum(serialize = "missing_parameters")]
    #[error("request matches no known attestation shape")]
    MissingParameters,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

/// TEE families selectable through the `type` discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum TeeFamily {
    #[strum(to_string = "intel", serialize = "tdx", serialize = "sgx", serialize = "dcap")]
    IntelDcap,

    #[strum(to_string = "amd", serialize = "sev", serialize = "sev-snp", serialize = "snp")]
    AmdSevSnp,

    #[strum(to_string = "aws", serialize = "nitro")]
    AwsNitro,
}

/// The four confidential-VM measurement fields, named the way the AMD
/// measurement verifier expects them on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub measurement_hash: String,
    pub docker_compose_hash: String,
    pub nilcc_version: String,
    pub vcpus: u64,
}

/// A request that passed validation and is shaped for its target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedRequest {
    /// Quote hex, always `0x`-prefixed.
    IntelDcap { hex: String },

    AmdSevMeasurement(Measurement),

    /// Raw SEV-SNP report hex, never `0x`-prefixed.
    AmdSevReport { report: String },

    AwsNitro { hex: String },
}

/// Protocol revisions of `POST /attestations/verify`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// The TEE family is inferred from which fields are present. An explicit
    /// `type` is still honoured when given.
    #[default]
    FieldInference,

    /// Every request must name its TEE family in `type` and carry `hex`.
    TypeTagged,
}

/// One step of a classification strategy. A rule either claims the request
/// (yielding the validation outcome) or passes it on to the next rule.
enum Rule {
    TypeTag { required: bool },
    IntelHex,
    AmdMeasurement,
}

const FIELD_INFERENCE_RULES: &[Rule] = &[
    Rule::TypeTag { required: false },
    Rule::IntelHex,
    Rule::AmdMeasurement,
];

const TYPE_TAGGED_RULES: &[Rule] = &[Rule::TypeTag { required: true }];

impl ProtocolVariant {
    fn rules(self) -> &'static [Rule] {
        match self {
            ProtocolVariant::FieldInference => FIELD_INFERENCE_RULES,
            ProtocolVariant::TypeTagged => TYPE_TAGGED_RULES,
        }
    }
}

impl Rule {
    fn apply(&self, fields: &Map<String, Value>) -> Option<Result<NormalizedRequest, ValidationError>> {
        match self {
            Rule::TypeTag { required } => match fields.get(TYPE_FIELD) {
                None | Some(Value::Null) if *required => Some(Err(ValidationError::MissingType)),
                None | Some(Value::Null) => None,
                Some(tag) => Some(classify_tagged(tag, fields)),
            },
            Rule::IntelHex => non_empty_str(fields, HEX_FIELD).map(|hex| {
                hex_digits(hex).map(|_| NormalizedRequest::IntelDcap {
                    hex: with_hex_prefix(hex),
                })
            }),
            Rule::AmdMeasurement => AMD_MEASUREMENT_FIELDS
                .iter()
                .any(|field| fields.contains_key(*field))
                .then(|| measurement_from_fields(fields).map(NormalizedRequest::AmdSevMeasurement)),
        }
    }
}

/// Classify `payload` under the given protocol revision, validate it and
/// normalize it for dispatch. Rules are tried in order and the first one that
/// recognizes the request decides the outcome.
pub fn classify_and_validate(
    payload: &Value,
    variant: ProtocolVariant,
) -> Result<NormalizedRequest, ValidationError> {
    let empty = Map::new();
    let fields = payload.as_object().unwrap_or(&empty);

    variant
        .rules()
        .iter()
        .find_map(|rule| rule.apply(fields))
        .unwrap_or(Err(ValidationError::MissingParameters))
}

/// Validate a measurement-shaped request on its own, as the legacy
/// `/attestations/verify/amd-sev` route does.
pub fn validate_measurement(payload: &Value) -> Result<Measurement, ValidationError> {
    let empty = Map::new();
    measurement_from_fields(payload.as_object().unwrap_or(&empty))
}

/// Prefix `hex` with `0x` unless it already carries it.
pub fn with_hex_prefix(hex: &str) -> String {
    if hex.starts_with(HEX_PREFIX) {
        hex.to_string()
    } else {
        format!("{HEX_PREFIX}{hex}")
    }
}

/// Drop a single leading `0x`, if any.
pub fn strip_hex_prefix(hex: &str) -> &str {
    hex.strip_prefix(HEX_PREFIX).unwrap_or(hex)
}

fn classify_tagged(
    tag: &Value,
    fields: &Map<String, Value>,
) -> Result<NormalizedRequest, ValidationError> {
    let family = tag
        .as_str()
        .and_then(|tag| tag.parse::<TeeFamily>().ok())
        .ok_or_else(|| ValidationError::InvalidType {
            tee: tag.as_str().map_or_else(|| tag.to_string(), str::to_string),
        })?;

    let hex = non_empty_str(fields, HEX_FIELD).ok_or(ValidationError::MissingHex)?;
    let digits = hex_digits(hex)?;

    let request = match family {
        TeeFamily::IntelDcap => NormalizedRequest::IntelDcap {
            hex: with_hex_prefix(hex),
        },
        TeeFamily::AmdSevSnp => NormalizedRequest::AmdSevReport {
            report: digits.to_string(),
        },
        TeeFamily::AwsNitro => NormalizedRequest::AwsNitro {
            hex: hex.to_string(),
        },
    };

    Ok(request)
}

/// The report body without its `0x` prefix. A bare prefix counts as no report.
fn hex_digits(hex: &str) -> Result<&str, ValidationError> {
    Some(strip_hex_prefix(hex))
        .filter(|digits| !digits.is_empty())
        .ok_or(ValidationError::MissingHex)
}

// The order of the checks below is part of the contract: only the first
// violation is reported.
fn measurement_from_fields(fields: &Map<String, Value>) -> Result<Measurement, ValidationError> {
    let measurement_hash = required_str(
        fields,
        MEASUREMENT_HASH_FIELD,
        ValidationError::MissingMeasurementHash,
    )?;
    let docker_compose_hash = required_str(
        fields,
        DOCKER_COMPOSE_HASH_FIELD,
        ValidationError::MissingDockerComposeHash,
    )?;
    let nilcc_version = required_str(
        fields,
        NILCC_VERSION_FIELD,
        ValidationError::MissingNilccVersion,
    )?;

    let vcpus = match fields.get(VCPUS_FIELD) {
        None => return Err(ValidationError::MissingVcpus),
        Some(vcpus) => vcpus.as_u64().ok_or(ValidationError::InvalidVcpus)?,
    };

    Ok(Measurement {
        measurement_hash,
        docker_compose_hash,
        nilcc_version,
        vcpus,
    })
}

fn non_empty_str<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn required_str(
    fields: &Map<String, Value>,
    name: &str,
    missing: ValidationError,
) -> Result<String, ValidationError> {
    non_empty_str(fields, name)
        .map(str::to_string)
        .ok_or(missing)
}
