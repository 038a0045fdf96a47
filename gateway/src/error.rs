// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! This Error type helps to work with Actix-web

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::{error, warn};
use serde::Serialize;
use thiserror::Error;

use crate::{classify::ValidationError, dispatch::DispatchError};

pub type Result<T> = std::result::Result<T, Error>;

/// Failure body, shared by every error status.
#[derive(Serialize)]
pub struct ErrorEnvelope<'a> {
    pub success: bool,
    pub error: &'a str,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid verification request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Request body is not valid JSON: {source}")]
    MalformedBody {
        #[from]
        source: serde_json::Error,
    },

    #[error("Dispatcher initialization failed")]
    DispatcherInitialization {
        #[source]
        source: anyhow::Error,
    },

    #[error("Hardware id not found")]
    HardwareIdNotFound,

    #[error("HTTP initialization failed")]
    HTTPFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("Prometheus error")]
    PrometheusError {
        #[from]
        source: prometheus::Error,
    },
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::HardwareIdNotFound => StatusCode::NOT_FOUND,
            Error::Dispatch(DispatchError::NotImplemented { .. }) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        let error = match self {
            Error::Validation(e) => e.code(),
            Error::HardwareIdNotFound => "not_found",
            _ => message.as_str(),
        };

        let status = self.status_code();
        if status.is_server_error() {
            error!("{self:?}");
        } else {
            warn!("{self}");
        }

        HttpResponse::build(status).json(ErrorEnvelope {
            success: false,
            error,
        })
    }
}
