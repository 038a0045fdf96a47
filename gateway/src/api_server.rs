// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use log::info;
use serde_json::{json, Value};

use crate::{
    classify::{classify_and_validate, validate_measurement, NormalizedRequest, ProtocolVariant, ValidationError},
    config::GatewayConfig,
    dispatch::Dispatcher,
    hardware::HardwareRegistry,
    prometheus::{VALIDATION_REJECTIONS, VERIFY_REQUESTS_TOTAL},
    Error, Result,
};

const VERIFY_PATH: &str = "/attestations/verify";
const VERIFY_AMD_SEV_PATH: &str = "/attestations/verify/amd-sev";
const HARDWARE_ID_PATH: &str = "/hardware_id/{id}";

const SERVICE_NAME: &str = "Proof-of-Cloud Verifiers";

/// The gateway API server
#[derive(Clone)]
pub struct ApiServer {
    config: GatewayConfig,
    dispatcher: Arc<Dispatcher>,
    hardware: HardwareRegistry,
}

impl ApiServer {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let dispatcher = Dispatcher::from_config(&config.verifiers)
            .map_err(|e| Error::DispatcherInitialization { source: e })?;

        Ok(Self::with_dispatcher(config, dispatcher))
    }

    /// Build a server around an already assembled dispatcher.
    pub fn with_dispatcher(config: GatewayConfig, dispatcher: Dispatcher) -> Self {
        let hardware = HardwareRegistry::new(config.hardware_ids.iter().cloned());

        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            hardware,
        }
    }

    /// Start the HTTP server and serve API requests.
    pub async fn serve(self) -> Result<()> {
        self.server()?
            .await
            .map_err(|e| Error::HTTPFailed { source: e.into() })
    }

    /// Setup API server
    pub fn server(self) -> Result<actix_web::dev::Server> {
        info!(
            "Starting HTTP server at {:?} ({:?} protocol)",
            self.config.http_server.sockets, self.config.protocol
        );

        let sockets = self.config.http_server.sockets.clone();

        let http_server = HttpServer::new(move || {
            let api_server = self.clone();
            App::new()
                .wrap(middleware::Logger::default())
                .configure(|cfg| api_server.configure(cfg))
        });

        Ok(http_server
            .bind(&sockets[..])
            .map_err(|e| Error::HTTPFailed { source: e.into() })?
            .run())
    }

    /// Register the gateway routes and shared state on an actix service.
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::new(self.clone()))
            .app_data(web::PayloadConfig::new(
                self.config.http_server.payload_limit(),
            ))
            .route("/", web::get().to(identity))
            .route(VERIFY_PATH, web::post().to(verify))
            .route(HARDWARE_ID_PATH, web::get().to(hardware_id))
            .route("/metrics", web::get().to(prometheus_metrics_handler));

        // Only the field-inference revision still exposes the dedicated AMD route.
        if self.config.protocol == ProtocolVariant::FieldInference {
            cfg.route(VERIFY_AMD_SEV_PATH, web::post().to(verify_amd_sev));
        }
    }

    async fn forward(&self, request: NormalizedRequest) -> Result<HttpResponse> {
        info!("Verification request classified for {}", request.target());
        let result = self.dispatcher.dispatch(request).await?;

        Ok(HttpResponse::Ok().json(result))
    }
}

fn record_rejection(e: &ValidationError) {
    VALIDATION_REJECTIONS.with_label_values(&[e.code()]).inc();
}

/// POST /attestations/verify
pub(crate) async fn verify(body: web::Bytes, core: web::Data<ApiServer>) -> Result<HttpResponse> {
    VERIFY_REQUESTS_TOTAL.with_label_values(&[VERIFY_PATH]).inc();

    let payload: Value = serde_json::from_slice(&body)?;
    let request =
        classify_and_validate(&payload, core.config.protocol).inspect_err(record_rejection)?;

    core.forward(request).await
}

/// POST /attestations/verify/amd-sev
///
/// The body is always treated as the four measurement fields.
pub(crate) async fn verify_amd_sev(
    body: web::Bytes,
    core: web::Data<ApiServer>,
) -> Result<HttpResponse> {
    VERIFY_REQUESTS_TOTAL
        .with_label_values(&[VERIFY_AMD_SEV_PATH])
        .inc();

    let payload: Value = serde_json::from_slice(&body)?;
    let measurement = validate_measurement(&payload).inspect_err(record_rejection)?;

    core.forward(NormalizedRequest::AmdSevMeasurement(measurement))
        .await
}

/// GET /hardware_id/{id}
pub(crate) async fn hardware_id(
    id: web::Path<String>,
    core: web::Data<ApiServer>,
) -> Result<HttpResponse> {
    if !core.hardware.is_verified(&id) {
        return Err(Error::HardwareIdNotFound);
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/// GET /
pub(crate) async fn identity() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

pub(crate) async fn prometheus_metrics_handler() -> Result<HttpResponse> {
    let report = crate::prometheus::export_metrics()?;
    Ok(HttpResponse::Ok().body(report))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use rstest::rstest;

    use super::*;

    // No collaborators are registered: any request that got past validation
    // would come back as 501 instead of the expected 400.
    fn server(protocol: ProtocolVariant) -> ApiServer {
        let config = GatewayConfig {
            protocol,
            hardware_ids: vec!["hw-verified".into()],
            ..Default::default()
        };

        ApiServer::with_dispatcher(config, Dispatcher::new())
    }

    async fn call(
        server: ApiServer,
        req: test::TestRequest,
    ) -> (StatusCode, Value) {
        let app = test::init_service(App::new().configure(|cfg| server.configure(cfg))).await;
        let resp = test::call_service(&app, req.to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        let body = serde_json::from_slice(&body).unwrap_or(Value::Null);

        (status, body)
    }

    #[rstest]
    #[case::nothing(ProtocolVariant::FieldInference, json!({}), "missing_parameters")]
    #[case::vcpus_string(ProtocolVariant::FieldInference, json!({"measurementHash": "a", "dockerComposeHash": "b", "nilccVersion": "c", "vcpus": "4"}), "invalid_vcpus")]
    #[case::hashes(ProtocolVariant::FieldInference, json!({"nilccVersion": "c", "vcpus": 4}), "missing_measurementHash")]
    #[case::untagged(ProtocolVariant::TypeTagged, json!({"hex": "abcd"}), "missing_type")]
    #[case::bad_tag(ProtocolVariant::TypeTagged, json!({"type": "arm", "hex": "abcd"}), "invalid_type")]
    #[case::no_hex(ProtocolVariant::TypeTagged, json!({"type": "intel"}), "missing_hex")]
    #[case::bare_prefix(ProtocolVariant::FieldInference, json!({"hex": "0x"}), "missing_hex")]
    #[actix_web::test]
    async fn validation_failures_are_400(
        #[case] protocol: ProtocolVariant,
        #[case] payload: Value,
        #[case] code: &str,
    ) {
        let req = test::TestRequest::post().uri(VERIFY_PATH).set_json(payload);
        let (status, body) = call(server(protocol), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"success": false, "error": code}));
    }

    #[actix_web::test]
    async fn legacy_route_validates_measurement() {
        let req = test::TestRequest::post()
            .uri(VERIFY_AMD_SEV_PATH)
            .set_json(json!({"hex": "abcd"}));
        let (status, body) = call(server(ProtocolVariant::FieldInference), req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"success": false, "error": "missing_measurementHash"})
        );
    }

    #[actix_web::test]
    async fn legacy_route_is_absent_when_type_tagged() {
        let req = test::TestRequest::post()
            .uri(VERIFY_AMD_SEV_PATH)
            .set_json(json!({}));
        let (status, _) = call(server(ProtocolVariant::TypeTagged), req).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn malformed_json_is_500() {
        let req = test::TestRequest::post()
            .uri(VERIFY_PATH)
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json");
        let (status, body) = call(server(ProtocolVariant::FieldInference), req).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].as_str().unwrap().contains("not valid JSON"));
    }

    #[actix_web::test]
    async fn nitro_is_not_implemented() {
        let config = GatewayConfig {
            protocol: ProtocolVariant::TypeTagged,
            ..Default::default()
        };
        let server = ApiServer::new(config).unwrap();
        let req = test::TestRequest::post()
            .uri(VERIFY_PATH)
            .set_json(json!({"type": "aws", "hex": "abcd"}));
        let (status, body) = call(server, req).await;

        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            body,
            json!({"success": false, "error": "AWS Nitro verification not implemented"})
        );
    }

    #[rstest]
    #[case("hw-verified", StatusCode::OK, json!({"success": true}))]
    #[case("hw-unknown", StatusCode::NOT_FOUND, json!({"success": false, "error": "not_found"}))]
    #[actix_web::test]
    async fn hardware_lookup(#[case] id: &str, #[case] expected_status: StatusCode, #[case] expected: Value) {
        let req = test::TestRequest::get().uri(&format!("/hardware_id/{id}"));
        let (status, body) = call(server(ProtocolVariant::FieldInference), req).await;

        assert_eq!(status, expected_status);
        assert_eq!(body, expected);
    }

    #[actix_web::test]
    async fn identity_route() {
        let req = test::TestRequest::get().uri("/");
        let (status, body) = call(server(ProtocolVariant::FieldInference), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], json!(SERVICE_NAME));
        assert_eq!(body["status"], json!("running"));
    }

    #[actix_web::test]
    async fn metrics_are_exported() {
        let server = server(ProtocolVariant::FieldInference);
        let app = test::init_service(App::new().configure(|cfg| server.configure(cfg))).await;

        let req = test::TestRequest::post()
            .uri(VERIFY_PATH)
            .set_json(json!({}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let report = String::from_utf8(body.to_vec()).unwrap();

        assert!(report.contains("verification_rejections_total{code=\"missing_parameters\"}"));
    }
}
