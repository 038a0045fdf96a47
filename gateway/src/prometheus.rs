// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use lazy_static::lazy_static;
use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    /// Verification requests received, per route
    pub(crate) static ref VERIFY_REQUESTS_TOTAL: CounterVec = {
        let opts = Opts::new(
            "verification_requests_total",
            "Total count of verification requests",
        );
        CounterVec::new(opts, &["route"]).unwrap()
    };

    /// Requests rejected before dispatch, per error code
    pub(crate) static ref VALIDATION_REJECTIONS: CounterVec = {
        let opts = Opts::new(
            "verification_rejections_total",
            "Total count of requests rejected by validation",
        );
        CounterVec::new(opts, &["code"]).unwrap()
    };

    pub(crate) static ref DISPATCH_TOTAL: CounterVec = {
        let opts = Opts::new(
            "verification_dispatches_total",
            "Total count of requests forwarded to a verifier",
        );
        CounterVec::new(opts, &["target"]).unwrap()
    };

    pub(crate) static ref DISPATCH_FAILURES: CounterVec = {
        let opts = Opts::new(
            "verification_dispatch_failures_total",
            "Total count of failed verifier calls",
        );
        CounterVec::new(opts, &["target", "kind"]).unwrap()
    };

    /// Round trip time to the verifiers
    pub(crate) static ref DISPATCH_DURATION: Histogram = {
        let opts = HistogramOpts::new(
                "verification_dispatch_duration_seconds",
                "Distribution of verifier call duration",
        ).buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]);
        Histogram::with_opts(opts).unwrap()
    };

    /// Prometheus instance to get the metrics
    static ref INSTANCE: Registry = {
        let registry = Registry::default();

        registry.register(Box::new(VERIFY_REQUESTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(VALIDATION_REJECTIONS.clone())).unwrap();
        registry.register(Box::new(DISPATCH_TOTAL.clone())).unwrap();
        registry.register(Box::new(DISPATCH_FAILURES.clone())).unwrap();
        registry.register(Box::new(DISPATCH_DURATION.clone())).unwrap();

        registry
    };
}

pub(crate) fn export_metrics() -> Result<String, prometheus::Error> {
    let mut metrics_buffer = String::new();
    TextEncoder::new().encode_utf8(&INSTANCE.gather(), &mut metrics_buffer)?;
    Ok(metrics_buffer)
}
