// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the file migrator
//!
//! Exports counters for:
//! - Files uploaded and recorded as migrated
//! - Source files that were already gone
//! - Upload failures
//! - Batches committed

use prometheus::{IntCounter, Opts, Registry, TextEncoder};

// Static metric initialization uses expect because these are compile-time
// constant definitions that cannot fail in practice. If they do fail, it indicates
// a programming error (e.g., invalid metric name) that should cause a panic at startup.
//
// This module exists to scope the clippy allow attributes to just the metric definitions.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all migrator metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// Files uploaded successfully
        pub static ref FILES_MIGRATED: IntCounter = IntCounter::with_opts(
            Opts::new("file_migrator_files_migrated_total", "Total files uploaded to the bucket")
        ).expect("valid metric name");

        /// Files whose source was missing at upload time
        pub static ref FILES_MISSING: IntCounter = IntCounter::with_opts(
            Opts::new(
                "file_migrator_files_missing_total",
                "Total files skipped because the source no longer exists"
            )
        ).expect("valid metric name");

        /// Uploads that failed for any reason other than a missing source
        pub static ref UPLOAD_FAILURES: IntCounter = IntCounter::with_opts(
            Opts::new("file_migrator_upload_failures_total", "Total failed uploads")
        ).expect("valid metric name");

        /// Batches whose bookkeeping was committed
        pub static ref BATCHES_COMPLETED: IntCounter = IntCounter::with_opts(
            Opts::new("file_migrator_batches_total", "Total batches committed")
        ).expect("valid metric name");
    }
}

pub use metrics_impl::{BATCHES_COMPLETED, FILES_MIGRATED, FILES_MISSING, REGISTRY, UPLOAD_FAILURES};

/// Register all metrics with the registry
///
/// Should be called once during application startup.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(FILES_MIGRATED.clone()))
        .expect("Failed to register FILES_MIGRATED");
    REGISTRY
        .register(Box::new(FILES_MISSING.clone()))
        .expect("Failed to register FILES_MISSING");
    REGISTRY
        .register(Box::new(UPLOAD_FAILURES.clone()))
        .expect("Failed to register UPLOAD_FAILURES");
    REGISTRY
        .register(Box::new(BATCHES_COMPLETED.clone()))
        .expect("Failed to register BATCHES_COMPLETED");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_file_migrated() {
    FILES_MIGRATED.inc();
}

pub fn record_file_missing() {
    FILES_MISSING.inc();
}

pub fn record_upload_failure() {
    UPLOAD_FAILURES.inc();
}

pub fn record_batch_completed() {
    BATCHES_COMPLETED.inc();
}
