// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! File Migrator Library
//!
//! Moves files tracked in a PostgreSQL database from a legacy file store into
//! an S3-compatible bucket. The library provides the upload pipeline, the
//! batch driver, and the database and object store clients they run against.

pub mod config;
pub mod db;
pub mod metrics;
pub mod migrate;
pub mod object_store;
pub mod pipeline;
pub mod types;
