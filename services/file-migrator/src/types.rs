// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Types for file migration tracking
//!
//! A [`FileRecord`] is one row fetched from the record store. It lives in
//! memory for a single pipeline run and is either turned into a
//! [`MigratedMarker`] (after a successful upload) or dropped and picked up
//! again by the next fetch.

use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

/// Separator used by legacy source paths, independent of the host OS.
pub const SOURCE_PATH_SEPARATOR: char = '\\';

/// Date format accepted for the migration window bounds.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while deriving object keys from legacy source paths
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("source path {0:?} has fewer than two '\\'-separated segments")]
    TooShort(String),
}

/// Errors produced while parsing the migration date window
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateRangeError {
    #[error("invalid begin date {value:?}: {source}")]
    InvalidBegin {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("invalid end date {value:?}: {source}")]
    InvalidEnd {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("begin date {begin} is after end date {end}")]
    Inverted { begin: NaiveDate, end: NaiveDate },
}

/// One file eligible for migration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRecord {
    /// Identity assigned by the record store
    pub id: i64,

    /// Legacy file-system path (backslash-separated)
    pub source_path: String,

    /// Logical directory the object was stored under, empty until uploaded
    pub destination_dir: String,

    /// Set once the upload succeeded
    pub migrated: bool,

    /// Set once the object store confirmed the write
    pub stored: bool,
}

impl FileRecord {
    /// Create an unmigrated record
    pub fn new(id: i64, source_path: impl Into<String>) -> Self {
        Self {
            id,
            source_path: source_path.into(),
            ..Default::default()
        }
    }

    /// Flag the record as uploaded under `destination_dir`.
    ///
    /// All three fields change together so a record is never observed
    /// half-migrated.
    pub fn mark_migrated(&mut self, destination_dir: String) {
        self.destination_dir = destination_dir;
        self.stored = true;
        self.migrated = true;
    }

    /// Staging marker for this record, if it was migrated
    pub fn marker(&self) -> Option<MigratedMarker> {
        if !self.migrated {
            return None;
        }
        Some(MigratedMarker {
            file_id: self.id,
            dir_name: self.destination_dir.clone(),
        })
    }
}

/// Staging-table row asserting "this file ID now lives under this directory"
///
/// Only constructed through [`FileRecord::marker`], so a marker always refers
/// to a migrated record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedMarker {
    pub file_id: i64,
    pub dir_name: String,
}

/// Collect staging markers for every migrated record in a batch
pub fn migrated_markers(records: &[FileRecord]) -> Vec<MigratedMarker> {
    records.iter().filter_map(FileRecord::marker).collect()
}

/// Inclusive window of dates used to select candidate records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub begin: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Parse both bounds and check that `begin` is not after `end`
    pub fn parse(begin: &str, end: &str) -> Result<Self, DateRangeError> {
        let begin = NaiveDate::parse_from_str(begin.trim(), DATE_FORMAT).map_err(|source| {
            DateRangeError::InvalidBegin {
                value: begin.to_string(),
                source,
            }
        })?;
        let end = NaiveDate::parse_from_str(end.trim(), DATE_FORMAT).map_err(|source| {
            DateRangeError::InvalidEnd {
                value: end.to_string(),
                source,
            }
        })?;

        if begin > end {
            return Err(DateRangeError::Inverted { begin, end });
        }

        Ok(Self { begin, end })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.begin, self.end)
    }
}

/// Split a legacy path into its `(parent_dir, file_name)` tail
///
/// Either segment may be empty; only a path without any separator fails.
fn path_tail(source_path: &str) -> Result<(&str, &str), PathError> {
    let mut segments = source_path.rsplit(SOURCE_PATH_SEPARATOR);

    let (Some(name), Some(dir)) = (segments.next(), segments.next()) else {
        return Err(PathError::TooShort(source_path.to_string()));
    };

    Ok((dir, name))
}

/// Object key for a source path: `"<parent-dir>/<file-name>"`
pub fn derive_key(source_path: &str) -> Result<String, PathError> {
    let (dir, name) = path_tail(source_path)?;
    Ok(format!("{}/{}", dir, name))
}

/// Logical directory for a migrated file: `"<bucket>/<parent-dir>"`
pub fn derive_destination_dir(bucket: &str, source_path: &str) -> Result<String, PathError> {
    let (dir, _) = path_tail(source_path)?;
    Ok(format!("{}/{}", bucket, dir))
}
