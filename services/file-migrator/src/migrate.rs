// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Migration driver
//!
//! Repeatedly fetches a batch of candidate files, uploads it through the
//! [`UploadPipeline`], and commits the bookkeeping for the files that made it:
//!
//! 1. Fetch candidates for the configured [`DateRange`]; an empty batch ends
//!    the run.
//! 2. Upload the batch.
//! 3. Truncate the staging markers table.
//! 4. Stage a marker for every migrated record.
//! 5. Promote the staged markers.
//! 6. Optionally remove the local source files of migrated records.
//!
//! Files that failed to upload are left untouched and come back on the next
//! fetch. Any bookkeeping failure aborts the run.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::db::{DbError, RecordStore};
use crate::metrics;
use crate::pipeline::{PipelineError, UploadPipeline};
use crate::types::{DateRange, FileRecord, migrated_markers};

/// Errors that abort a migration run, tagged with the failing phase
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("failed to fetch files for {range}: {source}")]
    Fetch {
        range: DateRange,
        #[source]
        source: DbError,
    },

    #[error("failed to reset staging markers: {0}")]
    Reset(#[source] DbError),

    #[error("failed to add {count} migrated marker(s): {source}")]
    AddMarkers {
        count: usize,
        #[source]
        source: DbError,
    },

    #[error("failed to mark files as migrated: {0}")]
    MarkMigrated(#[source] DbError),

    #[error("failed to remove source file {path}: {source}")]
    RemoveFiles {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("migration cancelled during batch {batch}")]
    Cancelled { batch: u32 },
}

impl MigrateError {
    /// Short name of the phase that failed, for logging
    pub fn phase(&self) -> &'static str {
        match self {
            MigrateError::Fetch { .. } => "fetch",
            MigrateError::Reset(_) => "reset",
            MigrateError::AddMarkers { .. } => "add_markers",
            MigrateError::MarkMigrated(_) => "mark_migrated",
            MigrateError::RemoveFiles { .. } => "remove_files",
            MigrateError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrateError::Cancelled { .. })
    }
}

/// Driver behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Delete local source files once their markers are committed
    pub remove_source_files: bool,

    /// Stop after this many non-empty batches
    pub max_batches: Option<u32>,
}

/// Totals for a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Non-empty batches processed
    pub batches: u32,

    /// Files migrated during this run
    pub migrated: u64,
}

/// Drives batches of files through upload and bookkeeping
pub struct MigrationService {
    records: Arc<dyn RecordStore>,
    pipeline: UploadPipeline,
    range: DateRange,
    options: MigrateOptions,
}

impl MigrationService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        pipeline: UploadPipeline,
        range: DateRange,
        options: MigrateOptions,
    ) -> Self {
        Self {
            records,
            pipeline,
            range,
            options,
        }
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    /// Run batches until the record store has nothing left to migrate
    pub async fn migrate(
        &self,
        cancel: &watch::Receiver<bool>,
    ) -> Result<MigrationSummary, MigrateError> {
        let started_total = self.pipeline.migrated_total();
        let mut batch: u32 = 0;

        info!(
            range = %self.range,
            workers = self.pipeline.workers(),
            remove_source_files = self.options.remove_source_files,
            max_batches = ?self.options.max_batches,
            "Starting migration"
        );

        loop {
            if self.options.max_batches.is_some_and(|max| batch >= max) {
                info!(batches = batch, "Batch limit reached");
                break;
            }

            let current = batch + 1;
            if *cancel.borrow() {
                return Err(MigrateError::Cancelled { batch: current });
            }

            let start = Instant::now();

            let mut files = self
                .records
                .list_candidates(&self.range)
                .await
                .map_err(|source| MigrateError::Fetch {
                    range: self.range,
                    source,
                })?;

            if files.is_empty() {
                info!(batches = batch, "No more files to migrate");
                break;
            }
            batch = current;

            debug!(batch, files = files.len(), "Fetched batch");

            let stats = self
                .pipeline
                .upload_files(&mut files, cancel)
                .await
                .map_err(|e| match e {
                    PipelineError::Cancelled { attempted } => {
                        warn!(batch, attempted, "Upload cancelled, skipping bookkeeping");
                        MigrateError::Cancelled { batch }
                    }
                })?;

            self.commit_batch(&files).await?;

            if self.options.remove_source_files {
                remove_source_files(&files, cancel, batch).await?;
            }

            metrics::record_batch_completed();

            info!(
                batch,
                migrated = stats.migrated,
                missing = stats.missing,
                failed = stats.failed,
                elapsed = ?start.elapsed(),
                total = self.pipeline.migrated_total(),
                "Batch complete"
            );
        }

        let summary = MigrationSummary {
            batches: batch,
            migrated: self.pipeline.migrated_total() - started_total,
        };
        info!(
            batches = summary.batches,
            migrated = summary.migrated,
            "Migration finished"
        );
        Ok(summary)
    }

    /// Record the migrated files of a batch in the record store
    async fn commit_batch(&self, files: &[FileRecord]) -> Result<(), MigrateError> {
        self.records
            .reset_staging_markers()
            .await
            .map_err(MigrateError::Reset)?;

        let markers = migrated_markers(files);
        let count = markers.len();
        let written = self
            .records
            .bulk_insert_markers(&markers)
            .await
            .map_err(|source| MigrateError::AddMarkers { count, source })?;
        debug!(markers = count, written, "Added migrated markers");

        self.records
            .finalize_migrated_markers()
            .await
            .map_err(MigrateError::MarkMigrated)?;

        Ok(())
    }
}

/// Delete the local copies of migrated files; already-missing files are ignored
async fn remove_source_files(
    files: &[FileRecord],
    cancel: &watch::Receiver<bool>,
    batch: u32,
) -> Result<(), MigrateError> {
    let mut removed = 0usize;
    for file in files.iter().filter(|f| f.migrated) {
        if *cancel.borrow() {
            return Err(MigrateError::Cancelled { batch });
        }
        match tokio::fs::remove_file(&file.source_path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %file.source_path, "Source already removed");
            }
            Err(source) => {
                return Err(MigrateError::RemoveFiles {
                    path: file.source_path.clone(),
                    source,
                });
            }
        }
    }
    debug!(batch, removed, "Removed source files");
    Ok(())
}
