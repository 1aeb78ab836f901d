// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bounded-concurrency upload pipeline
//!
//! [`UploadPipeline::upload_files`] fans a batch of [`FileRecord`]s out to a
//! fixed number of workers:
//!
//! 1. A feeder pushes `&mut FileRecord` references into a bounded queue,
//!    checking the cancellation signal before every record.
//! 2. `workers` worker futures share the receiving end and pull records until
//!    the queue is closed.
//! 3. Each worker derives the object key, uploads the source file, and on
//!    success flags the record as migrated in place.
//!
//! The feeder and workers are polled together inside the call rather than
//! spawned, so records are borrowed instead of copied and the call returns
//! only after every worker has drained the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::object_store::ObjectStore;
use crate::types::{FileRecord, derive_destination_dir, derive_key};

/// Default number of concurrent upload workers
pub const DEFAULT_UPLOAD_WORKERS: usize = 10;

/// Queue depth between the feeder and the workers
const QUEUE_DEPTH: usize = 1;

/// Pipeline errors
///
/// Per-record failures never surface here; they are logged and counted in
/// [`BatchStats`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("upload cancelled after {attempted} file(s) were attempted")]
    Cancelled { attempted: usize },
}

/// Result of processing a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Migrated,
    /// Source file no longer exists
    Missing,
    Failed,
}

/// Per-batch outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub attempted: usize,
    pub migrated: usize,
    pub missing: usize,
    pub failed: usize,
}

impl BatchStats {
    fn record(&mut self, outcome: UploadOutcome) {
        self.attempted += 1;
        match outcome {
            UploadOutcome::Migrated => self.migrated += 1,
            UploadOutcome::Missing => self.missing += 1,
            UploadOutcome::Failed => self.failed += 1,
        }
    }

    fn merge(mut self, other: BatchStats) -> Self {
        self.attempted += other.attempted;
        self.migrated += other.migrated;
        self.missing += other.missing;
        self.failed += other.failed;
        self
    }
}

/// Uploads file records to an object store with a fixed worker pool
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    workers: usize,
    migrated_total: AtomicU64,
}

impl UploadPipeline {
    /// Create a pipeline with `workers` concurrent uploaders (at least one)
    pub fn new(store: Arc<dyn ObjectStore>, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
            migrated_total: AtomicU64::new(0),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Files migrated by this pipeline across all calls
    pub fn migrated_total(&self) -> u64 {
        self.migrated_total.load(Ordering::SeqCst)
    }

    /// Upload every record, updating each one in place
    ///
    /// Returns the batch statistics once all workers have finished. If
    /// `cancel` becomes `true` while records are still being fed, no further
    /// records are queued, the ones already queued are drained, and
    /// [`PipelineError::Cancelled`] is returned.
    pub async fn upload_files(
        &self,
        records: &mut [FileRecord],
        cancel: &watch::Receiver<bool>,
    ) -> Result<BatchStats, PipelineError> {
        let total = records.len();
        let (tx, rx) = mpsc::channel::<&mut FileRecord>(QUEUE_DEPTH);
        let rx = Mutex::new(rx);

        debug!(total, workers = self.workers, "Starting upload workers");

        let mut cancel = cancel.clone();
        let feeder = async move {
            let mut queued = 0usize;
            for record in records {
                if *cancel.borrow() {
                    return false;
                }
                tokio::select! {
                    biased;
                    _ = wait_cancelled(&mut cancel) => return false,
                    sent = tx.send(record) => {
                        if sent.is_err() {
                            // All workers are gone; nothing left to feed.
                            break;
                        }
                        queued += 1;
                    }
                }
            }
            debug!(queued, "Feeder finished");
            true
        };

        let workers = (0..self.workers).map(|id| self.worker(id, &rx));

        let (completed, per_worker) = tokio::join!(feeder, join_all(workers));
        let stats = per_worker
            .into_iter()
            .fold(BatchStats::default(), BatchStats::merge);

        if !completed {
            warn!(
                attempted = stats.attempted,
                total, "Upload cancelled, queued files drained"
            );
            return Err(PipelineError::Cancelled {
                attempted: stats.attempted,
            });
        }

        info!(
            total,
            migrated = stats.migrated,
            missing = stats.missing,
            failed = stats.failed,
            "Upload batch finished"
        );
        Ok(stats)
    }

    /// Pull records off the shared queue until it is closed
    async fn worker(
        &self,
        id: usize,
        rx: &Mutex<mpsc::Receiver<&mut FileRecord>>,
    ) -> BatchStats {
        let mut stats = BatchStats::default();
        loop {
            let next = rx.lock().await.recv().await;
            let Some(record) = next else {
                break;
            };
            stats.record(self.upload_one(record).await);
        }
        debug!(worker = id, processed = stats.attempted, "Upload worker exiting");
        stats
    }

    /// Upload a single record and flag it on success
    async fn upload_one(&self, record: &mut FileRecord) -> UploadOutcome {
        let derived = derive_key(&record.source_path).and_then(|key| {
            derive_destination_dir(self.store.bucket(), &record.source_path).map(|dir| (key, dir))
        });
        let (key, destination_dir) = match derived {
            Ok(derived) => derived,
            Err(e) => {
                error!(file_id = record.id, error = %e, "Cannot derive object key");
                metrics::record_upload_failure();
                return UploadOutcome::Failed;
            }
        };

        match self.store.upload_file(&record.source_path, &key).await {
            Ok(()) => {
                record.mark_migrated(destination_dir);
                self.migrated_total.fetch_add(1, Ordering::SeqCst);
                metrics::record_file_migrated();
                UploadOutcome::Migrated
            }
            Err(e) if e.is_not_found() => {
                debug!(file_id = record.id, path = %record.source_path, "Source file missing");
                metrics::record_file_missing();
                UploadOutcome::Missing
            }
            Err(e) => {
                error!(
                    file_id = record.id,
                    path = %record.source_path,
                    key = %key,
                    error = %e,
                    "Failed to upload file"
                );
                metrics::record_upload_failure();
                UploadOutcome::Failed
            }
        }
    }
}

/// Resolve once `cancel` reads `true`; never resolves if the sender is gone
pub(crate) async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use aws_sdk_s3::primitives::ByteStream;
    use test_case::test_case;

    use super::*;
    use crate::object_store::ObjectStoreError;

    const BUCKET: &str = "bucket";

    /// Object store that records calls instead of talking to S3
    #[derive(Default)]
    struct MockStore {
        missing: HashSet<String>,
        failing: HashSet<String>,
        uploads: StdMutex<Vec<(String, String)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        /// Flip this to `true` after the given number of uploads started
        cancel_after: Option<(usize, watch::Sender<bool>)>,
    }

    impl MockStore {
        fn uploaded_keys(&self) -> Vec<String> {
            let mut keys: Vec<_> = self
                .uploads
                .lock()
                .unwrap()
                .iter()
                .map(|(_, key)| key.clone())
                .collect();
            keys.sort();
            keys
        }

        fn attempts(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStore for MockStore {
        fn bucket(&self) -> &str {
            BUCKET
        }

        async fn put(&self, _key: &str, _body: ByteStream) -> Result<(), ObjectStoreError> {
            Ok(())
        }

        async fn upload_file(&self, source_path: &str, key: &str) -> Result<(), ObjectStoreError> {
            let started = {
                let mut uploads = self.uploads.lock().unwrap();
                uploads.push((source_path.to_string(), key.to_string()));
                uploads.len()
            };
            if let Some((after, tx)) = &self.cancel_after {
                if started == *after {
                    tx.send_replace(true);
                }
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.missing.contains(source_path) {
                return Err(ObjectStoreError::NotFound(source_path.to_string()));
            }
            if self.failing.contains(source_path) {
                return Err(ObjectStoreError::Put {
                    bucket: BUCKET.to_string(),
                    key: key.to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    fn make_records(n: usize) -> Vec<FileRecord> {
        (0..n)
            .map(|i| {
                FileRecord::new(
                    i as i64,
                    format!(r"C:\inetpub\4kam_files\disk2\2020010{}\photo_{}.jpg", i % 3, i),
                )
            })
            .collect()
    }

    fn never_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        rx
    }

    /// Every record is either fully migrated or untouched
    fn assert_consistent(records: &[FileRecord]) {
        for r in records {
            if r.migrated {
                assert!(r.stored, "record {} migrated but not stored", r.id);
                assert!(!r.destination_dir.is_empty());
            } else {
                assert!(!r.stored, "record {} stored but not migrated", r.id);
                assert!(r.destination_dir.is_empty());
            }
        }
    }

    #[test_case(1 ; "one worker")]
    #[test_case(2 ; "two workers")]
    #[test_case(10 ; "ten workers")]
    #[tokio::test]
    async fn test_counter_matches_successes(workers: usize) {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), workers);
        let mut records = make_records(25);

        let stats = pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        assert_eq!(pipeline.migrated_total(), 25);
        assert_eq!(stats.attempted, 25);
        assert_eq!(stats.migrated, 25);
        assert_eq!(store.attempts(), 25);
        assert!(records.iter().all(|r| r.migrated));
        assert_consistent(&records);
    }

    #[tokio::test]
    async fn test_records_updated_in_place() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 3);
        let mut records = vec![FileRecord::new(
            42,
            r"C:\inetpub\4kam_files\disk2\20200102\photo.jpg",
        )];

        pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        assert_eq!(store.uploaded_keys(), vec!["20200102/photo.jpg"]);
        assert_eq!(records[0].destination_dir, "bucket/20200102");
        assert!(records[0].migrated && records[0].stored);
    }

    #[tokio::test]
    async fn test_missing_source_is_isolated() {
        let records_template = make_records(6);
        let missing = records_template[2].source_path.clone();
        let store = Arc::new(MockStore {
            missing: HashSet::from([missing.clone()]),
            ..Default::default()
        });
        let pipeline = UploadPipeline::new(store.clone(), 4);
        let mut records = records_template;

        let stats = pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        assert_eq!(stats.missing, 1);
        assert_eq!(stats.migrated, 5);
        assert_eq!(pipeline.migrated_total(), 5);
        for r in &records {
            assert_eq!(r.migrated, r.source_path != missing);
        }
        assert_consistent(&records);
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_abort() {
        let mut records = make_records(5);
        let failing = records[0].source_path.clone();
        let store = Arc::new(MockStore {
            failing: HashSet::from([failing]),
            ..Default::default()
        });
        let pipeline = UploadPipeline::new(store.clone(), 2);

        let stats = pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        assert_eq!(
            stats,
            BatchStats {
                attempted: 5,
                migrated: 4,
                missing: 0,
                failed: 1,
            }
        );
        assert!(!records[0].migrated);
        assert_consistent(&records);
    }

    #[tokio::test]
    async fn test_underivable_path_is_a_record_failure() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 2);
        let mut records = vec![
            FileRecord::new(1, "no-separators.jpg"),
            FileRecord::new(2, r"dir\ok.jpg"),
            FileRecord::new(3, r"\root.jpg"),
        ];

        let stats = pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.migrated, 2);
        // The bad path never reaches the object store, an empty parent does
        assert_eq!(store.uploaded_keys(), vec!["/root.jpg", "dir/ok.jpg"]);
        assert_eq!(records[2].destination_dir, "bucket/");
        assert_consistent(&records);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 10);
        let mut records: Vec<FileRecord> = Vec::new();

        let stats = pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        assert_eq!(stats, BatchStats::default());
        assert_eq!(store.attempts(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_bounded_by_workers() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 3);
        let mut records = make_records(30);

        pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();

        let max = store.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "saw {} concurrent uploads", max);
        assert!(max >= 2, "workers never overlapped");
    }

    #[tokio::test]
    async fn test_zero_workers_clamped_to_one() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 0);
        assert_eq!(pipeline.workers(), 1);

        let mut records = make_records(3);
        let stats = pipeline
            .upload_files(&mut records, &never_cancel())
            .await
            .unwrap();
        assert_eq!(stats.migrated, 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 4);
        let mut records = make_records(10);
        let (_tx, rx) = watch::channel(true);

        let err = pipeline.upload_files(&mut records, &rx).await.unwrap_err();

        assert_eq!(err, PipelineError::Cancelled { attempted: 0 });
        assert_eq!(store.attempts(), 0);
        assert!(records.iter().all(|r| !r.migrated));
    }

    #[tokio::test]
    async fn test_cancelled_mid_feed() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let store = Arc::new(MockStore {
            cancel_after: Some((4, cancel_tx)),
            ..Default::default()
        });
        let pipeline = UploadPipeline::new(store.clone(), 2);
        let mut records = make_records(50);

        let err = pipeline
            .upload_files(&mut records, &cancel_rx)
            .await
            .unwrap_err();

        let PipelineError::Cancelled { attempted } = err;
        assert!(attempted >= 4, "only {} attempted", attempted);
        assert!(attempted < 50, "cancellation did not stop the feeder");
        assert_eq!(attempted, store.attempts());

        // Started uploads ran to completion
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);
        let migrated = records.iter().filter(|r| r.migrated).count();
        assert_eq!(migrated, attempted);
        assert_eq!(pipeline.migrated_total(), attempted as u64);
        assert_consistent(&records);
    }

    #[tokio::test]
    async fn test_counter_accumulates_across_batches() {
        let store = Arc::new(MockStore::default());
        let pipeline = UploadPipeline::new(store.clone(), 2);

        let mut first = make_records(3);
        let mut second = make_records(4);
        pipeline.upload_files(&mut first, &never_cancel()).await.unwrap();
        pipeline.upload_files(&mut second, &never_cancel()).await.unwrap();

        assert_eq!(pipeline.migrated_total(), 7);
    }
}
