// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Object storage client
//!
//! The pipeline talks to the bucket through the [`ObjectStore`] trait. The
//! production implementation, [`S3ObjectStore`], uses the AWS SDK against an
//! S3-compatible endpoint.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tokio::fs::File;

/// Errors returned by object store operations
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The local source file does not exist
    #[error("source file not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to put s3://{bucket}/{key}: {message}")]
    Put {
        bucket: String,
        key: String,
        message: String,
    },
}

impl ObjectStoreError {
    /// Whether this is the expected "source file is gone" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::NotFound(_))
    }
}

/// Durable blob storage addressed by key within a single bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket objects are written to
    fn bucket(&self) -> &str;

    /// Store `body` under `key`, overwriting any existing object
    async fn put(&self, key: &str, body: ByteStream) -> Result<(), ObjectStoreError>;

    /// Stream a local file into the bucket under `key`
    ///
    /// Fails with [`ObjectStoreError::NotFound`] when the source file is
    /// absent, so callers can tell it apart from transport failures.
    async fn upload_file(&self, source_path: &str, key: &str) -> Result<(), ObjectStoreError> {
        let file = File::open(Path::new(source_path)).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ObjectStoreError::NotFound(source_path.to_string())
            } else {
                ObjectStoreError::Io {
                    path: source_path.to_string(),
                    source: e,
                }
            }
        })?;

        let body = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .map_err(|e| ObjectStoreError::Io {
                path: source_path.to_string(),
                source: io::Error::other(e),
            })?;

        self.put(key, body).await
    }
}

/// Connection settings for an S3-compatible endpoint
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub content_type: String,
}

/// [`ObjectStore`] backed by the AWS SDK
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    content_type: String,
}

impl S3ObjectStore {
    /// Build a client with static credentials and a custom endpoint
    pub async fn new(settings: S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "file-migrator",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region))
            .endpoint_url(settings.endpoint_url)
            .credentials_provider(credentials)
            .load()
            .await;

        Self::from_client(S3Client::new(&sdk_config), settings.bucket, settings.content_type)
    }

    /// Wrap an existing client
    pub fn from_client(client: S3Client, bucket: String, content_type: String) -> Self {
        Self {
            client,
            bucket,
            content_type,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: ByteStream) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&self.content_type)
            .body(body)
            .send()
            .await
            .map_err(|err| ObjectStoreError::Put {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                message: DisplayErrorContext(err).to_string(),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;

    /// Keeps every put in memory
    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        fn bucket(&self) -> &str {
            "memory"
        }

        async fn put(&self, key: &str, body: ByteStream) -> Result<(), ObjectStoreError> {
            let data = body
                .collect()
                .await
                .map_err(|e| ObjectStoreError::Put {
                    bucket: "memory".to_string(),
                    key: key.to_string(),
                    message: e.to_string(),
                })?
                .into_bytes()
                .to_vec();
            self.objects.lock().unwrap().push((key.to_string(), data));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_file_streams_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"jpeg bytes").unwrap();
        drop(file);

        let store = MemoryStore::default();
        store
            .upload_file(path.to_str().unwrap(), "20200102/photo.jpg")
            .await
            .unwrap();

        let objects = store.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].0, "20200102/photo.jpg");
        assert_eq!(objects[0].1, b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.jpg");

        let store = MemoryStore::default();
        let err = store
            .upload_file(path.to_str().unwrap(), "x/gone.jpg")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(store.objects.lock().unwrap().is_empty());
    }
}
