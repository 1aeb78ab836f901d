// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! PostgreSQL record store using tokio-postgres
//!
//! The migration state itself (which files exist, which are migrated) is owned
//! by the database. This module only calls into it:
//!
//! - `get_files_to_migrate(begin, end)` lists candidate files
//! - `migrated_files` is a staging table of `(file_id, dir_name)` markers
//! - `mark_migrated_files()` promotes staged markers into migrated state
//!
//! Every operation runs in its own READ COMMITTED transaction. Dropping an
//! uncommitted transaction rolls it back, so an error returned with `?` from
//! inside the body leaves the database untouched.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime, Transaction};
use futures_util::pin_mut;
use thiserror::Error;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::Type;
use tokio_postgres::{IsolationLevel, NoTls};
use tracing::debug;

use crate::types::{DateRange, FileRecord, MigratedMarker};

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        DbError::Query(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for DbError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DbError::Connection(e.to_string())
    }
}

/// Relational collaborator holding file metadata and bookkeeping tables
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List files eligible for migration within `range`
    async fn list_candidates(&self, range: &DateRange) -> Result<Vec<FileRecord>, DbError>;

    /// Empty the staging markers table
    async fn reset_staging_markers(&self) -> Result<(), DbError>;

    /// Stage markers for migrated files, returning the number of rows written
    async fn bulk_insert_markers(&self, markers: &[MigratedMarker]) -> Result<u64, DbError>;

    /// Promote staged markers into migrated state
    async fn finalize_migrated_markers(&self) -> Result<(), DbError>;
}

/// [`RecordStore`] backed by a PostgreSQL connection pool
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Create a new database connection pool from a connection URL
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        // Parse the database URL using tokio-postgres
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e| DbError::Connection(format!("Invalid database URL: {}", e)))?;

        // Build deadpool config from tokio-postgres config
        let mut cfg = Config::new();
        if let Some(hosts) = pg_config.get_hosts().first() {
            match hosts {
                tokio_postgres::config::Host::Tcp(host) => {
                    cfg.host = Some(host.clone());
                }
                #[cfg(unix)]
                tokio_postgres::config::Host::Unix(path) => {
                    cfg.host = Some(path.to_string_lossy().to_string());
                }
            }
        }
        if let Some(ports) = pg_config.get_ports().first() {
            cfg.port = Some(*ports);
        }
        if let Some(user) = pg_config.get_user() {
            cfg.user = Some(user.to_string());
        }
        if let Some(password) = pg_config.get_password() {
            cfg.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(dbname) = pg_config.get_dbname() {
            cfg.dbname = Some(dbname.to_string());
        }

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DbError::Connection(format!("Failed to create pool: {}", e)))?;

        // Test the connection
        let client = pool.get().await?;
        client
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| DbError::Connection(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }
}

/// Start a READ COMMITTED transaction on a pooled client
async fn begin(client: &mut deadpool_postgres::Client) -> Result<Transaction<'_>, DbError> {
    let tx = client
        .build_transaction()
        .isolation_level(IsolationLevel::ReadCommitted)
        .start()
        .await
        .map_err(|e| DbError::Connection(format!("Failed to start transaction: {}", e)))?;
    Ok(tx)
}

#[async_trait]
impl RecordStore for Database {
    async fn list_candidates(&self, range: &DateRange) -> Result<Vec<FileRecord>, DbError> {
        let mut client = self.pool.get().await?;
        let tx = begin(&mut client).await?;

        let rows = tx
            .query(
                "SELECT id, file_path FROM get_files_to_migrate($1, $2)",
                &[&range.begin, &range.end],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to list files: {}", e)))?;

        let mut files = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get(0)?;
            let path: String = row.try_get(1)?;
            files.push(FileRecord::new(id, path));
        }

        tx.commit().await?;

        debug!(count = files.len(), range = %range, "Listed candidate files");
        Ok(files)
    }

    async fn reset_staging_markers(&self) -> Result<(), DbError> {
        let mut client = self.pool.get().await?;
        let tx = begin(&mut client).await?;

        tx.batch_execute("TRUNCATE TABLE migrated_files")
            .await
            .map_err(|e| DbError::Query(format!("Failed to truncate migrated_files: {}", e)))?;

        tx.commit().await?;
        Ok(())
    }

    async fn bulk_insert_markers(&self, markers: &[MigratedMarker]) -> Result<u64, DbError> {
        let mut client = self.pool.get().await?;
        let tx = begin(&mut client).await?;

        let sink = tx
            .copy_in("COPY migrated_files (file_id, dir_name) FROM STDIN BINARY")
            .await
            .map_err(|e| DbError::Query(format!("Failed to start copy: {}", e)))?;

        let writer = BinaryCopyInWriter::new(sink, &[Type::INT8, Type::TEXT]);
        pin_mut!(writer);

        for marker in markers {
            writer
                .as_mut()
                .write(&[&marker.file_id, &marker.dir_name])
                .await
                .map_err(|e| {
                    DbError::Query(format!("Failed to add marker for {}: {}", marker.file_id, e))
                })?;
        }

        let written = writer
            .finish()
            .await
            .map_err(|e| DbError::Query(format!("Failed to finish copy: {}", e)))?;

        tx.commit().await?;

        debug!(written, "Staged migrated file markers");
        Ok(written)
    }

    async fn finalize_migrated_markers(&self) -> Result<(), DbError> {
        let mut client = self.pool.get().await?;
        let tx = begin(&mut client).await?;

        tx.batch_execute("CALL mark_migrated_files()")
            .await
            .map_err(|e| DbError::Query(format!("Failed to mark migrated files: {}", e)))?;

        tx.commit().await?;
        Ok(())
    }
}
