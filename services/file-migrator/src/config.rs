// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for the file migrator

use anyhow::{Context, Result, bail};

use crate::migrate::MigrateOptions;
use crate::object_store::S3Settings;
use crate::pipeline::DEFAULT_UPLOAD_WORKERS;
use crate::types::DateRange;

/// Default S3-compatible endpoint
pub const DEFAULT_S3_ENDPOINT: &str = "https://storage.yandexcloud.net";

/// Default region for the S3 endpoint
pub const DEFAULT_S3_REGION: &str = "ru-central1";

/// Content type attached to every uploaded object
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpg";

/// Migrator configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct MigratorConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Window of file dates to migrate
    pub date_range: DateRange,

    /// Object store endpoint, credentials and bucket
    pub s3: S3Settings,

    /// Number of concurrent upload workers
    pub upload_workers: usize,

    /// Stop after this many batches (unbounded when `None`)
    pub max_batches: Option<u32>,

    /// Delete local source files after their bookkeeping is committed
    pub remove_source_files: bool,
}

impl MigratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} environment variable required", name))
        };

        let database_url = required("DATABASE_URL")?;

        let begin_date = required("BEGIN_DATE")?;
        let end_date = required("END_DATE")?;
        let date_range =
            DateRange::parse(&begin_date, &end_date).context("Invalid BEGIN_DATE/END_DATE")?;

        let s3 = S3Settings {
            endpoint_url: lookup("S3_ENDPOINT").unwrap_or_else(|| DEFAULT_S3_ENDPOINT.to_string()),
            region: lookup("S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
            bucket: required("BUCKET_NAME")?,
            content_type: lookup("CONTENT_TYPE")
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        };

        let upload_workers: usize = lookup("UPLOAD_WORKERS")
            .unwrap_or_else(|| DEFAULT_UPLOAD_WORKERS.to_string())
            .trim()
            .parse()
            .context("Invalid UPLOAD_WORKERS")?;
        if upload_workers == 0 {
            bail!("UPLOAD_WORKERS must be at least 1");
        }

        let max_batches = lookup("MAX_BATCHES")
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .context("Invalid MAX_BATCHES")?;

        // Accepts "true", "1", "yes" (case-insensitive) as true, anything else as false
        let remove_source_files = lookup("REMOVE_SOURCE_FILES")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            date_range,
            s3,
            upload_workers,
            max_batches,
            remove_source_files,
        })
    }

    /// Driver options derived from this configuration
    pub fn migrate_options(&self) -> MigrateOptions {
        MigrateOptions {
            remove_source_files: self.remove_source_files,
            max_batches: self.max_batches,
        }
    }

    /// Return a display-safe version of the database URL (password masked)
    pub fn database_url_display(&self) -> String {
        // URL format: scheme://[user[:password]@]host[:port]/path
        let authority_start = match self.database_url.find("://") {
            Some(pos) => pos + 3,
            None => return self.database_url.clone(),
        };

        // The last @ ends the userinfo section, passwords may contain '@'
        let at_pos = match self.database_url[authority_start..].rfind('@') {
            Some(pos) => authority_start + pos,
            None => return self.database_url.clone(),
        };

        if let Some(relative_colon_pos) = self.database_url[authority_start..at_pos].find(':') {
            let colon_pos = authority_start + relative_colon_pos;
            let prefix = &self.database_url[..colon_pos + 1];
            let suffix = &self.database_url[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }

        self.database_url.clone()
    }
}
