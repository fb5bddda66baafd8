// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Target configuration, read from the JSON config file handed to the target.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const APPLICATION_NAME: &str = "target_postgres";

/// Environment variable naming the directory rejected batches are saved to,
/// when the config file doesn't.
pub const REJECTED_DIR_ENV: &str = "TARGET_REJECTED_DIR";

const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// A full connection url. Takes precedence over the individual fields
    /// when non-empty.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub dbname: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// The schema namespace tables are synchronized into.
    pub schema: String,
    #[serde(default)]
    pub rejected_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub allow_destructive_type_change: bool,
}

fn default_true() -> bool {
    true
}

/// Knobs of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// When a column's type no longer matches the schema, drop and re-add it,
    /// discarding its data. When `false` the mismatch is an error.
    pub allow_destructive_type_change: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            allow_destructive_type_change: true,
        }
    }
}

impl ConnectionConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            allow_destructive_type_change: self.allow_destructive_type_change,
        }
    }

    /// The directory rejected batches are saved to, if any.
    pub fn rejected_dir(&self) -> Option<PathBuf> {
        self.rejected_dir.clone().or_else(|| {
            std::env::var_os(REJECTED_DIR_ENV)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
        })
    }

    pub fn pg_config(&self) -> Result<tokio_postgres::Config, ConfigError> {
        let url = self.url.as_deref().filter(|url| !url.is_empty());
        let mut config = match url {
            Some(url) => url
                .parse::<tokio_postgres::Config>()
                .map_err(ConfigError::InvalidUrl)?,
            None => {
                let mut config = tokio_postgres::Config::new();
                config
                    .host(self.host.as_deref().ok_or(ConfigError::FieldMissing("host"))?)
                    .port(self.port.unwrap_or(DEFAULT_PORT))
                    .dbname(
                        self.dbname
                            .as_deref()
                            .ok_or(ConfigError::FieldMissing("dbname"))?,
                    )
                    .user(self.user.as_deref().ok_or(ConfigError::FieldMissing("user"))?);
                if let Some(password) = &self.password {
                    config.password(password);
                }
                config
            }
        };
        config.application_name(APPLICATION_NAME);
        Ok(config)
    }
}
