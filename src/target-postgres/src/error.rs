// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors raised while synchronizing a stream into Postgres.

use std::path::PathBuf;

/// The input schema is malformed.
///
/// Fatal to the sync session and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unsupported column type anyOf: {property}")]
    UnsupportedAnyOf { property: String },
    #[error("unsupported column type: {property}")]
    UnsupportedProperty { property: String },
    #[error("duplicate column name produced in schema: {column}")]
    DuplicateColumn { column: String },
    #[error("key property {property:?} does not name a column of stream {stream:?}")]
    UnknownKeyProperty { stream: String, property: String },
    #[error("malformed schema message: {0}")]
    Malformed(String),
}

/// An error reported by the [`Connection`](crate::gateway::Connection).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The database rejected the data itself, e.g. a value that does not
    /// parse as the column's type or a violated key constraint.
    #[error("data rejected ({code}): {message}")]
    Data { code: String, message: String },
    #[error("{}", format_postgres_error(.0))]
    Postgres(tokio_postgres::Error),
    /// Any other error we bail on.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether this error should reject the batch rather than end the session.
    pub fn is_data_error(&self) -> bool {
        matches!(self, GatewayError::Data { .. })
    }
}

fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db_error) => {
            let mut msg = format!("database error: {}", db_error.message());
            if let Some(detail) = db_error.detail() {
                msg.push_str(&format!(" (detail: {detail})"));
            }
            msg
        }
        None => format!("postgres error: {error}"),
    }
}

impl From<tokio_postgres::Error> for GatewayError {
    fn from(error: tokio_postgres::Error) -> Self {
        // Class 22 is "data exception", class 23 "integrity constraint violation".
        match error.as_db_error() {
            Some(db_error)
                if db_error.code().code().starts_with("22")
                    || db_error.code().code().starts_with("23") =>
            {
                GatewayError::Data {
                    code: db_error.code().code().to_string(),
                    message: db_error.message().to_string(),
                }
            }
            _ => GatewayError::Postgres(error),
        }
    }
}

/// The live shape of a table could not be read or reconciled.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog for {table}: {source}")]
    Read {
        table: String,
        #[source]
        source: GatewayError,
    },
    #[error(
        "column {column} of {table} has type {observed} but the schema requires {expected}; \
         destructive type changes are disabled"
    )]
    TypeMismatch {
        table: String,
        column: String,
        observed: String,
        expected: String,
    },
}

/// Loading one batch failed because of its content.
///
/// Recovered at batch granularity: the batch is rejected and the session
/// continues.
#[derive(Debug, thiserror::Error)]
#[error("failed to load batch {batch} of {rows} rows into {stream}: {source}")]
pub struct LoadError {
    pub stream: String,
    pub batch: usize,
    pub rows: usize,
    #[source]
    pub source: GatewayError,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration field: {0}")]
    FieldMissing(&'static str),
    #[error("invalid connection url: {0}")]
    InvalidUrl(#[source] tokio_postgres::Error),
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top level error of a sync session.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to persist rejected batch: {0}")]
    Rejection(#[source] std::io::Error),
}
