// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The database as seen by a sync session.
//!
//! A [`Connection`] executes statements, bulk loads rows with `COPY`, and
//! answers the handful of catalog questions the table synchronizer asks.
//! Pooling and retries are not its concern; transactions are opened and
//! closed by the caller through [`Connection::batch_execute`].

use std::pin::pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio_postgres::{Client, CopyInSink, NoTls};
use tracing::{error, info};

use crate::config::ConnectionConfig;
use crate::error::{GatewayError, SyncError};

/// A column of a live table, as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub data_type: String,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        TableColumn {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Executes a statement, returning the number of rows it affected.
    async fn execute(&self, statement: &str) -> Result<u64, GatewayError>;

    /// Executes statements through the simple query protocol. Used for
    /// transaction control.
    async fn batch_execute(&self, statements: &str) -> Result<(), GatewayError>;

    /// Runs a `COPY ... FROM STDIN` statement, streaming `data` into it.
    async fn copy_in(&self, statement: &str, data: Bytes) -> Result<u64, GatewayError>;

    /// Whether the schema namespace exists.
    async fn schema_exists(&self, schema: &str) -> Result<bool, GatewayError>;

    /// Names of the tables in a schema namespace.
    async fn table_names(&self, schema: &str) -> Result<Vec<String>, GatewayError>;

    /// Columns of a table, matched case-insensitively on schema and table.
    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TableColumn>, GatewayError>;
}

/// A [`Connection`] to a Postgres server.
pub struct PostgresConnection {
    client: Client,
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection").finish_non_exhaustive()
    }
}

impl PostgresConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, SyncError> {
        let pg_config = config.pg_config()?;
        info!(
            host = ?pg_config.get_hosts(),
            dbname = ?pg_config.get_dbname(),
            "connecting to postgres"
        );
        let (client, conn) = pg_config.connect(NoTls).await.map_err(GatewayError::from)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                error!("postgres connection error: {e}");
            }
        });
        Ok(PostgresConnection { client })
    }

    /// Wraps an already established client.
    pub fn new(client: Client) -> Self {
        PostgresConnection { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&self, statement: &str) -> Result<u64, GatewayError> {
        Ok(self.client.execute(statement, &[]).await?)
    }

    async fn batch_execute(&self, statements: &str) -> Result<(), GatewayError> {
        Ok(self.client.batch_execute(statements).await?)
    }

    async fn copy_in(&self, statement: &str, data: Bytes) -> Result<u64, GatewayError> {
        let sink: CopyInSink<Bytes> = self.client.copy_in(statement).await?;
        let mut sink = pin!(sink);
        sink.as_mut().send(data).await?;
        Ok(sink.finish().await?)
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, GatewayError> {
        let rows = self
            .client
            .query(
                "SELECT schema_name::text FROM information_schema.schemata
                 WHERE schema_name::text = $1",
                &[&schema],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn table_names(&self, schema: &str) -> Result<Vec<String>, GatewayError> {
        let rows = self
            .client
            .query(
                "SELECT table_name::text AS table_name FROM information_schema.tables
                 WHERE lower(table_schema::text) = lower($1)",
                &[&schema],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get("table_name")).collect())
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TableColumn>, GatewayError> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text AS column_name, data_type::text AS data_type
                 FROM information_schema.columns
                 WHERE lower(table_name::text) = lower($1)
                    AND lower(table_schema::text) = lower($2)
                 ORDER BY ordinal_position",
                &[&table, &schema],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| TableColumn {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
            })
            .collect())
    }
}
