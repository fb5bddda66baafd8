// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A sync session: one stream, one schema, a sequence of batches.
//!
//! The flattened schema is computed once when the session is built and never
//! changes afterwards. The table is synchronized lazily before the first batch
//! and again after [`SyncSession::invalidate_table`]. Each batch is fully
//! staged, merged and cleaned up before the next one is accepted.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ConnectionConfig, SyncOptions};
use crate::error::{LoadError, SchemaError, SyncError};
use crate::flatten::{FlatRecord, FlattenedSchema, flatten_schema};
use crate::gateway::Connection;
use crate::inflect::{Identifier, inflect};
use crate::reject::{DirectoryRejectionSink, RejectionSink};
use crate::schema::StreamSchema;
use crate::sql::{TableStatements, create_schema, table_name};
use crate::stage::{Batch, record_primary_key_string};
use crate::sync::{SyncOutcome, sync_table};
use crate::upsert::upsert;

/// The result of loading one batch.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded { rows_affected: u64 },
    /// The database refused the batch's data. The session is still usable.
    Rejected {
        error: LoadError,
        rejected_count: usize,
    },
}

impl LoadOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, LoadOutcome::Rejected { .. })
    }
}

pub struct SyncSession<C> {
    conn: C,
    schema: String,
    stream: String,
    table: String,
    columns: Arc<FlattenedSchema>,
    keys: Vec<Identifier>,
    options: SyncOptions,
    sink: Option<Box<dyn RejectionSink>>,
    table_synced: bool,
    batches: usize,
    rejected_count: usize,
}

impl<C: std::fmt::Debug> std::fmt::Debug for SyncSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("conn", &self.conn)
            .field("schema", &self.schema)
            .field("stream", &self.stream)
            .field("table_synced", &self.table_synced)
            .field("batches", &self.batches)
            .field("rejected_count", &self.rejected_count)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> SyncSession<C> {
    /// Flattens the stream's schema and checks its key properties.
    ///
    /// Fails without touching the database when the schema is malformed.
    pub fn new(conn: C, schema: &str, stream: StreamSchema) -> Result<Self, SchemaError> {
        let columns = flatten_schema(&stream.schema)?;
        for warning in columns.warnings() {
            warn!(stream = %stream.stream, "{warning}");
        }

        let keys = stream
            .key_properties
            .iter()
            .map(|property| {
                let key = inflect(&[property]);
                if columns.contains(&key) {
                    Ok(key)
                } else {
                    Err(SchemaError::UnknownKeyProperty {
                        stream: stream.stream.clone(),
                        property: property.clone(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SyncSession {
            conn,
            schema: schema.to_string(),
            table: table_name(&stream.stream),
            stream: stream.stream,
            columns: Arc::new(columns),
            keys,
            options: SyncOptions::default(),
            sink: None,
            table_synced: false,
            batches: 0,
            rejected_count: 0,
        })
    }

    /// Builds a session targeting the configured schema, with the configured
    /// options and rejected batch directory.
    pub fn from_config(
        conn: C,
        config: &ConnectionConfig,
        stream: StreamSchema,
    ) -> Result<Self, SchemaError> {
        let mut session =
            Self::new(conn, &config.schema, stream)?.with_options(config.sync_options());
        if let Some(dir) = config.rejected_dir() {
            session = session.with_rejection_sink(DirectoryRejectionSink::new(dir));
        }
        Ok(session)
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_rejection_sink(mut self, sink: impl RejectionSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn flattened_schema(&self) -> &FlattenedSchema {
        &self.columns
    }

    pub fn key_columns(&self) -> &[Identifier] {
        &self.keys
    }

    /// The number of batches rejected so far.
    pub fn rejected_count(&self) -> usize {
        self.rejected_count
    }

    pub fn statements(&self) -> TableStatements<'_> {
        TableStatements::new(&self.schema, &self.table, &self.columns, &self.keys)
    }

    /// An empty batch deduplicating on this stream's key.
    pub fn new_batch(&self) -> Batch {
        Batch::new(Arc::clone(&self.columns), self.keys.clone())
    }

    pub fn record_primary_key_string(&self, record: &FlatRecord) -> Option<String> {
        record_primary_key_string(&self.keys, record)
    }

    pub async fn create_schema_if_not_exists(&self) -> Result<(), SyncError> {
        if self.conn.schema_exists(&self.schema).await? {
            return Ok(());
        }
        let statement = create_schema(&self.schema);
        info!(%statement, "schema does not exist, creating");
        self.conn.execute(&statement).await?;
        Ok(())
    }

    /// Creates or converges the stream's table.
    pub async fn sync_table(&mut self) -> Result<SyncOutcome, SyncError> {
        let outcome = sync_table(
            &self.conn,
            &self.schema,
            &self.table,
            &self.statements(),
            self.options,
        )
        .await?;
        self.table_synced = true;
        Ok(outcome)
    }

    /// Forces the table to be synchronized again before the next batch.
    pub fn invalidate_table(&mut self) {
        self.table_synced = false;
    }

    /// Loads a batch, synchronizing the table first if needed.
    ///
    /// A batch the database refuses because of its data is rejected: it is
    /// handed to the rejection sink, if any, and counted, and the session
    /// continues. Any other failure is returned.
    pub async fn load_batch(&mut self, batch: &Batch) -> Result<LoadOutcome, SyncError> {
        if batch.is_empty() {
            return Ok(LoadOutcome::Loaded { rows_affected: 0 });
        }
        self.batches += 1;
        if !self.table_synced {
            self.sync_table().await?;
        }

        let data = batch.encode();
        info!(stream = %self.stream, rows = batch.len(), "loading batch");
        let result = upsert(&self.conn, &self.statements(), data.clone()).await;
        match result {
            Ok(rows_affected) => {
                info!(stream = %self.stream, rows_affected, "batch loaded");
                Ok(LoadOutcome::Loaded { rows_affected })
            }
            Err(source) if source.is_data_error() => {
                self.rejected_count += 1;
                let error = LoadError {
                    stream: self.stream.clone(),
                    batch: self.batches,
                    rows: batch.len(),
                    source,
                };
                warn!(
                    rejected_count = self.rejected_count,
                    "rejecting batch: {error}"
                );
                if let Some(sink) = &self.sink {
                    sink.reject(&self.stream, self.rejected_count, &data)
                        .await
                        .map_err(SyncError::Rejection)?;
                }
                Ok(LoadOutcome::Rejected {
                    error,
                    rejected_count: self.rejected_count,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::TableColumn;
    use crate::inflect::MAX_IDENTIFIER_LEN;
    use crate::mem::MemConnection;

    fn stream(key_properties: &[&str]) -> StreamSchema {
        StreamSchema::from_message(json!({
            "stream": "Users",
            "key_properties": key_properties,
            "schema": {
                "properties": {
                    "id": {"type": "integer"},
                    "name": {"type": ["null", "string"]},
                    "notes": {}
                }
            }
        }))
        .unwrap()
    }

    fn batch(session: &SyncSession<MemConnection>, records: serde_json::Value) -> Batch {
        let mut batch = session.new_batch();
        for record in records.as_array().unwrap() {
            batch.push_record(record.as_object().unwrap());
        }
        batch
    }

    #[test]
    fn test_unknown_key_property() {
        let err = SyncSession::new(MemConnection::new(), "public", stream(&["uuid"])).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownKeyProperty {
                stream: "Users".into(),
                property: "uuid".into(),
            }
        );
    }

    #[test]
    fn test_schema_warnings_surface() {
        let session = SyncSession::new(MemConnection::new(), "public", stream(&["id"])).unwrap();
        assert_eq!(
            session.flattened_schema().warnings(),
            ["Empty definition for notes."]
        );
        assert_eq!(session.key_columns(), [inflect(&["id"])]);
    }

    #[tokio::test]
    async fn test_create_schema_if_not_exists() {
        let session = SyncSession::new(MemConnection::new(), "raw", stream(&[])).unwrap();
        session.create_schema_if_not_exists().await.unwrap();
        assert_eq!(
            session.connection().statements(),
            [r#"CREATE SCHEMA IF NOT EXISTS "raw""#]
        );

        let conn = MemConnection::new().with_schema("raw");
        let session = SyncSession::new(conn, "raw", stream(&[])).unwrap();
        session.create_schema_if_not_exists().await.unwrap();
        assert!(session.connection().statements().is_empty());
    }

    #[tokio::test]
    async fn test_load_batch_syncs_table_once() {
        let mut session =
            SyncSession::new(MemConnection::new(), "public", stream(&["id"])).unwrap();
        let first = batch(&session, json!([{"id": 1, "name": "a"}]));
        let outcome = session.load_batch(&first).await.unwrap();
        assert!(!outcome.is_rejected());

        let statements = session.connection().statements();
        assert_eq!(
            statements[0],
            r#"CREATE TABLE "public"."users" ("id" bigint, "name" character varying, PRIMARY KEY ("id"))"#
        );
        assert_eq!(statements.len(), 9);

        session.connection().clear();
        let second = batch(&session, json!([{"id": 1, "name": "b"}, {"id": 2}]));
        session.load_batch(&second).await.unwrap();
        let statements = session.connection().statements();
        assert!(statements.iter().all(|s| !s.starts_with("CREATE TABLE")));
        assert_eq!(statements.len(), 8);
    }

    #[tokio::test]
    async fn test_long_stream_name_finds_its_table() {
        let name = format!("Clickstream{}", "Event".repeat(12));
        let table = table_name(&name);
        assert!(table.len() < MAX_IDENTIFIER_LEN);
        let conn = MemConnection::new().with_table(
            "public",
            &table,
            vec![
                TableColumn::new("id", "bigint"),
                TableColumn::new("name", "character varying"),
            ],
        );
        let mut stream = stream(&["id"]);
        stream.stream = name;
        let mut session = SyncSession::new(conn, "public", stream).unwrap();

        let outcome = session.sync_table().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Converged {
                added: vec![],
                replaced: vec![],
            }
        );
        assert!(session.connection().statements().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let mut session = SyncSession::new(MemConnection::new(), "public", stream(&[])).unwrap();
        let empty = session.new_batch();
        let outcome = session.load_batch(&empty).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Loaded { rows_affected: 0 }));
        assert!(session.connection().statements().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_batch_is_saved_and_session_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = MemConnection::new().with_table(
            "public",
            "users",
            vec![
                TableColumn::new("id", "bigint"),
                TableColumn::new("name", "character varying"),
            ],
        );
        let mut session = SyncSession::new(conn, "public", stream(&["id"]))
            .unwrap()
            .with_rejection_sink(DirectoryRejectionSink::new(tmp.path()));

        session.connection().fail_next_copy(GatewayError::Data {
            code: "22P02".into(),
            message: "invalid input syntax for type bigint".into(),
        });
        let bad = batch(&session, json!([{"id": "one", "name": "a"}]));
        let outcome = session.load_batch(&bad).await.unwrap();
        match outcome {
            LoadOutcome::Rejected {
                error,
                rejected_count,
            } => {
                assert_eq!(rejected_count, 1);
                assert_eq!(error.batch, 1);
                assert_eq!(error.rows, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(session.rejected_count(), 1);
        assert!(session.connection().statements().iter().any(|s| s == "ROLLBACK"));
        let saved = std::fs::read_to_string(tmp.path().join("Users-0001.rej.csv")).unwrap();
        assert_eq!(saved, "\"one\",\"a\"\n");

        let good = batch(&session, json!([{"id": 2, "name": "b"}]));
        let outcome = session.load_batch(&good).await.unwrap();
        assert!(!outcome.is_rejected());
        assert_eq!(session.rejected_count(), 1);
    }

    #[tokio::test]
    async fn test_non_data_errors_propagate() {
        let conn = MemConnection::new().with_table("public", "users", vec![]);
        let mut session = SyncSession::new(conn, "public", stream(&[])).unwrap();
        session.sync_table().await.unwrap();
        session.connection().fail_next_copy(GatewayError::Other(anyhow::anyhow!(
            "connection reset"
        )));

        let records = batch(&session, json!([{"id": 1}]));
        let err = session.load_batch(&records).await.unwrap_err();
        assert!(matches!(err, SyncError::Gateway(GatewayError::Other(_))));
        assert_eq!(session.rejected_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_table_resyncs() {
        let conn = MemConnection::new().with_table(
            "public",
            "users",
            vec![TableColumn::new("id", "bigint")],
        );
        let mut session = SyncSession::new(conn, "public", stream(&[])).unwrap();
        let outcome = session.sync_table().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Converged { ref added, .. } if added.len() == 1));

        session.connection().clear();
        session.invalidate_table();
        let records = batch(&session, json!([{"id": 1}]));
        session.load_batch(&records).await.unwrap();
        assert!(
            session
                .connection()
                .statements()
                .iter()
                .any(|s| s.starts_with("ALTER TABLE"))
        );
    }
}
