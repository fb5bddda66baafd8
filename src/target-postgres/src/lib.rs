// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Synchronizes schema-described record streams into PostgreSQL tables.
//!
//! A stream arrives as a JSON schema, an optional list of key properties and
//! batches of JSON records. Nested objects are flattened into columns whose
//! names are path-derived identifiers that fit Postgres' 63 byte limit. The
//! target table is created or converged to the flattened shape, and each
//! batch is bulk copied into a session-temporary staging table and then merged
//! into the permanent table: updated and inserted by key when the stream has
//! one, appended otherwise.
//!
//! ```no_run
//! # async fn load() -> Result<(), target_postgres::SyncError> {
//! use serde_json::json;
//! use target_postgres::{ConnectionConfig, PostgresConnection, StreamSchema, SyncSession};
//!
//! let config = ConnectionConfig::from_path("config.json".as_ref())?;
//! let conn = PostgresConnection::connect(&config).await?;
//! let stream = StreamSchema::from_message(json!({
//!     "stream": "users",
//!     "key_properties": ["id"],
//!     "schema": {"properties": {"id": {"type": "integer"}}},
//! }))?;
//!
//! let mut session = SyncSession::from_config(conn, &config, stream)?;
//! session.create_schema_if_not_exists().await?;
//! let mut batch = session.new_batch();
//! batch.push_record(json!({"id": 1}).as_object().expect("object"));
//! session.load_batch(&batch).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flatten;
pub mod gateway;
pub mod inflect;
pub mod logging;
pub mod mem;
pub mod reject;
pub mod schema;
pub mod session;
pub mod sql;
pub mod stage;
pub mod sync;
pub mod types;
pub mod upsert;

pub use crate::config::{ConnectionConfig, SyncOptions};
pub use crate::error::{
    CatalogError, ConfigError, GatewayError, LoadError, SchemaError, SyncError,
};
pub use crate::flatten::{FlatRecord, FlattenedSchema, flatten_record, flatten_schema};
pub use crate::gateway::{Connection, PostgresConnection, TableColumn};
pub use crate::inflect::{Identifier, inflect};
pub use crate::reject::{DirectoryRejectionSink, RejectionSink};
pub use crate::schema::StreamSchema;
pub use crate::session::{LoadOutcome, SyncSession};
pub use crate::stage::Batch;
pub use crate::sync::SyncOutcome;
pub use crate::types::{ColumnType, column_type};
