// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An in-memory [`Connection`] that records what it is asked to do.
//!
//! It does not interpret statements: the catalog it reports is exactly the
//! one it was built with. Useful for dry runs and for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::GatewayError;
use crate::gateway::{Connection, TableColumn};

/// Something a [`MemConnection`] was asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executed {
    Statement(String),
    Copy { statement: String, data: Bytes },
}

impl Executed {
    pub fn statement(&self) -> &str {
        match self {
            Executed::Statement(statement) => statement,
            Executed::Copy { statement, .. } => statement,
        }
    }
}

#[derive(Debug, Default)]
struct MemState {
    schemas: BTreeSet<String>,
    // Keyed by lowercased (schema, table).
    tables: BTreeMap<(String, String), (String, Vec<TableColumn>)>,
    log: Vec<Executed>,
    copy_failure: Option<GatewayError>,
    execute_failures: Vec<(String, GatewayError)>,
}

#[derive(Debug, Default)]
pub struct MemConnection {
    state: Mutex<MemState>,
}

impl MemConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(self, schema: &str) -> Self {
        self.lock().schemas.insert(schema.to_string());
        self
    }

    /// Adds a table to the reported catalog.
    pub fn with_table(self, schema: &str, table: &str, columns: Vec<TableColumn>) -> Self {
        {
            let mut state = self.lock();
            state.schemas.insert(schema.to_string());
            state.tables.insert(
                (schema.to_lowercase(), table.to_lowercase()),
                (table.to_string(), columns),
            );
        }
        self
    }

    /// Makes the next `COPY` fail with `error`.
    pub fn fail_next_copy(&self, error: GatewayError) {
        self.lock().copy_failure = Some(error);
    }

    /// Makes the next statement starting with `prefix` fail with `error`.
    pub fn fail_next_statement(&self, prefix: &str, error: GatewayError) {
        self.lock()
            .execute_failures
            .push((prefix.to_string(), error));
    }

    /// Everything executed so far, in order.
    pub fn executed(&self) -> Vec<Executed> {
        self.lock().log.clone()
    }

    /// The text of every statement executed so far, `COPY`s included.
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .map(|executed| executed.statement().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.lock().log.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl Connection for MemConnection {
    async fn execute(&self, statement: &str) -> Result<u64, GatewayError> {
        let mut state = self.lock();
        state.log.push(Executed::Statement(statement.to_string()));
        let failure = state
            .execute_failures
            .iter()
            .position(|(prefix, _)| statement.starts_with(prefix.as_str()));
        match failure {
            Some(i) => Err(state.execute_failures.remove(i).1),
            None => Ok(0),
        }
    }

    async fn batch_execute(&self, statements: &str) -> Result<(), GatewayError> {
        self.execute(statements).await.map(|_| ())
    }

    async fn copy_in(&self, statement: &str, data: Bytes) -> Result<u64, GatewayError> {
        let mut state = self.lock();
        let rows = data.iter().filter(|b| **b == b'\n').count();
        state.log.push(Executed::Copy {
            statement: statement.to_string(),
            data,
        });
        match state.copy_failure.take() {
            Some(error) => Err(error),
            None => u64::try_from(rows).map_err(|e| GatewayError::Other(e.into())),
        }
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, GatewayError> {
        Ok(self.lock().schemas.contains(schema))
    }

    async fn table_names(&self, schema: &str) -> Result<Vec<String>, GatewayError> {
        let schema = schema.to_lowercase();
        Ok(self
            .lock()
            .tables
            .iter()
            .filter(|((s, _), _)| *s == schema)
            .map(|(_, (name, _))| name.clone())
            .collect())
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<TableColumn>, GatewayError> {
        Ok(self
            .lock()
            .tables
            .get(&(schema.to_lowercase(), table.to_lowercase()))
            .map(|(_, columns)| columns.clone())
            .unwrap_or_default())
    }
}
