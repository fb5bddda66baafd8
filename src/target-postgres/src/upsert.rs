// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Staging-table upserts.
//!
//! A batch is bulk copied into a session-temporary table shaped like the
//! permanent one, then merged: rows whose key already exists are updated in
//! place, the rest are inserted. Streams without a key are appended.
//!
//! The whole load of one batch runs in a single transaction, so a batch either
//! lands completely or not at all. On failure the transaction is rolled back,
//! which also discards the temporary table.

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway::Connection;
use crate::sql::TableStatements;

/// Loads `data`, CSV rows in canonical column order, into the permanent table.
///
/// Returns the number of rows updated plus the number inserted. When this
/// returns an error nothing of the batch has been applied.
pub async fn upsert<C: Connection + ?Sized>(
    conn: &C,
    statements: &TableStatements<'_>,
    data: Bytes,
) -> Result<u64, GatewayError> {
    let result = async {
        transaction(conn, "BEGIN").await?;
        stage(conn, statements, data).await?;
        let affected = apply(conn, statements).await?;
        transaction(conn, "COMMIT").await?;
        Ok(affected)
    }
    .await;
    if result.is_err() {
        discard(conn, statements).await;
    }
    result
}

async fn transaction<C: Connection + ?Sized>(
    conn: &C,
    statement: &str,
) -> Result<(), GatewayError> {
    info!(%statement, "transaction");
    conn.batch_execute(statement).await
}

/// Creates a fresh temporary table and copies `data` into it.
pub async fn stage<C: Connection + ?Sized>(
    conn: &C,
    statements: &TableStatements<'_>,
    data: Bytes,
) -> Result<u64, GatewayError> {
    for statement in [statements.drop_temp_table(), statements.create_table(true)] {
        info!(%statement, "staging");
        conn.execute(&statement).await?;
    }
    let statement = statements.copy_into_temp_table();
    info!(%statement, bytes = data.len(), "copying batch");
    let copied = conn.copy_in(&statement, data).await?;
    debug!(copied, "batch staged");
    Ok(copied)
}

/// Merges the staged rows into the permanent table and drops the temporary
/// table.
pub async fn apply<C: Connection + ?Sized>(
    conn: &C,
    statements: &TableStatements<'_>,
) -> Result<u64, GatewayError> {
    let mut affected = 0;
    if statements.has_keys() {
        let statement = statements.update_from_temp_table();
        info!(%statement, "updating existing rows");
        affected += conn.execute(&statement).await?;
    }
    let statement = statements.insert_from_temp_table();
    info!(%statement, "inserting new rows");
    affected += conn.execute(&statement).await?;

    let statement = statements.drop_temp_table();
    info!(%statement, "dropping staging table");
    conn.execute(&statement).await?;
    Ok(affected)
}

/// Rolls back the batch's transaction and drops the temporary table, ignoring
/// failures.
pub async fn discard<C: Connection + ?Sized>(conn: &C, statements: &TableStatements<'_>) {
    if let Err(e) = transaction(conn, "ROLLBACK").await {
        warn!("failed to roll back batch: {e}");
    }
    let statement = statements.drop_temp_table();
    if let Err(e) = conn.execute(&statement).await {
        warn!(%statement, "failed to drop staging table: {e}");
    }
}
