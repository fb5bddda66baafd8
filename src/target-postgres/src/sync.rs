// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Convergence of a live table onto the shape of a flattened schema.
//!
//! A missing table is created with every column and, when the stream has a
//! key, a primary key. An existing table gets the columns it lacks, and any
//! column whose type no longer matches is dropped and added back with the new
//! type, which discards the data it held.
//!
//! The live columns are read from the catalog on every pass. Each statement
//! stands alone; no transaction groups them.

use tracing::{info, warn};

use crate::config::SyncOptions;
use crate::error::{CatalogError, SyncError};
use crate::flatten::FlattenedSchema;
use crate::gateway::{Connection, TableColumn};
use crate::inflect::Identifier;
use crate::sql::TableStatements;
use crate::types::{ColumnType, column_type};

/// A change needed to bring a live table in line with the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alteration {
    Add {
        column: Identifier,
        ty: ColumnType,
    },
    Replace {
        column: Identifier,
        observed: String,
        ty: ColumnType,
    },
}

/// What a synchronization pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Converged {
        added: Vec<Identifier>,
        replaced: Vec<Identifier>,
    },
}

/// Diffs the schema's columns against a table's live columns.
///
/// Column names match case-insensitively, as do type names. Additions come
/// first, then replacements, each in canonical column order.
pub fn plan_alterations(columns: &FlattenedSchema, live: &[TableColumn]) -> Vec<Alteration> {
    let live_type = |name: &Identifier| {
        live.iter()
            .find(|column| column.name.to_lowercase() == name.as_str().to_lowercase())
            .map(|column| column.data_type.as_str())
    };

    let mut adds = vec![];
    let mut replaces = vec![];
    for (name, descriptor) in columns.columns() {
        let ty = column_type(descriptor);
        match live_type(name) {
            None => adds.push(Alteration::Add {
                column: name.clone(),
                ty,
            }),
            Some(observed) if !ty.matches(observed) => replaces.push(Alteration::Replace {
                column: name.clone(),
                observed: observed.to_string(),
                ty,
            }),
            Some(_) => {}
        }
    }
    adds.extend(replaces);
    adds
}

/// Creates or converges the permanent table of a stream.
pub async fn sync_table<C: Connection + ?Sized>(
    conn: &C,
    schema: &str,
    table: &str,
    statements: &TableStatements<'_>,
    options: SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let catalog_error = |source| CatalogError::Read {
        table: statements.table().to_string(),
        source,
    };

    let exists = conn
        .table_names(schema)
        .await
        .map_err(catalog_error)?
        .iter()
        .any(|name| name.to_lowercase() == table.to_lowercase());

    if !exists {
        let statement = statements.create_table(false);
        info!(table, %statement, "table does not exist, creating");
        conn.execute(&statement).await?;
        return Ok(SyncOutcome::Created);
    }

    info!(table, "table exists");
    let live = conn
        .table_columns(schema, table)
        .await
        .map_err(catalog_error)?;
    let alterations = plan_alterations(statements.columns(), &live);

    if !options.allow_destructive_type_change {
        let mismatch = alterations.iter().find_map(|alteration| match alteration {
            Alteration::Replace {
                column,
                observed,
                ty,
            } => Some(CatalogError::TypeMismatch {
                table: statements.table().to_string(),
                column: column.to_string(),
                observed: observed.clone(),
                expected: ty.to_string(),
            }),
            Alteration::Add { .. } => None,
        });
        if let Some(mismatch) = mismatch {
            return Err(mismatch.into());
        }
    }

    let mut added = vec![];
    let mut replaced = vec![];
    for alteration in alterations {
        match alteration {
            Alteration::Add { column, ty } => {
                let statement = statements.add_column(&column, ty);
                info!(%statement, "adding column");
                conn.execute(&statement).await?;
                added.push(column);
            }
            Alteration::Replace {
                column,
                observed,
                ty,
            } => {
                warn!(
                    %column,
                    %observed,
                    expected = %ty,
                    "column type changed, replacing column and discarding its data"
                );
                let statement = statements.drop_column(&column);
                info!(%statement, "dropping column");
                conn.execute(&statement).await?;
                let statement = statements.add_column(&column, ty);
                info!(%statement, "adding column");
                conn.execute(&statement).await?;
                replaced.push(column);
            }
        }
    }
    Ok(SyncOutcome::Converged { added, replaced })
}
