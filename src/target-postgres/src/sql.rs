// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Statement text for one stream's permanent and staging tables.
//!
//! Every identifier reaching a statement goes through
//! [`quote_identifier`], and column lists are always rendered in the
//! [`FlattenedSchema`]'s canonical order, so `CREATE`, `COPY`, `INSERT` and
//! `UPDATE` agree byte for byte on column names and positions.

use itertools::Itertools;

use crate::flatten::FlattenedSchema;
use crate::inflect::{Identifier, MAX_IDENTIFIER_LEN, quote_identifier, truncate_bytes};
use crate::schema::PropertyDescriptor;
use crate::types::{ColumnType, column_type};

/// Renders the statements for a stream's table.
#[derive(Debug, Clone)]
pub struct TableStatements<'a> {
    table: String,
    temp_table: String,
    columns: &'a FlattenedSchema,
    keys: &'a [Identifier],
}

impl<'a> TableStatements<'a> {
    pub fn new(
        schema: &str,
        table: &str,
        columns: &'a FlattenedSchema,
        keys: &'a [Identifier],
    ) -> Self {
        TableStatements {
            table: format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
            // pg_temp always resolves to this session's temporary schema, so
            // the staging table can never shadow or clobber a permanent one.
            temp_table: format!("pg_temp.{}", quote_identifier(&temp_table_name(table))),
            columns,
            keys,
        }
    }

    /// The qualified, quoted name of the permanent table.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn temp_table(&self) -> &str {
        &self.temp_table
    }

    pub fn columns(&self) -> &'a FlattenedSchema {
        self.columns
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.column_names().map(Identifier::quoted).collect()
    }

    pub fn create_table(&self, temporary: bool) -> String {
        let mut clauses: Vec<String> = self
            .columns
            .columns()
            .map(|(name, descriptor)| column_clause(name, descriptor))
            .collect();
        if self.has_keys() {
            clauses.push(format!(
                "PRIMARY KEY ({})",
                self.keys.iter().map(Identifier::quoted).join(", ")
            ));
        }
        let (kind, name) = if temporary {
            ("TEMP TABLE", &self.temp_table)
        } else {
            ("TABLE", &self.table)
        };
        format!("CREATE {kind} {name} ({})", clauses.join(", "))
    }

    pub fn add_column(&self, name: &Identifier, ty: ColumnType) -> String {
        format!("ALTER TABLE {} ADD COLUMN {} {ty}", self.table, name.quoted())
    }

    pub fn drop_column(&self, name: &Identifier) -> String {
        format!("ALTER TABLE {} DROP COLUMN {}", self.table, name.quoted())
    }

    pub fn copy_into_temp_table(&self) -> String {
        format!(
            r"COPY {} ({}) FROM STDIN WITH (FORMAT CSV, ESCAPE '\')",
            self.temp_table,
            self.column_names().join(", ")
        )
    }

    /// Updates the rows of the permanent table whose key is staged.
    pub fn update_from_temp_table(&self) -> String {
        let assignments = self
            .columns
            .column_names()
            .map(|name| {
                let name = name.quoted();
                format!("{name} = s.{name}")
            })
            .join(", ");
        format!(
            "UPDATE {} AS t SET {assignments} FROM {} AS s WHERE {}",
            self.table,
            self.temp_table,
            self.key_equality()
        )
    }

    /// Inserts the staged rows, skipping those whose key already exists when
    /// the stream has a key.
    pub fn insert_from_temp_table(&self) -> String {
        let columns = self.column_names().join(", ");
        if !self.has_keys() {
            return format!(
                "INSERT INTO {} ({columns}) SELECT s.* FROM {} AS s",
                self.table, self.temp_table
            );
        }
        format!(
            "INSERT INTO {} ({columns}) SELECT s.* FROM {} AS s LEFT OUTER JOIN {} AS t ON {} WHERE {}",
            self.table,
            self.temp_table,
            self.table,
            self.key_equality(),
            self.key_is_null()
        )
    }

    pub fn drop_temp_table(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.temp_table)
    }

    fn key_equality(&self) -> String {
        self.keys
            .iter()
            .map(|key| {
                let key = key.quoted();
                format!("s.{key} = t.{key}")
            })
            .join(" AND ")
    }

    fn key_is_null(&self) -> String {
        self.keys
            .iter()
            .map(|key| format!("t.{} IS NULL", key.quoted()))
            .join(" AND ")
    }
}

const TEMP_SUFFIX: &str = "_temp";

/// The table a stream is stored in: the stream name lowercased, cut so that
/// Postgres keeps it intact.
pub fn table_name(stream: &str) -> String {
    truncate_bytes(&stream.to_lowercase(), MAX_IDENTIFIER_LEN - 1).to_string()
}

/// The staging table of `table`, cut the same way as the table itself.
pub fn temp_table_name(table: &str) -> String {
    let stem = truncate_bytes(table, MAX_IDENTIFIER_LEN - 1 - TEMP_SUFFIX.len());
    format!("{stem}{TEMP_SUFFIX}")
}

pub fn column_clause(name: &Identifier, descriptor: &PropertyDescriptor) -> String {
    format!("{} {}", name.quoted(), column_type(descriptor))
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema))
}
