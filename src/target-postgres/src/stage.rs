// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Staging of flattened records into the text fed to `COPY`.
//!
//! Rows are encoded as CSV for `COPY ... (FORMAT CSV, ESCAPE '\')`: an empty
//! unquoted field is `NULL`, strings are always quoted so that an empty string
//! stays distinct from `NULL`, and quotes and backslashes inside strings are
//! escaped with a backslash.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::flatten::{FlatRecord, FlattenedSchema, flatten_record};
use crate::inflect::Identifier;

/// Renders a flattened record as one CSV line, without the line terminator,
/// in canonical column order.
pub fn record_to_csv_line(columns: &FlattenedSchema, record: &FlatRecord) -> String {
    let mut line = String::new();
    for (i, value) in columns.project(record).into_iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        write_field(&mut line, value);
    }
    line
}

fn write_field(out: &mut String, value: Option<&Value>) {
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
        Some(Value::Number(n)) => out.push_str(&n.to_string()),
        Some(Value::String(s)) => write_quoted(out, s),
        Some(other) => write_quoted(out, &other.to_string()),
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Joins the values of the key columns of a record for display, or `None`
/// when the stream has no key.
///
/// Distinct keys can render the same, e.g. `("a,b", "c")` and `("a", "b,c")`.
/// Use [`record_key`] to compare keys.
pub fn record_primary_key_string(keys: &[Identifier], record: &FlatRecord) -> Option<String> {
    let parts = record_key(keys, record)?;
    Some(
        parts
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// The key of a record, one part per key column, or `None` when the stream
/// has no key.
///
/// Each part is the text the column receives, so two records share a key
/// exactly when they would land on the same row. Absent and `null` values are
/// `None`.
pub fn record_key(keys: &[Identifier], record: &FlatRecord) -> Option<Vec<Option<String>>> {
    if keys.is_empty() {
        return None;
    }
    let parts = keys
        .iter()
        .map(|key| match record.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
        .collect();
    Some(parts)
}

/// The rows of one batch, ready to be staged.
///
/// When the stream has a key, a later record replaces an earlier one with the
/// same key. Otherwise every record is kept.
#[derive(Debug, Clone)]
pub struct Batch {
    columns: Arc<FlattenedSchema>,
    keys: Vec<Identifier>,
    rows: Vec<FlatRecord>,
    positions: BTreeMap<Vec<Option<String>>, usize>,
}

impl Batch {
    pub fn new(columns: Arc<FlattenedSchema>, keys: Vec<Identifier>) -> Self {
        Batch {
            columns,
            keys,
            rows: vec![],
            positions: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, record: FlatRecord) {
        match record_key(&self.keys, &record) {
            Some(key) => match self.positions.get(&key) {
                Some(&i) => self.rows[i] = record,
                None => {
                    self.positions.insert(key, self.rows.len());
                    self.rows.push(record);
                }
            },
            None => self.rows.push(record),
        }
    }

    /// Flattens and adds a raw record.
    pub fn push_record(&mut self, record: &Map<String, Value>) {
        let record = flatten_record(record, &self.columns);
        self.push(record);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[FlatRecord] {
        &self.rows
    }

    /// Encodes the batch as `COPY` CSV data, one line per row.
    pub fn encode(&self) -> Bytes {
        let mut data = String::new();
        for row in &self.rows {
            data.push_str(&record_to_csv_line(&self.columns, row));
            data.push('\n');
        }
        Bytes::from(data)
    }
}
