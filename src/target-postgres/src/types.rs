// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Mapping of schema properties to Postgres column types.

use std::fmt;

use crate::schema::{JsonType, PropertyDescriptor};

/// The Postgres column types a property can map to.
///
/// [`ColumnType::as_str`] returns the name `information_schema.columns`
/// reports for the type, which is what the table synchronizer diffs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Jsonb,
    Timestamp,
    Numeric,
    CharacterVarying,
    BigInt,
    Boolean,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Jsonb => "jsonb",
            ColumnType::Timestamp => "timestamp without time zone",
            ColumnType::Numeric => "numeric",
            ColumnType::CharacterVarying => "character varying",
            ColumnType::BigInt => "bigint",
            ColumnType::Boolean => "boolean",
        }
    }

    /// Whether a type name observed in the catalog is this type.
    pub fn matches(&self, observed: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(observed)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a property to the type of the column storing it.
///
/// Descriptors without any recognized type fall back to text.
///
/// ```
/// use target_postgres::schema::{JsonType, PropertyDescriptor};
/// use target_postgres::types::{column_type, ColumnType};
///
/// let id = PropertyDescriptor::new(vec![JsonType::Integer], None);
/// assert_eq!(column_type(&id), ColumnType::BigInt);
///
/// let created = PropertyDescriptor::new(vec![JsonType::String], Some("date-time"));
/// assert_eq!(column_type(&created), ColumnType::Timestamp);
/// ```
pub fn column_type(descriptor: &PropertyDescriptor) -> ColumnType {
    if descriptor.includes(&JsonType::Object) || descriptor.includes(&JsonType::Array) {
        ColumnType::Jsonb
    } else if descriptor.format.as_deref() == Some("date-time") {
        ColumnType::Timestamp
    } else if descriptor.includes(&JsonType::Number) {
        ColumnType::Numeric
    } else if descriptor.includes(&JsonType::Integer) && descriptor.includes(&JsonType::String) {
        ColumnType::CharacterVarying
    } else if descriptor.includes(&JsonType::Integer) {
        ColumnType::BigInt
    } else if descriptor.includes(&JsonType::Boolean) {
        ColumnType::Boolean
    } else {
        ColumnType::CharacterVarying
    }
}
