// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Inflection of nested field paths into Postgres column identifiers.
//!
//! A path like `["shippingAddress", "zipCode"]` becomes
//! `shipping_address__zip_code`: every segment is converted to snake_case and
//! the segments are joined with [`SEPARATOR`]. Postgres silently truncates
//! identifiers longer than [`MAX_IDENTIFIER_LEN`] bytes, so paths that would
//! exceed it are shortened segment by segment, preferring the acronym formed
//! by a segment's word initials over slicing it.
//!
//! Two distinct paths may still inflect to the same identifier. Detecting
//! that is the job of the schema flattener.

use std::fmt;
use std::sync::LazyLock;

use postgres_protocol::escape::escape_identifier;
use regex::{Captures, Regex};

/// The longest identifier Postgres keeps intact, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Joins the inflected segments of a path.
pub const SEPARATOR: &str = "__";

static UNDERSCORED_ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)_([A-Z][a-z])").expect("valid regex"));
static UNDERSCORED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z\d])_([A-Z])").expect("valid regex"));
static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").expect("valid regex"));
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z\d])([A-Z])").expect("valid regex"));
static WORD_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|_)(.)").expect("valid regex"));
static LOWERCASE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z]").expect("valid regex"));

/// A column identifier produced by [`inflect`].
///
/// Always shorter than [`MAX_IDENTIFIER_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Renders the identifier the way it appears in every statement we issue.
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Quotes a Postgres identifier, doubling any embedded quotes.
///
/// ```
/// use target_postgres::inflect::quote_identifier;
///
/// assert_eq!(quote_identifier("user"), r#""user""#);
/// assert_eq!(quote_identifier(r#"a"b"#), r#""a""b""#);
/// ```
pub fn quote_identifier(name: &str) -> String {
    escape_identifier(name)
}

/// Converts one raw field name to snake_case.
///
/// An underscore already separating two capitalized words is kept as an extra
/// separator, so `first_Name` and `firstName` stay distinct.
pub fn inflect_column_name(name: &str) -> String {
    let name = UNDERSCORED_ACRONYM.replace_all(name, "${1}__${2}");
    let name = UNDERSCORED_WORD.replace_all(&name, "${1}__${2}");
    underscore(&name)
}

fn underscore(word: &str) -> String {
    let word = ACRONYM_BOUNDARY.replace_all(word, "${1}_${2}");
    let word = WORD_BOUNDARY.replace_all(&word, "${1}_${2}");
    word.replace('-', "_").to_lowercase()
}

fn camelize(word: &str) -> String {
    WORD_START
        .replace_all(word, |caps: &Captures| caps[1].to_uppercase())
        .into_owned()
}

/// Shortens an inflected segment to the initials of its words, or to its
/// first three characters when it has fewer than two words.
fn abbreviate(segment: &str) -> String {
    let camelized = camelize(segment);
    let initials = LOWERCASE.replace_all(&camelized, "");
    if initials.chars().count() > 1 {
        initials.to_lowercase()
    } else {
        segment.chars().take(3).collect::<String>().to_lowercase()
    }
}

fn joined_len(segments: &[String]) -> usize {
    let separators = segments.len().saturating_sub(1) * SEPARATOR.len();
    segments.iter().map(|s| s.len()).sum::<usize>() + separators
}

/// Inflects a path of raw field names into a single column identifier.
pub fn inflect<S: AsRef<str>>(path: &[S]) -> Identifier {
    let mut segments: Vec<String> = path
        .iter()
        .map(|segment| inflect_column_name(segment.as_ref()))
        .collect();

    let mut next = 0;
    while joined_len(&segments) >= MAX_IDENTIFIER_LEN && next < segments.len() {
        segments[next] = abbreviate(&segments[next]);
        next += 1;
    }

    let name = segments.join(SEPARATOR);
    Identifier(truncate_bytes(&name, MAX_IDENTIFIER_LEN - 1).to_string())
}

/// Cuts `name` to at most `len` bytes, on a char boundary.
pub fn truncate_bytes(name: &str, len: usize) -> &str {
    if name.len() <= len {
        return name;
    }
    let mut end = len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
