// Dotrel
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Attribute-list utilities for the expression rewriter.
//!
//! Projection payloads are delimiter-separated attribute names
//! (`"mbr;firstname;job"`); condition payloads reference attributes between
//! escape characters (`` "`year` 2010 <" ``). All set reasoning in the
//! rewriter goes through the helpers here.

use std::collections::HashMap;

/// Rewriter configuration options
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    /// Separator between attribute names in a list payload
    pub attribute_delimiter: char,
    /// Character enclosing attribute names inside a condition payload
    pub attribute_escape: char,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            attribute_delimiter: ';',
            attribute_escape: '`',
        }
    }
}

/// Resolves the attribute names of a table. The rewriter consumes this as an
/// interface; table headers live outside the optimizer.
pub trait SchemaProvider: Send + Sync {
    /// All attribute names of `table`, or `None` when the table is unknown.
    fn attributes(&self, table: &str) -> Option<Vec<String>>;
}

/// In-memory schema lookup backed by a map, for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemorySchemaProvider {
    tables: HashMap<String, Vec<String>>,
}

impl MemorySchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, attributes: &[&str]) {
        self.tables.insert(
            table.into(),
            attributes.iter().map(|a| a.to_string()).collect(),
        );
    }

    pub fn from_map(tables: HashMap<String, Vec<String>>) -> Self {
        Self { tables }
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn attributes(&self, table: &str) -> Option<Vec<String>> {
        self.tables.get(table).cloned()
    }
}

/// Split a delimited attribute list into its names, dropping empty pieces.
pub fn tokenize(list: &str, config: &RewriteConfig) -> Vec<String> {
    list.split(config.attribute_delimiter)
        .filter(|piece| !piece.is_empty())
        .map(|piece| piece.to_string())
        .collect()
}

/// Join attribute names back into a delimited list.
pub fn join(tokens: &[String], config: &RewriteConfig) -> String {
    tokens.join(&config.attribute_delimiter.to_string())
}

/// Token-set inclusion: every name of `subset` occurs in `set`. Both sides
/// are sorted and the subset is checked by binary search, so duplicates and
/// ordering differences do not matter.
pub fn is_subset(subset: &[String], set: &[String]) -> bool {
    if subset.len() > set.len() {
        return false;
    }

    let mut sorted_set: Vec<&String> = set.iter().collect();
    sorted_set.sort();
    let mut sorted_subset: Vec<&String> = subset.iter().collect();
    sorted_subset.sort();

    sorted_subset
        .iter()
        .all(|name| sorted_set.binary_search(name).is_ok())
}

/// Collect the attribute names a condition references, i.e. every run of
/// characters between a pair of escape characters.
pub fn condition_attributes(condition: &str, config: &RewriteConfig) -> Vec<String> {
    let mut names = Vec::new();
    let mut current: Option<String> = None;

    for ch in condition.chars() {
        if ch == config.attribute_escape {
            match current.take() {
                Some(name) => names.push(name),
                None => current = Some(String::new()),
            }
        } else if let Some(name) = current.as_mut() {
            name.push(ch);
        }
    }
    names
}

/// Remove duplicate names, keeping the first occurrence of each.
pub fn dedup(tokens: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !unique.contains(&token) {
            unique.push(token);
        }
    }
    unique
}

/// Retain only the names that exist in the table's schema, in their original
/// order. `None` when the schema provider does not know the table.
pub fn filter_to_schema(
    tokens: &[String],
    table: &str,
    catalog: &dyn SchemaProvider,
) -> Option<Vec<String>> {
    let schema = catalog.attributes(table)?;
    Some(
        tokens
            .iter()
            .filter(|token| schema.contains(token))
            .cloned()
            .collect(),
    )
}
