use std::collections::HashMap;

use serde::Serialize;

use crate::types::SqlType;

/// Column information as reported by the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    /// Zero based position in the result.
    pub index: usize,
    /// Type name as reported by the driver.
    pub type_name: String,
    pub generic: SqlType,
    /// Length as it makes sense per type; `None` means unlimited or unknown.
    pub length: Option<usize>,
    pub nullable: bool,
    /// Part of the key.
    pub key: bool,
    /// Auto-incrementing.
    pub serial: bool,
    pub precision: u32,
    pub scale: u32,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn typed(mut self, type_name: impl Into<String>, generic: SqlType) -> Self {
        self.type_name = type_name.into();
        self.generic = generic;
        self
    }
}

/// Ordered columns of one result set.
///
/// Column indexes are assigned from position when the schema is built, and a name index is
/// cached so row lookups by name avoid repeated string scans.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    columns: Vec<Column>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl Schema {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        let columns: Vec<Column> = columns
            .into_iter()
            .enumerate()
            .map(|(index, column)| Column { index, ..column })
            .collect();
        let mut by_name = HashMap::with_capacity(columns.len());
        for column in &columns {
            // First column wins for duplicated names, matching positional lookup.
            by_name.entry(column.name.clone()).or_insert(column.index);
        }
        Self { columns, by_name }
    }

    /// Schema with untyped columns, for drivers that only know column names.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(Column::new).collect())
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}
