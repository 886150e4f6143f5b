//! Column identity.
//!
//! A [`ColumnId`] names a column for its whole life in a sheet, no matter
//! how often its header is renamed. Steps take ids; code generation turns
//! them back into the header that is current at that point of the script.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The header text a column currently shows.
pub type ColumnHeader = String;

/// Stable identifier for a column inside one sheet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Bidirectional `ColumnId <-> ColumnHeader` map for one sheet.
///
/// Ids are derived from the header they were first issued for and are never
/// handed out twice, even after the column is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIdMap {
    id_to_header: BTreeMap<ColumnId, ColumnHeader>,
    header_to_id: BTreeMap<ColumnHeader, ColumnId>,
    issued: BTreeSet<ColumnId>,
}

impl ColumnIdMap {
    /// Map where each header gets an id, in order.
    pub fn from_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnHeader>,
    {
        let mut map = Self::default();
        for header in headers {
            map.insert(header.into());
        }
        map
    }

    /// Register a new column and return its freshly issued id.
    pub fn insert(&mut self, header: ColumnHeader) -> ColumnId {
        let id = self.fresh_id(&header);
        self.issued.insert(id.clone());
        self.header_to_id.insert(header.clone(), id.clone());
        self.id_to_header.insert(id.clone(), header);
        id
    }

    /// Register a column under an id that already exists elsewhere (a copy).
    pub fn insert_with_id(&mut self, id: ColumnId, header: ColumnHeader) {
        self.issued.insert(id.clone());
        self.header_to_id.insert(header.clone(), id.clone());
        self.id_to_header.insert(id, header);
    }

    pub fn header(&self, id: &ColumnId) -> Option<&str> {
        self.id_to_header.get(id).map(String::as_str)
    }

    pub fn id(&self, header: &str) -> Option<&ColumnId> {
        self.header_to_id.get(header)
    }

    pub fn contains(&self, id: &ColumnId) -> bool {
        self.id_to_header.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.id_to_header.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_header.is_empty()
    }

    /// Point `id` at a new header. Returns the old header.
    pub fn rename(&mut self, id: &ColumnId, new_header: ColumnHeader) -> Option<ColumnHeader> {
        let old = self.id_to_header.get(id)?.clone();
        self.header_to_id.remove(&old);
        self.header_to_id.insert(new_header.clone(), id.clone());
        self.id_to_header.insert(id.clone(), new_header);
        Some(old)
    }

    /// Forget a column. Its id stays issued.
    pub fn remove(&mut self, id: &ColumnId) -> Option<ColumnHeader> {
        let header = self.id_to_header.remove(id)?;
        self.header_to_id.remove(&header);
        Some(header)
    }

    /// Re-key a column so its id equals its (possibly suffixed) header.
    /// Only legacy header renames use this.
    pub fn rekey(&mut self, id: &ColumnId, new_header: ColumnHeader) -> Option<ColumnId> {
        self.remove(id)?;
        Some(self.insert(new_header))
    }

    /// Throw all ids away and issue ids equal to the headers again.
    pub fn reset_to_headers<I, S>(&mut self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnHeader>,
    {
        self.id_to_header.clear();
        self.header_to_id.clear();
        self.issued.clear();
        for header in headers {
            self.insert(header.into());
        }
    }

    fn fresh_id(&self, header: &str) -> ColumnId {
        let base = ColumnId::new(header);
        if !self.issued.contains(&base) {
            return base;
        }
        (1..)
            .map(|n| ColumnId::new(format!("{header}_{n}")))
            .find(|candidate| !self.issued.contains(candidate))
            .unwrap_or(base)
    }
}

/// Header rewritten the way legacy analyses required: ASCII letters, digits
/// and underscores only, never starting with a digit.
pub fn legacy_valid_header(header: &str) -> ColumnHeader {
    let mut cleaned: String = header
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        cleaned.insert_str(0, "c_");
    }
    cleaned
}
