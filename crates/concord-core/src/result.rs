//! # Result Sets
//!
//! Batch-level outcome types.
//!
//! A result set is keyed by [`CommonDataId`] so overlapping queries in one
//! download, or repeated messages on the same item in one upload, yield a
//! single entry. Iteration follows the key order, which makes batch results
//! deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use crate::header::SyncResponse;
use crate::types::CommonDataId;

// =============================================================================
// Result Type
// =============================================================================

/// Overall outcome of an upload batch.
///
/// Ordered by severity: once a batch leaves `Ok` it never goes back, and
/// `DuplicatedId` ends the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    #[default]
    Ok,
    /// At least one item conflicted; the batch was rolled back.
    Updated,
    /// A create collided with a live item; the batch was rolled back and
    /// the remaining messages skipped.
    #[serde(rename = "DUPLICATEDID")]
    DuplicatedId,
}

impl ResultType {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultType::Ok)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::Ok => write!(f, "OK"),
            ResultType::Updated => write!(f, "UPDATED"),
            ResultType::DuplicatedId => write!(f, "DUPLICATEDID"),
        }
    }
}

// =============================================================================
// Result Set
// =============================================================================

/// Deduplicating, ordered collection of responses.
///
/// Serializes as a JSON array of responses; the key is rebuilt from each
/// response header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<SyncResponse<Value>>", from = "Vec<SyncResponse<Value>>")]
pub struct SyncResultSet {
    items: BTreeMap<CommonDataId, SyncResponse<Value>>,
}

impl SyncResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a response, replacing any earlier one for the same item.
    pub fn insert(&mut self, response: SyncResponse<Value>) {
        self.items.insert(response.id(), response);
    }

    pub fn get(&self, id: &CommonDataId) -> Option<&SyncResponse<Value>> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &CommonDataId) -> bool {
        self.items.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, CommonDataId, SyncResponse<Value>> {
        self.items.values()
    }

    /// Groups responses by resource name, the shape the boundary layer
    /// returns for downloads.
    pub fn by_resource(&self) -> BTreeMap<String, Vec<SyncResponse<Value>>> {
        let mut grouped: BTreeMap<String, Vec<SyncResponse<Value>>> = BTreeMap::new();
        for (id, response) in &self.items {
            grouped
                .entry(id.resource_name.clone())
                .or_default()
                .push(response.clone());
        }
        grouped
    }
}

impl Extend<SyncResponse<Value>> for SyncResultSet {
    fn extend<T: IntoIterator<Item = SyncResponse<Value>>>(&mut self, iter: T) {
        for response in iter {
            self.insert(response);
        }
    }
}

impl FromIterator<SyncResponse<Value>> for SyncResultSet {
    fn from_iter<T: IntoIterator<Item = SyncResponse<Value>>>(iter: T) -> Self {
        let mut set = SyncResultSet::new();
        set.extend(iter);
        set
    }
}

impl From<Vec<SyncResponse<Value>>> for SyncResultSet {
    fn from(responses: Vec<SyncResponse<Value>>) -> Self {
        responses.into_iter().collect()
    }
}

impl From<SyncResultSet> for Vec<SyncResponse<Value>> {
    fn from(set: SyncResultSet) -> Self {
        set.into_iter().collect()
    }
}

impl IntoIterator for SyncResultSet {
    type Item = SyncResponse<Value>;
    type IntoIter = btree_map::IntoValues<CommonDataId, SyncResponse<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_values()
    }
}
