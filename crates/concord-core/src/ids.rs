//! Resource-item identifiers.
//!
//! Adapters keep their own storage keys. The id clients see is the storage
//! key with a resource marker in front, e.g. `schedule-42`, so it can be
//! produced from the key and turned back into it.

use serde::{Deserialize, Serialize};

/// Round-trips storage keys through prefixed resource-item ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemIdCodec {
    prefix: String,
}

impl ItemIdCodec {
    /// Creates a codec using `"{marker}-"` as the prefix.
    pub fn new(marker: &str) -> Self {
        ItemIdCodec {
            prefix: format!("{}-", marker),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Turns a storage key into a resource-item id.
    pub fn generate(&self, target_item_id: &str) -> String {
        format!("{}{}", self.prefix, target_item_id)
    }

    /// Recovers the storage key, or `None` if the id was not produced by
    /// this codec.
    pub fn resolve<'a>(&self, resource_item_id: &'a str) -> Option<&'a str> {
        resource_item_id
            .strip_prefix(self.prefix.as_str())
            .filter(|key| !key.is_empty())
    }
}
