//! # Resource Registry
//!
//! Static map from resource name to adapter, built in code at startup.
//!
//! ```rust,ignore
//! let registry = ResourceRegistry::builder()
//!     .register(SyncResource::new(ScheduleStore::new()))?
//!     .build();
//! ```

use concord_core::{SyncError, SyncResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::resource::SyncResourceAdapter;

/// Registered adapters, read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    adapters: BTreeMap<String, Arc<dyn SyncResourceAdapter>>,
}

impl ResourceRegistry {
    pub fn builder() -> ResourceRegistryBuilder {
        ResourceRegistryBuilder::default()
    }

    /// Looks up an adapter; unknown names are a hard failure.
    pub fn get(&self, resource_name: &str) -> SyncResult<&Arc<dyn SyncResourceAdapter>> {
        self.adapters
            .get(resource_name)
            .ok_or_else(|| SyncError::UnknownResource(resource_name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Collects adapters, rejecting duplicate names.
#[derive(Debug, Default)]
pub struct ResourceRegistryBuilder {
    adapters: BTreeMap<String, Arc<dyn SyncResourceAdapter>>,
}

impl ResourceRegistryBuilder {
    pub fn register<A>(self, adapter: A) -> SyncResult<Self>
    where
        A: SyncResourceAdapter + 'static,
    {
        self.register_arc(Arc::new(adapter))
    }

    pub fn register_arc(mut self, adapter: Arc<dyn SyncResourceAdapter>) -> SyncResult<Self> {
        let name = adapter.resource_name().to_string();
        if name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("resource name must not be empty".into()));
        }
        if self.adapters.contains_key(&name) {
            return Err(SyncError::InvalidConfig(format!(
                "resource '{}' is registered twice",
                name
            )));
        }

        info!(resource = %name, "Registered resource");
        self.adapters.insert(name, adapter);
        Ok(self)
    }

    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            adapters: self.adapters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ScheduleStore, SyncResource};

    #[test]
    fn test_lookup_and_unknown_resource() {
        let registry = ResourceRegistry::builder()
            .register(SyncResource::new(ScheduleStore::new()))
            .unwrap()
            .build();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("schedule").unwrap().resource_name(), "schedule");
        assert!(matches!(
            registry.get("person"),
            Err(SyncError::UnknownResource(name)) if name == "person"
        ));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = ResourceRegistry::builder()
            .register(SyncResource::new(ScheduleStore::new()))
            .unwrap()
            .register(SyncResource::new(ScheduleStore::new()));

        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
