//! Name → endpoint registry of one service.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::address::Address;
use crate::endpoint::RegisteredEndpoint;
use crate::error::ServiceError;

#[derive(Default)]
struct RegistryState {
    endpoints: HashMap<String, Arc<dyn RegisteredEndpoint>>,
    closed: bool,
}

/// Live endpoints of a service, keyed by endpoint name.
///
/// Shared with the network server so remote lookups see the same view.
#[derive(Default)]
pub(crate) struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub(crate) fn insert(
        &self,
        name: &str,
        endpoint: Arc<dyn RegisteredEndpoint>,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.write();
        if state.closed {
            return Err(ServiceError::Stopped);
        }
        if state.endpoints.contains_key(name) {
            return Err(ServiceError::DuplicateName(name.to_string()));
        }
        state.endpoints.insert(name.to_string(), endpoint);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn RegisteredEndpoint>> {
        self.state.read().endpoints.get(name).cloned()
    }

    /// Remove `address`'s entry if it still belongs to that endpoint.
    pub(crate) fn remove(&self, address: &Address) {
        let mut state = self.state.write();
        if state
            .endpoints
            .get(address.name())
            .is_some_and(|e| e.address() == address)
        {
            state.endpoints.remove(address.name());
        }
    }

    /// Refuse further registrations and return the live endpoints.
    pub(crate) fn close(&self) -> Vec<Arc<dyn RegisteredEndpoint>> {
        let mut state = self.state.write();
        state.closed = true;
        state.endpoints.values().cloned().collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.read().endpoints.len()
    }
}
