//! Static mapping from operation kind to operator endpoint.
//!
//! Built once at startup from configuration and handed to the dispatcher
//! as data. Routing is fixed per operation kind; there is no balancing.

use crate::config::RoutingConfig;
use crate::models::Operation;
use std::collections::BTreeMap;

/// Operation → endpoint mapping, generic over the endpoint representation
/// (an address string from configuration, or a connected endpoint).
#[derive(Debug, Clone)]
pub struct RoutingTable<E> {
    routes: BTreeMap<Operation, E>,
}

impl<E> Default for RoutingTable<E> {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }
}

impl<E> RoutingTable<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_route(mut self, operation: Operation, endpoint: E) -> Self {
        self.insert(operation, endpoint);
        self
    }

    /// Bind `operation` to `endpoint`, replacing any earlier binding.
    pub fn insert(&mut self, operation: Operation, endpoint: E) {
        self.routes.insert(operation, endpoint);
    }

    /// Endpoint bound to `operation`, if any.
    pub fn route(&self, operation: Operation) -> Option<&E> {
        self.routes.get(&operation)
    }

    /// Routable operations with no endpoint bound.
    pub fn missing(&self) -> Vec<Operation> {
        Operation::ROUTABLE
            .iter()
            .copied()
            .filter(|op| !self.routes.contains_key(op))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Operation, &E)> {
        self.routes.iter().map(|(op, e)| (*op, e))
    }

    /// Convert every endpoint, keeping the bindings.
    pub fn map<T, F>(self, mut f: F) -> RoutingTable<T>
    where
        F: FnMut(Operation, E) -> T,
    {
        RoutingTable {
            routes: self
                .routes
                .into_iter()
                .map(|(op, e)| (op, f(op, e)))
                .collect(),
        }
    }
}

impl From<&RoutingConfig> for RoutingTable<String> {
    fn from(config: &RoutingConfig) -> Self {
        RoutingTable::new()
            .with_route(Operation::Add, config.add.clone())
            .with_route(Operation::Sub, config.sub.clone())
            .with_route(Operation::Mul, config.mul.clone())
            .with_route(Operation::Div, config.div.clone())
    }
}
