//! Registry of exposed ports backing `expose-port`/`unexpose-port`/
//! `exposed-ports`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::security::{validate_port, ValidationError};

#[derive(Debug, Error)]
pub enum PortRegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("port {0} is not exposed")]
    NotExposed(u16),

    #[error("port {0} is already exposed")]
    AlreadyExposed(u16),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExposedPort {
    pub port: u16,
    pub label: Option<String>,
    pub exposed_at: DateTime<Utc>,
}

/// Thread-safe registry of loopback ports the proxy is willing to forward
/// to. Only ports already in here 404 otherwise — exposing is an explicit
/// opt-in, not an automatic scan of listening sockets.
pub struct PortRegistry {
    ports: DashMap<u16, ExposedPort>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self { ports: DashMap::new() }
    }

    pub fn expose(&self, port: u32, label: Option<String>) -> Result<ExposedPort, PortRegistryError> {
        let port = validate_port(port)?;
        if self.ports.contains_key(&port) {
            return Err(PortRegistryError::AlreadyExposed(port));
        }
        let entry = ExposedPort { port, label, exposed_at: Utc::now() };
        self.ports.insert(port, entry.clone());
        Ok(entry)
    }

    pub fn unexpose(&self, port: u16) -> Result<(), PortRegistryError> {
        self.ports.remove(&port).map(|_| ()).ok_or(PortRegistryError::NotExposed(port))
    }

    pub fn is_exposed(&self, port: u16) -> bool {
        self.ports.contains_key(&port)
    }

    pub fn list(&self) -> Vec<ExposedPort> {
        let mut ports: Vec<ExposedPort> = self.ports.iter().map(|e| e.value().clone()).collect();
        ports.sort_by_key(|p| p.port);
        ports
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expose_rejects_duplicates_and_out_of_range() {
        let registry = PortRegistry::new();
        registry.expose(8080, None).unwrap();
        assert!(registry.expose(8080, None).is_err());
        assert!(registry.expose(80, None).is_err());
        assert!(registry.expose(70000, None).is_err());
    }

    #[test]
    fn unexpose_removes() {
        let registry = PortRegistry::new();
        registry.expose(9000, None).unwrap();
        assert!(registry.is_exposed(9000));
        registry.unexpose(9000).unwrap();
        assert!(!registry.is_exposed(9000));
        assert!(registry.unexpose(9000).is_err());
    }
}
