//! # Service Directory
//!
//! Resolves a logical service name ("catalog", "payments") to a reachable
//! base address.
//!
//! How names get into the directory is a deployment concern (registry,
//! DNS, static config); the mesh depends only on the [`ServiceDirectory`]
//! seam. The built-in [`StaticDirectory`] covers env-configured
//! deployments, where each service address arrives as
//! `BAZAAR_SERVICE_<NAME>=http://host:port`.

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

use crate::error::{MeshError, MeshResult};

// =============================================================================
// Directory Seam
// =============================================================================

/// Resolves logical service names to base addresses.
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// Returns the base address for `service`, or
    /// [`MeshError::ServiceUnresolved`] if the name is unknown.
    async fn resolve(&self, service: &str) -> MeshResult<Url>;
}

// =============================================================================
// Static Directory
// =============================================================================

/// A directory backed by a fixed name → address map.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    addresses: HashMap<String, Url>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service address. Replaces any previous registration.
    pub fn register(&mut self, service: impl Into<String>, base_url: &str) -> MeshResult<()> {
        let url = Url::parse(base_url)?;
        self.addresses.insert(service.into(), url);
        Ok(())
    }

    /// Builds a directory from `BAZAAR_SERVICE_<NAME>` environment
    /// variables. `BAZAAR_SERVICE_ORDER_HISTORY` registers the service
    /// "order-history".
    pub fn from_env() -> MeshResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Builds a directory from an explicit variable iterator.
    ///
    /// Separated from [`StaticDirectory::from_env`] so parsing is testable
    /// without mutating process-global state.
    pub fn from_vars(vars: impl Iterator<Item = (String, String)>) -> MeshResult<Self> {
        const PREFIX: &str = "BAZAAR_SERVICE_";

        let mut directory = StaticDirectory::new();
        for (key, value) in vars {
            if let Some(raw_name) = key.strip_prefix(PREFIX) {
                if raw_name.is_empty() || raw_name == "NAME" {
                    // BAZAAR_SERVICE_NAME is this service's own identity,
                    // not a directory entry.
                    continue;
                }
                let service = raw_name.to_lowercase().replace('_', "-");
                directory.register(service, &value).map_err(|_| {
                    MeshError::InvalidConfig(format!("{} has an invalid url '{}'", key, value))
                })?;
            }
        }
        Ok(directory)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True when no services are registered.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[async_trait]
impl ServiceDirectory for StaticDirectory {
    async fn resolve(&self, service: &str) -> MeshResult<Url> {
        self.addresses
            .get(service)
            .cloned()
            .ok_or_else(|| MeshError::ServiceUnresolved {
                service: service.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_registered_service() {
        let mut directory = StaticDirectory::new();
        directory.register("catalog", "http://catalog:8080").unwrap();

        let url = directory.resolve("catalog").await.unwrap();
        assert_eq!(url.as_str(), "http://catalog:8080/");
    }

    #[tokio::test]
    async fn test_unknown_service_is_unresolved() {
        let directory = StaticDirectory::new();
        let err = directory.resolve("ghost").await.unwrap_err();
        assert!(matches!(err, MeshError::ServiceUnresolved { service } if service == "ghost"));
    }

    #[tokio::test]
    async fn test_from_vars_maps_names() {
        let vars = vec![
            ("BAZAAR_SERVICE_CATALOG".to_string(), "http://catalog:8080".to_string()),
            ("BAZAAR_SERVICE_ORDER_HISTORY".to_string(), "http://orders:8081".to_string()),
            ("BAZAAR_SERVICE_NAME".to_string(), "checkout".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let directory = StaticDirectory::from_vars(vars.into_iter()).unwrap();

        assert_eq!(directory.len(), 2);
        assert!(directory.resolve("catalog").await.is_ok());
        assert!(directory.resolve("order-history").await.is_ok());
        // Own identity never becomes a destination.
        assert!(directory.resolve("name").await.is_err());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let vars = vec![("BAZAAR_SERVICE_CATALOG".to_string(), "not a url".to_string())];
        let err = StaticDirectory::from_vars(vars.into_iter()).unwrap_err();
        assert!(err.to_string().contains("BAZAAR_SERVICE_CATALOG"));
    }
}
