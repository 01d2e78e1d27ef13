//! # Implementation Registry
//!
//! Implementations are QUIC endpoints packaged as container images. The
//! registry is a JSON file mapping an implementation name to its image
//! reference, an informational URL and the roles it can play:
//!
//! ```json
//! {
//!     "quic-go": {
//!         "image": "martenseemann/quic-go-interop:latest",
//!         "url": "https://github.com/quic-go/quic-go",
//!         "role": "both"
//!     }
//! }
//! ```
//!
//! An unknown `role` string is a fatal configuration error surfaced at load
//! time through serde's enum validation.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Roles an implementation advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Both,
    Client,
    Server,
}

impl Role {
    pub fn can_be_client(&self) -> bool {
        matches!(self, Role::Both | Role::Client)
    }

    pub fn can_be_server(&self) -> bool {
        matches!(self, Role::Both | Role::Server)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Both => write!(f, "both"),
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// A single registry entry. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    /// Container image reference.
    pub image: String,
    /// Informational URL, exported verbatim in the JSON report.
    pub url: String,
    pub role: Role,
}

/// Name-keyed implementation registry with stable iteration order.
pub type Registry = BTreeMap<String, Implementation>;

/// Load the registry from a JSON file.
pub fn load_registry(path: &Path) -> Result<Registry> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read implementations file {}", path.display()))?;
    let registry: Registry = serde_json::from_str(&raw)
        .with_context(|| format!("invalid implementations file {}", path.display()))?;
    Ok(registry)
}

/// Names of all registry entries that can act as clients.
pub fn client_implementations(registry: &Registry) -> Vec<String> {
    registry
        .iter()
        .filter(|(_, imp)| imp.role.can_be_client())
        .map(|(name, _)| name.clone())
        .collect()
}

/// Names of all registry entries that can act as servers.
pub fn server_implementations(registry: &Registry) -> Vec<String> {
    registry
        .iter()
        .filter(|(_, imp)| imp.role.can_be_server())
        .map(|(name, _)| name.clone())
        .collect()
}

/// Apply `name=image` override pairs to the registry.
///
/// Overrides reference existing entries only; naming an unknown
/// implementation is a fatal configuration error.
pub fn apply_image_overrides(registry: &mut Registry, overrides: &str) -> Result<()> {
    for pair in overrides.split(',').filter(|s| !s.is_empty()) {
        let Some((name, image)) = pair.split_once('=') else {
            bail!("invalid image override {:?}, expected name=image", pair);
        };
        match registry.get_mut(name) {
            Some(imp) => imp.image = image.to_string(),
            None => bail!("implementation {:?} not found in the registry", name),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> Registry {
        serde_json::from_str(
            r#"{
                "alpha": {"image": "alpha/qns:latest", "url": "https://alpha.example", "role": "both"},
                "beta": {"image": "beta/qns:latest", "url": "https://beta.example", "role": "client"},
                "gamma": {"image": "gamma/qns:latest", "url": "https://gamma.example", "role": "server"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn roles_partition_the_registry() {
        let registry = sample_registry();
        assert_eq!(client_implementations(&registry), vec!["alpha", "beta"]);
        assert_eq!(server_implementations(&registry), vec!["alpha", "gamma"]);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let parsed: std::result::Result<Registry, _> = serde_json::from_str(
            r#"{"x": {"image": "img", "url": "u", "role": "observer"}}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn image_overrides_replace_entries() {
        let mut registry = sample_registry();
        apply_image_overrides(&mut registry, "alpha=local/alpha:dev").unwrap();
        assert_eq!(registry["alpha"].image, "local/alpha:dev");

        assert!(apply_image_overrides(&mut registry, "nosuch=img").is_err());
        assert!(apply_image_overrides(&mut registry, "malformed").is_err());
    }
}
