//! Provider boundary.
//!
//! The assembler's sole interface to the outside world: submit a resource of
//! kind K with resolved configuration C and dependency set D, receive back
//! the resource's attributes. [`LocalProvider`] is a deterministic stand-in
//! for a cloud provider — physical names and key material derive from a
//! persisted per-deployment seed, so repeated runs reconcile instead of
//! duplicate.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use thiserror::Error;

use crate::core::context::ResourceAttrs;
use crate::core::graph::ResourceKind;
use crate::resources::random::{self, CredentialKind, CredentialSpec};

use super::state::{load_state, new_state, save_state, EngineState};

/// Apply-time failure, detected by the engine. Propagated unchanged; the
/// assembler has no recovery logic for it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("resource '{resource}' rejected by provider: {message}")]
    Provider { resource: String, message: String },

    #[error("engine state error: {0}")]
    State(String),
}

/// A resource with every configuration input resolved to a concrete string.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub config: IndexMap<String, String>,
    pub depends_on: Vec<String>,
}

impl ResolvedResource {
    fn require(&self, key: &str) -> Result<&str, EngineError> {
        self.config
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| EngineError::Provider {
                resource: self.name.clone(),
                message: format!("missing required config '{}'", key),
            })
    }
}

/// The external reconciliation engine's resource API.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Create (or reconcile) one resource and return its attributes.
    async fn create(&self, resource: &ResolvedResource) -> Result<ResourceAttrs, EngineError>;
}

/// Deterministic, state-file-backed provider for previews and tests.
pub struct LocalProvider {
    state_dir: PathBuf,
    force_rotate: bool,
    state: Mutex<EngineState>,
}

impl LocalProvider {
    /// Open (or initialize) the engine state under `state_dir`.
    pub fn open(state_dir: &Path) -> Result<Self, EngineError> {
        let state = match load_state(state_dir)? {
            Some(state) => state,
            None => {
                let state = new_state();
                save_state(state_dir, &state)?;
                state
            }
        };
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            force_rotate: false,
            state: Mutex::new(state),
        })
    }

    /// Regenerate credentials on the next apply instead of reusing persisted
    /// ones. Explicit opt-in; re-apply never rotates silently.
    pub fn with_forced_rotation(mut self) -> Self {
        self.force_rotate = true;
        self
    }

    /// Record the outputs of a successful apply into the state file.
    pub fn record_outputs(&self, outputs: &IndexMap<String, String>) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("engine state lock poisoned");
        state.outputs = outputs.clone();
        save_state(&self.state_dir, &state)
    }

    /// Logical → physical name, stable per seed. Storage accounts get the
    /// compact alphanumeric form the provider requires.
    fn physical_name(
        state: &mut EngineState,
        kind: ResourceKind,
        logical: &str,
    ) -> Result<String, EngineError> {
        if let Some(existing) = state.physical_names.get(logical) {
            return Ok(existing.clone());
        }
        let seed = state.seed_bytes()?;
        let digest = blake3::keyed_hash(&seed, format!("name:{}", logical).as_bytes());
        let hex = digest.to_hex();
        let suffix = &hex[..6];
        let physical = match kind {
            ResourceKind::StorageAccount => {
                let compact: String = logical.chars().filter(|c| *c != '-').collect();
                let head: String = compact.chars().take(18).collect();
                format!("{}{}", head, suffix)
            }
            _ => format!("{}-{}", logical, suffix),
        };
        state
            .physical_names
            .insert(logical.to_string(), physical.clone());
        Ok(physical)
    }

    /// Derive stable key material from the seed.
    fn derived_key(state: &EngineState, label: &str) -> Result<String, EngineError> {
        let seed = state.seed_bytes()?;
        let digest = blake3::keyed_hash(&seed, label.as_bytes());
        Ok(STANDARD.encode(digest.as_bytes()))
    }

    /// Derive a stable uuid-shaped identifier from the seed.
    fn derived_uuid(state: &EngineState, label: &str) -> Result<String, EngineError> {
        let seed = state.seed_bytes()?;
        let hex = blake3::keyed_hash(&seed, label.as_bytes()).to_hex();
        Ok(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    fn credential_value(
        state: &mut EngineState,
        resource: &ResolvedResource,
        force_rotate: bool,
    ) -> Result<String, EngineError> {
        if !force_rotate {
            if let Some(existing) = state.secrets.get(&resource.name) {
                return Ok(existing.clone());
            }
        }
        let kind = match resource.require("kind")? {
            "username" => CredentialKind::Username,
            "password" => CredentialKind::Password,
            other => {
                return Err(EngineError::Provider {
                    resource: resource.name.clone(),
                    message: format!("unknown credential kind '{}'", other),
                })
            }
        };
        let length: usize = resource
            .require("length")?
            .parse()
            .map_err(|_| EngineError::Provider {
                resource: resource.name.clone(),
                message: "credential length is not a number".to_string(),
            })?;
        let include_special = resource.require("include_special")? == "true";
        let value = random::generate(
            kind,
            CredentialSpec {
                length,
                include_special,
            },
            &mut rand::thread_rng(),
        );
        state.secrets.insert(resource.name.clone(), value.clone());
        Ok(value)
    }
}

#[async_trait]
impl ResourceProvider for LocalProvider {
    async fn create(&self, resource: &ResolvedResource) -> Result<ResourceAttrs, EngineError> {
        let mut state = self.state.lock().expect("engine state lock poisoned");
        let mut attrs = ResourceAttrs::new();

        match resource.kind {
            ResourceKind::ResourceGroup => {
                let physical =
                    Self::physical_name(&mut state, resource.kind, &resource.name)?;
                attrs.insert("name".to_string(), physical);
                attrs.insert(
                    "location".to_string(),
                    resource.require("location")?.to_string(),
                );
            }
            ResourceKind::StorageAccount => {
                let physical =
                    Self::physical_name(&mut state, resource.kind, &resource.name)?;
                attrs.insert(
                    "key1".to_string(),
                    Self::derived_key(&state, &format!("storage:{}:key1", resource.name))?,
                );
                attrs.insert(
                    "key2".to_string(),
                    Self::derived_key(&state, &format!("storage:{}:key2", resource.name))?,
                );
                attrs.insert(
                    "blob_endpoint".to_string(),
                    format!("https://{}.blob.core.windows.net", physical),
                );
                attrs.insert("name".to_string(), physical);
            }
            ResourceKind::BlobContainer => {
                attrs.insert("name".to_string(), resource.name.clone());
                attrs.insert(
                    "public_access".to_string(),
                    resource.require("public_access")?.to_string(),
                );
            }
            ResourceKind::Blob => {
                let source = resource.require("source")?;
                let content = std::fs::read(source).map_err(|e| EngineError::Provider {
                    resource: resource.name.clone(),
                    message: format!("cannot read source archive '{}': {}", source, e),
                })?;
                attrs.insert("name".to_string(), resource.require("name")?.to_string());
                attrs.insert(
                    "content_hash".to_string(),
                    format!("blake3:{}", blake3::hash(&content).to_hex()),
                );
            }
            ResourceKind::AppServicePlan => {
                let physical =
                    Self::physical_name(&mut state, resource.kind, &resource.name)?;
                let group = resource.require("resource_group")?;
                attrs.insert(
                    "id".to_string(),
                    format!(
                        "/resourceGroups/{}/providers/Microsoft.Web/serverfarms/{}",
                        group, physical
                    ),
                );
                attrs.insert("name".to_string(), physical);
            }
            ResourceKind::WebApp => {
                let physical =
                    Self::physical_name(&mut state, resource.kind, &resource.name)?;
                attrs.insert(
                    "default_hostname".to_string(),
                    format!("{}.azurewebsites.net", physical),
                );
                attrs.insert("name".to_string(), physical);
            }
            ResourceKind::AppInsights => {
                let physical =
                    Self::physical_name(&mut state, resource.kind, &resource.name)?;
                attrs.insert(
                    "instrumentation_key".to_string(),
                    Self::derived_uuid(&state, &format!("insights:{}", resource.name))?,
                );
                attrs.insert("name".to_string(), physical);
            }
            ResourceKind::RandomCredential => {
                let value = Self::credential_value(&mut state, resource, self.force_rotate)?;
                attrs.insert("value".to_string(), value);
            }
            ResourceKind::SqlServer => {
                let physical =
                    Self::physical_name(&mut state, resource.kind, &resource.name)?;
                attrs.insert(
                    "fqdn".to_string(),
                    format!("{}.database.windows.net", physical),
                );
                attrs.insert("name".to_string(), physical);
            }
            ResourceKind::SqlDatabase => {
                attrs.insert("name".to_string(), resource.require("name")?.to_string());
                attrs.insert("sku".to_string(), resource.require("sku")?.to_string());
            }
            ResourceKind::SqlFirewallRule => {
                attrs.insert("name".to_string(), resource.name.clone());
                attrs.insert(
                    "start_ip".to_string(),
                    resource.require("start_ip")?.to_string(),
                );
                attrs.insert("end_ip".to_string(), resource.require("end_ip")?.to_string());
            }
        }

        save_state(&self.state_dir, &state)?;
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(kind: ResourceKind, name: &str, pairs: &[(&str, &str)]) -> ResolvedResource {
        let mut config = IndexMap::new();
        for (k, v) in pairs {
            config.insert(k.to_string(), v.to_string());
        }
        ResolvedResource {
            kind,
            name: name.to_string(),
            config,
            depends_on: vec![],
        }
    }

    #[tokio::test]
    async fn test_physical_names_stable_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let rg = resolved(
            ResourceKind::ResourceGroup,
            "conference-rg",
            &[("location", "westeurope")],
        );

        let provider = LocalProvider::open(dir.path()).unwrap();
        let first = provider.create(&rg).await.unwrap();

        let provider = LocalProvider::open(dir.path()).unwrap();
        let second = provider.create(&rg).await.unwrap();

        assert_eq!(first["name"], second["name"]);
        assert!(first["name"].starts_with("conference-rg-"));
    }

    #[tokio::test]
    async fn test_storage_account_name_is_compact() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path()).unwrap();
        let attrs = provider
            .create(&resolved(
                ResourceKind::StorageAccount,
                "conference-sa",
                &[
                    ("resource_group", "rg-x"),
                    ("replication", "Standard_LRS"),
                    ("kind", "StorageV2"),
                ],
            ))
            .await
            .unwrap();
        let name = &attrs["name"];
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(name.len() <= 24);
        assert!(!attrs["key1"].is_empty());
        assert_ne!(attrs["key1"], attrs["key2"]);
    }

    #[tokio::test]
    async fn test_credential_persists_across_applies() {
        let dir = tempfile::tempdir().unwrap();
        let cred = resolved(
            ResourceKind::RandomCredential,
            "sql-admin-password",
            &[
                ("kind", "password"),
                ("length", "16"),
                ("include_special", "true"),
            ],
        );

        let provider = LocalProvider::open(dir.path()).unwrap();
        let first = provider.create(&cred).await.unwrap()["value"].clone();

        let provider = LocalProvider::open(dir.path()).unwrap();
        let second = provider.create(&cred).await.unwrap()["value"].clone();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_forced_rotation_regenerates_credential() {
        let dir = tempfile::tempdir().unwrap();
        let cred = resolved(
            ResourceKind::RandomCredential,
            "sql-admin-password",
            &[
                ("kind", "password"),
                ("length", "32"),
                ("include_special", "true"),
            ],
        );

        let provider = LocalProvider::open(dir.path()).unwrap();
        let first = provider.create(&cred).await.unwrap()["value"].clone();

        let provider = LocalProvider::open(dir.path()).unwrap().with_forced_rotation();
        let second = provider.create(&cred).await.unwrap()["value"].clone();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_blob_requires_readable_source() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path()).unwrap();
        let err = provider
            .create(&resolved(
                ResourceKind::Blob,
                "api-package",
                &[("name", "api.zip"), ("source", "/nonexistent/api.zip")],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_blob_hashes_source_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("api.zip");
        std::fs::write(&archive, b"package-bytes").unwrap();

        let provider = LocalProvider::open(dir.path()).unwrap();
        let attrs = provider
            .create(&resolved(
                ResourceKind::Blob,
                "api-package",
                &[
                    ("name", "api.zip"),
                    ("source", archive.to_str().unwrap()),
                ],
            ))
            .await
            .unwrap();
        assert!(attrs["content_hash"].starts_with("blake3:"));
    }

    #[tokio::test]
    async fn test_missing_config_is_provider_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path()).unwrap();
        let err = provider
            .create(&resolved(ResourceKind::ResourceGroup, "rg", &[]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing required config"));
    }
}
