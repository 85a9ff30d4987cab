//! Apply loop — walk the graph in topological order, submit each resource to
//! the provider, and fulfill its resolution slot.
//!
//! Failure is all-or-nothing: the first provider error poisons the failing
//! resource's slot, drops every remaining slot (dependents observe an
//! aborted run), and suppresses output emission entirely. No partially
//! resolved output map is ever published.

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{error, info};

use crate::core::context::Deployment;
use crate::core::graph::GraphError;
use crate::core::output::OutputError;

use super::provider::{EngineError, ResolvedResource, ResourceProvider};

/// Why a run produced no outputs.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Composition(#[from] OutputError),
}

/// Resolved outputs of a successful run.
pub type ResolvedOutputs = IndexMap<String, String>;

/// Apply a sealed deployment through the given provider.
pub async fn apply(
    deployment: Deployment,
    provider: &dyn ResourceProvider,
) -> Result<ResolvedOutputs, ApplyError> {
    let Deployment {
        graph,
        order,
        mut slots,
        exports,
    } = deployment;

    for name in &order {
        let node = match graph.get(name) {
            Some(node) => node,
            None => continue,
        };

        // Inputs only reference producers earlier in the order, so resolving
        // here never waits on an unfulfilled slot.
        let mut config = IndexMap::new();
        for (key, input) in &node.config {
            config.insert(key.clone(), input.resolve().await?);
        }

        let resolved = ResolvedResource {
            kind: node.kind,
            name: name.clone(),
            config,
            depends_on: node.depends_on.clone(),
        };

        match provider.create(&resolved).await {
            Ok(attrs) => {
                info!(resource = %name, kind = %node.kind, "created");
                if let Some(slot) = slots.remove(name) {
                    let _ = slot.send(Ok(attrs));
                }
            }
            Err(e) => {
                error!(resource = %name, error = %e, "apply failed");
                if let Some(slot) = slots.remove(name) {
                    let _ = slot.send(Err(OutputError::Poisoned {
                        resource: name.clone(),
                        message: e.to_string(),
                    }));
                }
                drop(slots);
                return Err(ApplyError::Engine(e));
            }
        }
    }
    drop(slots);

    let mut outputs = ResolvedOutputs::new();
    for (name, value) in exports {
        outputs.insert(name, value.resolve().await?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use indexmap::IndexMap as Map;

    use crate::core::config::{SasWindow, StackConfig};
    use crate::core::context::{DeploymentContext, ResourceAttrs};
    use crate::core::graph::ResourceKind;
    use crate::engine::provider::LocalProvider;
    use crate::resources::group::resource_group;
    use crate::resources::storage::{account_keys, connection_string, storage_account};

    struct RejectingProvider {
        reject_kind: ResourceKind,
    }

    #[async_trait]
    impl ResourceProvider for RejectingProvider {
        async fn create(&self, resource: &ResolvedResource) -> Result<ResourceAttrs, EngineError> {
            if resource.kind == self.reject_kind {
                return Err(EngineError::Provider {
                    resource: resource.name.clone(),
                    message: "quota exceeded".to_string(),
                });
            }
            let mut attrs = ResourceAttrs::new();
            attrs.insert("name".to_string(), format!("{}-phys", resource.name));
            attrs.insert("key1".to_string(), "K1".to_string());
            Ok(attrs)
        }
    }

    fn storage_deployment() -> (Deployment, crate::core::output::Output<String>) {
        let mut ctx = DeploymentContext::new();
        let rg = resource_group(&mut ctx, "rg", "westeurope").unwrap();
        let sa = storage_account(&mut ctx, "sa", &rg).unwrap();
        let conn = connection_string(sa.name(), account_keys(&sa));
        ctx.export("primaryStorageKey", conn.clone());
        (ctx.into_deployment().unwrap(), conn)
    }

    #[tokio::test]
    async fn test_apply_emits_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::open(dir.path()).unwrap();
        let (deployment, _) = storage_deployment();

        let outputs = apply(deployment, &provider).await.unwrap();
        assert!(outputs.contains_key("primaryStorageKey"));
        assert!(outputs["primaryStorageKey"].starts_with("DefaultEndpointsProtocol=https;"));
    }

    #[tokio::test]
    async fn test_failed_resource_suppresses_outputs_and_poisons() {
        let provider = RejectingProvider {
            reject_kind: ResourceKind::StorageAccount,
        };
        let (deployment, conn) = storage_deployment();

        let err = apply(deployment, &provider).await.unwrap_err();
        assert!(matches!(err, ApplyError::Engine(_)));

        // The dependent composition is poisoned, never defaulted.
        let poisoned = conn.resolve().await.unwrap_err();
        assert!(matches!(poisoned, OutputError::Poisoned { .. }));
    }

    #[tokio::test]
    async fn test_repeated_apply_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        let provider = LocalProvider::open(dir.path()).unwrap();
        let (deployment, _) = storage_deployment();
        let first = apply(deployment, &provider).await.unwrap();

        let provider = LocalProvider::open(dir.path()).unwrap();
        let (deployment, _) = storage_deployment();
        let second = apply(deployment, &provider).await.unwrap();

        assert_eq!(first["primaryStorageKey"], second["primaryStorageKey"]);
    }

    #[tokio::test]
    async fn test_full_stack_apply() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("api.zip");
        std::fs::write(&archive, b"zipbytes").unwrap();

        let mut config: StackConfig =
            serde_yaml_ng::from_str("version: \"1.0\"\nname: conference\n").unwrap();
        config.package = Some(crate::core::config::PackageConfig {
            container: "deployments".to_string(),
            blob: "api.zip".to_string(),
            source: archive.to_string_lossy().to_string(),
            sas: SasWindow::default(),
        });

        let deployment = crate::stack::assemble(&config).unwrap();
        let provider = LocalProvider::open(dir.path()).unwrap();
        let outputs = apply(deployment, &provider).await.unwrap();

        assert!(outputs.contains_key("primaryStorageKey"));
        assert!(outputs["primaryStorageKey"].contains("AccountName="));
        assert!(outputs["webAppHostname"].ends_with(".azurewebsites.net"));
    }

    #[tokio::test]
    async fn test_export_of_missing_attribute_fails_run() {
        let mut ctx = DeploymentContext::new();
        let rg = ctx
            .register(ResourceKind::ResourceGroup, "rg", Map::new(), vec![])
            .unwrap();
        ctx.export("bogus", rg.attr("does-not-exist"));

        struct Bare;
        #[async_trait]
        impl ResourceProvider for Bare {
            async fn create(&self, _: &ResolvedResource) -> Result<ResourceAttrs, EngineError> {
                Ok(ResourceAttrs::new())
            }
        }

        let deployment = ctx.into_deployment().unwrap();
        let err = apply(deployment, &Bare).await.unwrap_err();
        assert!(matches!(err, ApplyError::Composition(_)));
    }
}
