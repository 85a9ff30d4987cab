//! Resource group — the container every other resource lands in.

use indexmap::IndexMap;

use crate::core::context::{DeploymentContext, ResourceRef};
use crate::core::graph::{GraphError, ResourceKind};
use crate::core::output::Output;

/// Reference to a declared resource group.
#[derive(Debug, Clone)]
pub struct ResourceGroupRef {
    pub(crate) inner: ResourceRef,
}

impl ResourceGroupRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    /// Physical (engine-assigned) group name.
    pub fn name(&self) -> Output<String> {
        self.inner.attr("name")
    }
}

/// Declare a resource group. Registers a node with no dependencies.
pub fn resource_group(
    ctx: &mut DeploymentContext,
    name: &str,
    location: &str,
) -> Result<ResourceGroupRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("location".to_string(), location.into());
    let inner = ctx.register(ResourceKind::ResourceGroup, name, config, vec![])?;
    Ok(ResourceGroupRef { inner })
}
