//! Application Insights component declaration.

use indexmap::IndexMap;

use crate::core::context::{DeploymentContext, ResourceRef};
use crate::core::graph::{GraphError, ResourceKind};
use crate::core::output::Output;

use super::group::ResourceGroupRef;

/// Reference to a declared Application Insights component.
#[derive(Debug, Clone)]
pub struct AppInsightsRef {
    pub(crate) inner: ResourceRef,
}

impl AppInsightsRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    /// Instrumentation key, fed into the web app's settings.
    pub fn instrumentation_key(&self) -> Output<String> {
        self.inner.attr("instrumentation_key")
    }
}

/// Declare a web-kind telemetry component.
pub fn component(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
) -> Result<AppInsightsRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("application_type".to_string(), "web".into());
    config.insert("kind".to_string(), "web".into());
    let inner = ctx.register(
        ResourceKind::AppInsights,
        name,
        config,
        vec![group.logical_name().to_string()],
    )?;
    Ok(AppInsightsRef { inner })
}
