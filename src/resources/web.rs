//! App Service plan and web app declarations.

use indexmap::IndexMap;

use crate::core::config::{PlanConfig, WebAppConfig};
use crate::core::context::{DeploymentContext, ResourceRef};
use crate::core::graph::{GraphError, ResourceKind};
use crate::core::output::{Input, Output};

use super::group::ResourceGroupRef;

/// Reference to a declared App Service plan.
#[derive(Debug, Clone)]
pub struct AppServicePlanRef {
    pub(crate) inner: ResourceRef,
}

impl AppServicePlanRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    /// Engine-assigned plan id, consumed by the web app's site config.
    pub fn id(&self) -> Output<String> {
        self.inner.attr("id")
    }
}

/// Declare a compute plan. The SKU bundle passes through opaquely; the engine
/// validates it, not this code.
pub fn app_service_plan(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
    sku: &PlanConfig,
) -> Result<AppServicePlanRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("kind".to_string(), sku.kind.as_str().into());
    config.insert("reserved".to_string(), sku.reserved.to_string().into());
    config.insert("tier".to_string(), sku.tier.as_str().into());
    config.insert("size".to_string(), sku.size.as_str().into());
    config.insert("family".to_string(), sku.family.as_str().into());
    config.insert("capacity".to_string(), sku.capacity.to_string().into());
    let inner = ctx.register(
        ResourceKind::AppServicePlan,
        name,
        config,
        vec![group.logical_name().to_string()],
    )?;
    Ok(AppServicePlanRef { inner })
}

/// One name/value application setting. Values may be deferred.
#[derive(Debug, Clone)]
pub struct AppSetting {
    pub name: String,
    pub value: Input,
}

impl AppSetting {
    pub fn new(name: &str, value: impl Into<Input>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// Reference to a declared web app. Terminal node of the graph.
#[derive(Debug, Clone)]
pub struct WebAppRef {
    pub(crate) inner: ResourceRef,
}

impl WebAppRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    pub fn default_hostname(&self) -> Output<String> {
        self.inner.attr("default_hostname")
    }
}

/// Declare a web app on a plan. The plan dependency edge is derived from the
/// same reference whose id feeds the site configuration, so declared config
/// and declared edges cannot drift apart. App settings are serialized by the
/// engine only once every deferred value has resolved; the declaration itself
/// is immediate.
pub fn web_app(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
    plan: &AppServicePlanRef,
    site: &WebAppConfig,
    app_settings: Vec<AppSetting>,
) -> Result<WebAppRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("kind".to_string(), "app".into());
    config.insert("server_farm_id".to_string(), plan.id().into());
    config.insert("always_on".to_string(), site.always_on.to_string().into());
    config.insert(
        "websockets_enabled".to_string(),
        site.websockets_enabled.to_string().into(),
    );
    config.insert(
        "runtime_stack".to_string(),
        site.runtime_stack.as_str().into(),
    );
    config.insert("https_only".to_string(), site.https_only.to_string().into());
    for (i, setting) in app_settings.into_iter().enumerate() {
        config.insert(format!("app_setting.{}.name", i), setting.name.into());
        config.insert(format!("app_setting.{}.value", i), setting.value);
    }
    let inner = ctx.register(
        ResourceKind::WebApp,
        name,
        config,
        vec![
            group.logical_name().to_string(),
            plan.logical_name().to_string(),
        ],
    )?;
    Ok(WebAppRef { inner })
}
