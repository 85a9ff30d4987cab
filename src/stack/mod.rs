//! The deployment assembly: one parameterized invocation wiring every
//! resource and derived secret of the stack.
//!
//! Shape of the graph: resource group → storage account → keys → storage
//! connection string; plan → web app; optional telemetry component; optional
//! SQL server/database/firewall with generated admin credentials; optional
//! deployment package (container, blob, signed read-only URL). The web app
//! receives the three secret settings plus the package URL; the export map
//! always carries `primaryStorageKey`.

use crate::core::config::StackConfig;
use crate::core::context::{Deployment, DeploymentContext};
use crate::core::graph::GraphError;
use crate::resources::group::resource_group;
use crate::resources::insights::component;
use crate::resources::random::{random_credential, CredentialKind, CredentialSpec};
use crate::resources::sql;
use crate::resources::storage::{
    self, account_keys, blob, blob_container, sign_blob_read_url, storage_account, PublicAccess,
};
use crate::resources::web::{app_service_plan, web_app, AppSetting};

/// Assemble the full desired-state graph from a stack configuration. Pure
/// declaration: the returned deployment has been graph-checked but nothing
/// has been submitted to a provider yet.
pub fn assemble(config: &StackConfig) -> Result<Deployment, GraphError> {
    let mut ctx = DeploymentContext::new();
    let base = &config.name;

    let group = resource_group(&mut ctx, &format!("{}-rg", base), &config.location)?;
    let account = storage_account(&mut ctx, &format!("{}-sa", base), &group)?;
    let keys = account_keys(&account);
    let storage_conn = storage::connection_string(account.name(), keys);

    let plan = app_service_plan(&mut ctx, &format!("{}-plan", base), &group, &config.plan)?;

    let mut settings = vec![AppSetting::new("STORAGE_CONNECTION", storage_conn.clone())];

    if config.insights.enabled {
        let insights = component(&mut ctx, &format!("{}-insights", base), &group)?;
        settings.push(AppSetting::new(
            "APPINSIGHTS_INSTRUMENTATIONKEY",
            insights.instrumentation_key(),
        ));
    }

    if config.sql.enabled {
        let admin_login = random_credential(
            &mut ctx,
            &format!("{}-sql-admin-user", base),
            CredentialKind::Username,
            CredentialSpec {
                length: config.sql.admin_username_length,
                include_special: false,
            },
        )?;
        let admin_password = random_credential(
            &mut ctx,
            &format!("{}-sql-admin-password", base),
            CredentialKind::Password,
            CredentialSpec {
                length: config.sql.admin_password_length,
                include_special: config.sql.password_include_special,
            },
        )?;
        let server = sql::sql_server(
            &mut ctx,
            &format!("{}-sql", base),
            &group,
            &admin_login,
            &admin_password,
        )?;
        let database = sql::sql_database(
            &mut ctx,
            &format!("{}-db", base),
            &group,
            &server,
            &config.sql.database,
            &config.sql.sku,
        )?;
        sql::firewall_rule(
            &mut ctx,
            &format!("{}-sql-allow", base),
            &group,
            &server,
            &config.sql.firewall,
        )?;
        let db_conn = sql::connection_string(
            &server,
            &database,
            admin_login.value(),
            admin_password.value(),
        );
        settings.push(AppSetting::new("DATABASE_CONNECTION", db_conn));
    }

    if let Some(ref package) = config.package {
        let container = blob_container(
            &mut ctx,
            &package.container,
            &group,
            &account,
            PublicAccess::None,
        )?;
        let archive = blob(
            &mut ctx,
            &format!("{}-package", base),
            &package.blob,
            &group,
            &account,
            &container,
            &package.source,
        )?;
        let package_url = sign_blob_read_url(&account, &container, &archive, &package.sas);
        settings.push(AppSetting::new("WEBSITE_RUN_FROM_PACKAGE", package_url));
    }

    let app = web_app(
        &mut ctx,
        &format!("{}-app", base),
        &group,
        &plan,
        &config.webapp,
        settings,
    )?;

    ctx.export("primaryStorageKey", storage_conn);
    ctx.export("webAppHostname", app.default_hostname());

    ctx.into_deployment()
}
