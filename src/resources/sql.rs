//! SQL server, database, and firewall declarations, plus the derived
//! database connection string.

use indexmap::IndexMap;

use crate::core::config::IpRange;
use crate::core::context::{DeploymentContext, ResourceRef};
use crate::core::graph::{GraphError, ResourceKind};
use crate::core::output::Output;

use super::group::ResourceGroupRef;
use super::random::CredentialRef;

/// Reference to a declared SQL server.
#[derive(Debug, Clone)]
pub struct SqlServerRef {
    pub(crate) inner: ResourceRef,
}

impl SqlServerRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    pub fn name(&self) -> Output<String> {
        self.inner.attr("name")
    }

    /// Fully-qualified domain name of the server.
    pub fn fqdn(&self) -> Output<String> {
        self.inner.attr("fqdn")
    }
}

/// Declare a SQL server. Admin credentials come from declared credential
/// resources, so the dependency edges match the configuration by
/// construction.
pub fn sql_server(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
    admin_login: &CredentialRef,
    admin_password: &CredentialRef,
) -> Result<SqlServerRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("admin_login".to_string(), admin_login.value().into());
    config.insert("admin_password".to_string(), admin_password.value().into());
    config.insert("version".to_string(), "12.0".into());
    let inner = ctx.register(
        ResourceKind::SqlServer,
        name,
        config,
        vec![
            group.logical_name().to_string(),
            admin_login.logical_name().to_string(),
            admin_password.logical_name().to_string(),
        ],
    )?;
    Ok(SqlServerRef { inner })
}

/// Reference to a declared SQL database.
#[derive(Debug, Clone)]
pub struct SqlDatabaseRef {
    pub(crate) inner: ResourceRef,
}

impl SqlDatabaseRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    pub fn name(&self) -> Output<String> {
        self.inner.attr("name")
    }
}

/// Declare a database on a server. SKU passes through opaquely.
pub fn sql_database(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
    server: &SqlServerRef,
    database_name: &str,
    sku: &str,
) -> Result<SqlDatabaseRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("server".to_string(), server.name().into());
    config.insert("name".to_string(), database_name.into());
    config.insert("sku".to_string(), sku.into());
    let inner = ctx.register(
        ResourceKind::SqlDatabase,
        name,
        config,
        vec![
            group.logical_name().to_string(),
            server.logical_name().to_string(),
        ],
    )?;
    Ok(SqlDatabaseRef { inner })
}

/// Reference to a declared firewall rule.
#[derive(Debug, Clone)]
pub struct FirewallRuleRef {
    pub(crate) inner: ResourceRef,
}

impl FirewallRuleRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }
}

/// Declare an IP allow-range on a server. The range is whatever the stack
/// configuration says; the widest-open default lives there, not here.
pub fn firewall_rule(
    ctx: &mut DeploymentContext,
    name: &str,
    group: &ResourceGroupRef,
    server: &SqlServerRef,
    range: &IpRange,
) -> Result<FirewallRuleRef, GraphError> {
    let mut config = IndexMap::new();
    config.insert("resource_group".to_string(), group.name().into());
    config.insert("server".to_string(), server.name().into());
    config.insert("start_ip".to_string(), range.start.as_str().into());
    config.insert("end_ip".to_string(), range.end.as_str().into());
    let inner = ctx.register(
        ResourceKind::SqlFirewallRule,
        name,
        config,
        vec![
            group.logical_name().to_string(),
            server.logical_name().to_string(),
        ],
    )?;
    Ok(FirewallRuleRef { inner })
}

/// Compose server, database, and admin credentials into an ADO.NET-style
/// connection string. All four inputs stay deferred.
pub fn connection_string(
    server: &SqlServerRef,
    database: &SqlDatabaseRef,
    login: Output<String>,
    password: Output<String>,
) -> Output<String> {
    server
        .fqdn()
        .zip(database.name())
        .zip(login)
        .zip(password)
        .map(|(((fqdn, database), login), password)| {
            format!(
                "Server=tcp:{},1433;Initial Catalog={};Persist Security Info=False;\
                 User ID={};Password={};MultipleActiveResultSets=False;Encrypt=True;\
                 TrustServerCertificate=False;Connection Timeout=30;",
                fqdn, database, login, password
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ResourceAttrs;
    use crate::resources::group::resource_group;
    use crate::resources::random::{random_credential, CredentialKind, CredentialSpec};

    fn declare_server(ctx: &mut DeploymentContext) -> (ResourceGroupRef, SqlServerRef) {
        let rg = resource_group(ctx, "rg", "westeurope").unwrap();
        let user = random_credential(
            ctx,
            "sql-admin-user",
            CredentialKind::Username,
            CredentialSpec {
                length: 12,
                include_special: false,
            },
        )
        .unwrap();
        let password = random_credential(
            ctx,
            "sql-admin-password",
            CredentialKind::Password,
            CredentialSpec {
                length: 16,
                include_special: true,
            },
        )
        .unwrap();
        let server = sql_server(ctx, "sql", &rg, &user, &password).unwrap();
        (rg, server)
    }

    #[test]
    fn test_server_depends_on_credentials() {
        let mut ctx = DeploymentContext::new();
        let (_rg, server) = declare_server(&mut ctx);
        assert_eq!(server.logical_name(), "sql");
        let node = ctx.graph().get("sql").unwrap();
        assert!(node.depends_on.contains(&"sql-admin-user".to_string()));
        assert!(node.depends_on.contains(&"sql-admin-password".to_string()));
        assert!(!node.config["admin_password"].is_literal());
    }

    #[test]
    fn test_firewall_range_from_config() {
        let mut ctx = DeploymentContext::new();
        let (rg, server) = declare_server(&mut ctx);
        let range = IpRange::default();
        firewall_rule(&mut ctx, "sql-firewall", &rg, &server, &range).unwrap();
        let node = ctx.graph().get("sql-firewall").unwrap();
        assert!(matches!(&node.config["start_ip"], crate::core::output::Input::Literal(s) if s == "0.0.0.0"));
    }

    #[tokio::test]
    async fn test_connection_string_shape() {
        let mut ctx = DeploymentContext::new();
        let (rg, server) = declare_server(&mut ctx);
        let db = sql_database(&mut ctx, "db", &rg, &server, "conference", "S0").unwrap();
        let conn = connection_string(
            &server,
            &db,
            Output::resolved("admin7".to_string()),
            Output::resolved("p4ssw0rd!".to_string()),
        );

        let mut deployment = ctx.into_deployment().unwrap();
        for name in ["rg", "sql-admin-user", "sql-admin-password"] {
            deployment
                .slots
                .remove(name)
                .unwrap()
                .send(Ok(ResourceAttrs::new()))
                .unwrap();
        }
        let mut attrs = ResourceAttrs::new();
        attrs.insert("name".to_string(), "sql-x1".to_string());
        attrs.insert("fqdn".to_string(), "sql-x1.database.windows.net".to_string());
        deployment.slots.remove("sql").unwrap().send(Ok(attrs)).unwrap();
        let mut attrs = ResourceAttrs::new();
        attrs.insert("name".to_string(), "conference".to_string());
        deployment.slots.remove("db").unwrap().send(Ok(attrs)).unwrap();

        let conn = conn.resolve().await.unwrap();
        assert!(conn.starts_with("Server=tcp:sql-x1.database.windows.net,1433;"));
        assert!(conn.contains("Initial Catalog=conference;"));
        assert!(conn.contains("User ID=admin7;"));
        assert!(conn.contains("Password=p4ssw0rd!;"));
        assert!(conn.contains("Encrypt=True;"));
    }
}
