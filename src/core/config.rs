//! Stack configuration — YAML schema and structural validation.
//!
//! One `stack.yaml` parameterizes the whole assembly. The policy-sensitive
//! values (SQL firewall allow-range, SAS validity window) are surfaced here
//! instead of being hard-coded in the assembler.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name — prefixes every logical resource name
    pub name: String,

    /// Cloud region for the resource group
    #[serde(default = "default_location")]
    pub location: String,

    /// App Service plan SKU
    #[serde(default)]
    pub plan: PlanConfig,

    /// Web app site configuration
    #[serde(default)]
    pub webapp: WebAppConfig,

    /// Application Insights
    #[serde(default)]
    pub insights: InsightsConfig,

    /// SQL server, database, and network policy
    #[serde(default)]
    pub sql: SqlConfig,

    /// Deployment package (blob + signed read URL)
    #[serde(default)]
    pub package: Option<PackageConfig>,
}

fn default_location() -> String {
    "westeurope".to_string()
}

/// App Service plan SKU — passed through as an opaque bundle; the engine
/// validates it, not this code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "default_plan_kind")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub reserved: bool,
    #[serde(default = "default_plan_tier")]
    pub tier: String,
    #[serde(default = "default_plan_size")]
    pub size: String,
    #[serde(default = "default_plan_family")]
    pub family: String,
    #[serde(default = "default_plan_capacity")]
    pub capacity: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            kind: default_plan_kind(),
            reserved: true,
            tier: default_plan_tier(),
            size: default_plan_size(),
            family: default_plan_family(),
            capacity: default_plan_capacity(),
        }
    }
}

fn default_plan_kind() -> String {
    "Linux".to_string()
}

fn default_plan_tier() -> String {
    "Basic".to_string()
}

fn default_plan_size() -> String {
    "B1".to_string()
}

fn default_plan_family() -> String {
    "B".to_string()
}

fn default_plan_capacity() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Web app site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAppConfig {
    #[serde(default = "default_true")]
    pub always_on: bool,
    #[serde(default = "default_true")]
    pub websockets_enabled: bool,
    #[serde(default = "default_runtime_stack")]
    pub runtime_stack: String,
    #[serde(default = "default_true")]
    pub https_only: bool,
}

impl Default for WebAppConfig {
    fn default() -> Self {
        Self {
            always_on: true,
            websockets_enabled: true,
            runtime_stack: default_runtime_stack(),
            https_only: true,
        }
    }
}

fn default_runtime_stack() -> String {
    "DOTNETCORE|8.0".to_string()
}

/// Application Insights toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// SQL server/database configuration and network policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sql_database")]
    pub database: String,

    #[serde(default = "default_sql_sku")]
    pub sku: String,

    #[serde(default = "default_username_length")]
    pub admin_username_length: usize,

    #[serde(default = "default_password_length")]
    pub admin_password_length: usize,

    /// Whether generated passwords may include special characters
    #[serde(default = "default_true")]
    pub password_include_special: bool,

    /// Client IP allow-range. The 0.0.0.0–0.0.0.0 default admits all
    /// provider-internal traffic; narrow it for anything production-facing.
    #[serde(default)]
    pub firewall: IpRange,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: default_sql_database(),
            sku: default_sql_sku(),
            admin_username_length: default_username_length(),
            admin_password_length: default_password_length(),
            password_include_special: true,
            firewall: IpRange::default(),
        }
    }
}

fn default_sql_database() -> String {
    "conference".to_string()
}

fn default_sql_sku() -> String {
    "S0".to_string()
}

fn default_username_length() -> usize {
    12
}

fn default_password_length() -> usize {
    16
}

/// Inclusive IPv4 allow-range for the SQL firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRange {
    pub start: String,
    pub end: String,
}

impl Default for IpRange {
    fn default() -> Self {
        Self {
            start: "0.0.0.0".to_string(),
            end: "0.0.0.0".to_string(),
        }
    }
}

/// Deployment package: source archive, blob placement, SAS validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default = "default_package_container")]
    pub container: String,

    #[serde(default = "default_package_blob")]
    pub blob: String,

    /// Local path of the archive uploaded as the deployment blob
    pub source: String,

    #[serde(default)]
    pub sas: SasWindow,
}

fn default_package_container() -> String {
    "deployments".to_string()
}

fn default_package_blob() -> String {
    "api.zip".to_string()
}

/// Fixed validity window for the signed read URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SasWindow {
    pub start: String,
    pub expiry: String,
}

impl Default for SasWindow {
    fn default() -> Self {
        Self {
            start: "2024-01-01T00:00:00Z".to_string(),
            expiry: "2034-01-01T00:00:00Z".to_string(),
        }
    }
}

/// Configuration failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error("YAML parse error: {0}")]
    Parse(String),
}

/// Parse a stack.yaml file from disk.
pub fn load_config(path: &Path) -> Result<StackConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_config(&content)
}

/// Parse a stack.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, ConfigError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// A structural validation finding.
#[derive(Debug, Clone)]
pub struct ValidationFinding {
    pub message: String,
}

/// Validate a parsed config. Returns a list of findings (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();
    let mut push = |message: String| findings.push(ValidationFinding { message });

    if config.version != "1.0" {
        push(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }

    if config.name.is_empty() {
        push("name must not be empty".to_string());
    }

    if config.plan.capacity == 0 {
        push("plan capacity must be at least 1".to_string());
    }

    if config.sql.enabled {
        if config.sql.database.is_empty() {
            push("sql.database must not be empty".to_string());
        }
        if config.sql.admin_password_length < 8 {
            push("sql.admin_password_length must be at least 8".to_string());
        }
        for (label, addr) in [
            ("sql.firewall.start", &config.sql.firewall.start),
            ("sql.firewall.end", &config.sql.firewall.end),
        ] {
            if addr.parse::<Ipv4Addr>().is_err() {
                push(format!("{} is not a valid IPv4 address: '{}'", label, addr));
            }
        }
    }

    if let Some(ref package) = config.package {
        if package.source.is_empty() {
            push("package.source must not be empty".to_string());
        }
        if package.container.is_empty() {
            push("package.container must not be empty".to_string());
        }
        if package.sas.start == package.sas.expiry {
            push("package.sas window is empty (start equals expiry)".to_string());
        }
    }

    findings
}
