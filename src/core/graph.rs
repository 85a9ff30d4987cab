//! Resource graph construction and ordering.
//!
//! The graph is append-only: every node is validated as it is inserted
//! (unique logical name, well-formed name, dependencies already declared), so
//! a malformed graph fails fast at declaration time, before any deferred
//! composition is attempted. Execution order is a Kahn toposort with
//! alphabetical tie-breaking for determinism.

use std::collections::VecDeque;
use std::fmt;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::output::Input;

/// Kinds of cloud resources the assembler can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ResourceGroup,
    StorageAccount,
    BlobContainer,
    Blob,
    AppServicePlan,
    WebApp,
    AppInsights,
    RandomCredential,
    SqlServer,
    SqlDatabase,
    SqlFirewallRule,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceGroup => write!(f, "resource_group"),
            Self::StorageAccount => write!(f, "storage_account"),
            Self::BlobContainer => write!(f, "blob_container"),
            Self::Blob => write!(f, "blob"),
            Self::AppServicePlan => write!(f, "app_service_plan"),
            Self::WebApp => write!(f, "web_app"),
            Self::AppInsights => write!(f, "app_insights"),
            Self::RandomCredential => write!(f, "random_credential"),
            Self::SqlServer => write!(f, "sql_server"),
            Self::SqlDatabase => write!(f, "sql_database"),
            Self::SqlFirewallRule => write!(f, "sql_firewall_rule"),
        }
    }
}

/// Structural graph failure, detected synchronously at declaration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate logical name '{0}'")]
    DuplicateName(String),

    #[error("resource '{resource}' depends on undeclared resource '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },

    #[error("invalid logical name '{0}': must match [a-z][a-z0-9-]*, max 63 chars")]
    InvalidName(String),

    #[error("dependency cycle detected involving: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// A single declared resource: kind, configuration, and dependency edges.
/// Immutable once inserted.
#[derive(Debug)]
pub struct ResourceNode {
    pub kind: ResourceKind,
    pub name: String,
    pub config: IndexMap<String, Input>,
    pub depends_on: Vec<String>,
}

/// The desired-state graph for one run. Append-only during construction.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    nodes: IndexMap<String, ResourceNode>,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[a-z][a-z0-9-]{0,62}$").unwrap())
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, enforcing structural invariants. Dependencies must
    /// reference previously declared resources, so the graph cannot acquire a
    /// cycle through this path.
    pub fn insert(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if !name_pattern().is_match(&node.name) {
            return Err(GraphError::InvalidName(node.name));
        }
        if self.nodes.contains_key(&node.name) {
            return Err(GraphError::DuplicateName(node.name));
        }
        for dep in &node.depends_on {
            if !self.nodes.contains_key(dep) {
                return Err(GraphError::UnknownDependency {
                    resource: node.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        self.nodes.insert(node.name.clone(), node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResourceNode)> {
        self.nodes.iter()
    }

    /// Topological execution order. Kahn's algorithm with alphabetical
    /// tie-breaking; reports cycle members if the sort cannot complete.
    pub fn execution_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();

        for name in self.nodes.keys() {
            in_degree.insert(name, 0);
            adjacency.insert(name, Vec::new());
        }

        for (name, node) in &self.nodes {
            for dep in &node.depends_on {
                adjacency.get_mut(dep.as_str()).unwrap().push(name);
                *in_degree.get_mut(name.as_str()).unwrap() += 1;
            }
        }

        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut zero_degree: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&name, _)| name)
            .collect();
        zero_degree.sort_unstable();
        queue.extend(zero_degree);

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());

            let mut next_ready: Vec<&str> = Vec::new();
            if let Some(neighbors) = adjacency.get(current) {
                for &neighbor in neighbors {
                    let degree = in_degree.get_mut(neighbor).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor);
                    }
                }
            }
            next_ready.sort_unstable();
            queue.extend(next_ready);
        }

        if order.len() != self.nodes.len() {
            let mut members: Vec<String> = self
                .nodes
                .keys()
                .filter(|name| !order.contains(*name))
                .cloned()
                .collect();
            members.sort_unstable();
            return Err(GraphError::Cycle(members));
        }

        Ok(order)
    }
}
