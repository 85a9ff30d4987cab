//! Deployment context — owns the resource graph, the resolution slot for
//! every declared resource, and the export map, for exactly one run.
//!
//! Declaration registers a node and hands back a [`ResourceRef`] whose fields
//! are deferred. The engine later fulfills each slot in topological order;
//! dropping a slot unresolved surfaces as `OutputError::Aborted` downstream.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use super::graph::{GraphError, ResourceGraph, ResourceKind, ResourceNode};
use super::output::{Input, Output, OutputError};

/// Attributes of a resolved resource, as returned by the engine.
pub type ResourceAttrs = IndexMap<String, String>;

/// Sender half of a resource's resolution slot.
pub type ResolutionSlot = oneshot::Sender<Result<ResourceAttrs, OutputError>>;

/// Reference to a declared resource. All fields are deferred.
#[derive(Debug, Clone)]
pub struct ResourceRef {
    name: String,
    kind: ResourceKind,
    state: Output<ResourceAttrs>,
}

impl ResourceRef {
    /// Logical name of the underlying declaration.
    pub fn logical_name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The full resolved attribute map.
    pub fn state(&self) -> Output<ResourceAttrs> {
        self.state.clone()
    }

    /// Deferred projection of a single attribute. A missing attribute poisons
    /// the composition rather than defaulting.
    pub fn attr(&self, key: &str) -> Output<String> {
        let resource = self.name.clone();
        let attribute = key.to_string();
        self.state.clone().try_map(move |attrs| {
            attrs
                .get(&attribute)
                .cloned()
                .ok_or(OutputError::MissingAttribute {
                    resource,
                    attribute,
                })
        })
    }
}

/// Context threaded through every declaration call.
#[derive(Debug, Default)]
pub struct DeploymentContext {
    graph: ResourceGraph,
    slots: FxHashMap<String, ResolutionSlot>,
    memo: FxHashMap<String, (String, ResourceRef)>,
    exports: IndexMap<String, Output<String>>,
}

impl DeploymentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. Returns a reference whose fields resolve once the
    /// engine applies the node. Fails synchronously on a malformed graph.
    ///
    /// Dependency edges are the union of `depends_on` and the sources of
    /// every deferred configuration value, so declared config and declared
    /// edges cannot drift apart.
    pub fn register(
        &mut self,
        kind: ResourceKind,
        name: &str,
        config: IndexMap<String, Input>,
        depends_on: Vec<String>,
    ) -> Result<ResourceRef, GraphError> {
        let mut depends_on = depends_on;
        for input in config.values() {
            for source in input.sources() {
                if !depends_on.contains(source) {
                    depends_on.push(source.clone());
                }
            }
        }

        self.graph.insert(ResourceNode {
            kind,
            name: name.to_string(),
            config,
            depends_on,
        })?;

        let (tx, rx) = oneshot::channel();
        self.slots.insert(name.to_string(), tx);

        let logical = name.to_string();
        let state = Output::from_future_with_sources(
            async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(OutputError::Aborted(logical)),
                }
            },
            vec![name.to_string()],
        );

        Ok(ResourceRef {
            name: name.to_string(),
            kind,
            state,
        })
    }

    /// Register a resource idempotently under its logical name: re-declaring
    /// with an identical fingerprint returns the original reference, so the
    /// deferred value is produced once. A conflicting fingerprint under the
    /// same name is a duplicate.
    pub fn register_memoized(
        &mut self,
        kind: ResourceKind,
        name: &str,
        fingerprint: String,
        config: IndexMap<String, Input>,
        depends_on: Vec<String>,
    ) -> Result<ResourceRef, GraphError> {
        if let Some((existing, rref)) = self.memo.get(name) {
            if *existing == fingerprint {
                return Ok(rref.clone());
            }
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        let rref = self.register(kind, name, config, depends_on)?;
        self.memo
            .insert(name.to_string(), (fingerprint, rref.clone()));
        Ok(rref)
    }

    /// Add a named value to the terminal output map. Values may be deferred;
    /// the engine resolves them after all resources have applied.
    pub fn export(&mut self, name: &str, value: Output<String>) {
        self.exports.insert(name.to_string(), value);
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Seal the context into a deployment. Validates the graph (toposort)
    /// before any deferred composition is attempted; on error nothing is
    /// submitted and no output map exists.
    pub fn into_deployment(self) -> Result<Deployment, GraphError> {
        let order = self.graph.execution_order()?;
        Ok(Deployment {
            graph: self.graph,
            order,
            slots: self.slots,
            exports: self.exports,
        })
    }
}

/// A sealed, validated deployment ready for the engine.
#[derive(Debug)]
pub struct Deployment {
    pub(crate) graph: ResourceGraph,
    pub(crate) order: Vec<String>,
    pub(crate) slots: FxHashMap<String, ResolutionSlot>,
    pub(crate) exports: IndexMap<String, Output<String>>,
}

impl Deployment {
    /// Resource names in execution order.
    pub fn execution_order(&self) -> &[String] {
        &self.order
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Names of the exported outputs, in declaration order.
    pub fn export_names(&self) -> Vec<String> {
        self.exports.keys().cloned().collect()
    }
}
