//! Deferred value composition.
//!
//! An [`Output`] is a value that is not known at declaration time: it resolves
//! exactly once, later, when the engine applies the resource that produces it.
//! Compositions (`map`, `zip`) schedule continuations over the shared future
//! instead of blocking, so independent resources stay independent and a
//! consumer never observes an unresolved producer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

/// Composition failure. A failed producer poisons every downstream
/// composition that depends on it; dependents never substitute a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    /// The producing resource was never applied — the run aborted first.
    #[error("'{0}' was never resolved: the run aborted before it was applied")]
    Aborted(String),

    /// The producing resource failed at apply time.
    #[error("producer '{resource}' failed: {message}")]
    Poisoned { resource: String, message: String },

    /// A composition projected an attribute the resolved resource lacks.
    #[error("resource '{resource}' has no attribute '{attribute}'")]
    MissingAttribute { resource: String, attribute: String },

    /// A composed collection was empty where at least one element is required.
    #[error("{0}")]
    Empty(String),
}

/// A single-resolution deferred value.
///
/// Cloning is cheap: clones share one underlying future, so the value is
/// produced once regardless of how many compositions consume it. Every output
/// carries the logical names of the resources it derives from; compositions
/// union them, so a declaration consuming an output inherits the exact
/// dependency edges its configuration actually uses.
pub struct Output<T>
where
    T: Clone,
{
    inner: Shared<BoxFuture<'static, Result<T, OutputError>>>,
    sources: Arc<Vec<String>>,
}

impl<T: Clone> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sources: self.sources.clone(),
        }
    }
}

impl<T: Clone> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Output(<deferred>)")
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap an already-known value.
    pub fn resolved(value: T) -> Self {
        Self::from_future(async move { Ok(value) })
    }

    /// Wrap a value that resolves when `fut` completes.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, OutputError>> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
            sources: Arc::new(Vec::new()),
        }
    }

    /// Wrap a future produced by the named resources.
    pub(crate) fn from_future_with_sources<F>(fut: F, sources: Vec<String>) -> Self
    where
        F: Future<Output = Result<T, OutputError>> + Send + 'static,
    {
        Self {
            inner: fut.boxed().shared(),
            sources: Arc::new(sources),
        }
    }

    /// Logical names of the resources this value derives from.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Compose a pure function over the eventual value.
    pub fn map<U, F>(self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let sources = self.sources.clone();
        Output {
            inner: async move { self.inner.await.map(f) }.boxed().shared(),
            sources,
        }
    }

    /// Compose a fallible function over the eventual value.
    pub fn try_map<U, F>(self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, OutputError> + Send + 'static,
    {
        let sources = self.sources.clone();
        Output {
            inner: async move { self.inner.await.and_then(f) }.boxed().shared(),
            sources,
        }
    }

    /// Combine two deferred values into one. The result preserves the
    /// dependency edge on both inputs: it resolves only after both have, and
    /// its sources are the union of theirs.
    pub fn zip<U>(self, other: Output<U>) -> Output<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let sources = merge_sources(&self.sources, &other.sources);
        Output {
            inner: async move {
                let a = self.inner.await?;
                let b = other.inner.await?;
                Ok((a, b))
            }
            .boxed()
            .shared(),
            sources,
        }
    }

    /// Await the resolved value. Only the engine (or a test harness) calls
    /// this; declaration code composes instead of resolving.
    pub async fn resolve(self) -> Result<T, OutputError> {
        self.inner.await
    }
}

fn merge_sources(a: &Arc<Vec<String>>, b: &Arc<Vec<String>>) -> Arc<Vec<String>> {
    if b.is_empty() {
        return a.clone();
    }
    if a.is_empty() {
        return b.clone();
    }
    let mut merged: Vec<String> = a.as_ref().clone();
    for source in b.iter() {
        if !merged.contains(source) {
            merged.push(source.clone());
        }
    }
    Arc::new(merged)
}

/// A configuration value: either known at declaration time or deferred.
#[derive(Clone)]
pub enum Input {
    Literal(String),
    Deferred(Output<String>),
}

impl Input {
    /// Resolve to a concrete string. Literals resolve immediately.
    pub async fn resolve(&self) -> Result<String, OutputError> {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::Deferred(o) => o.clone().resolve().await,
        }
    }

    /// Whether this input is already known at declaration time.
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Logical names of the resources this input derives from.
    pub fn sources(&self) -> &[String] {
        match self {
            Self::Literal(_) => &[],
            Self::Deferred(o) => o.sources(),
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "Literal({:?})", s),
            Self::Deferred(_) => f.write_str("Deferred(<output>)"),
        }
    }
}

impl From<&str> for Input {
    fn from(s: &str) -> Self {
        Self::Literal(s.to_string())
    }
}

impl From<String> for Input {
    fn from(s: String) -> Self {
        Self::Literal(s)
    }
}

impl From<Output<String>> for Input {
    fn from(o: Output<String>) -> Self {
        Self::Deferred(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolved_value() {
        let o = Output::resolved(42u32);
        assert_eq!(o.resolve().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_map_composes() {
        let o = Output::resolved("sa1".to_string()).map(|n| format!("name={}", n));
        assert_eq!(o.resolve().await.unwrap(), "name=sa1");
    }

    #[tokio::test]
    async fn test_zip_preserves_both_inputs() {
        let a = Output::resolved(1u32);
        let b = Output::resolved("x".to_string());
        let (x, y) = a.zip(b).resolve().await.unwrap();
        assert_eq!(x, 1);
        assert_eq!(y, "x");
    }

    #[tokio::test]
    async fn test_clone_shares_resolution() {
        let (tx, rx) = tokio::sync::oneshot::channel::<Result<String, OutputError>>();
        let o = Output::from_future(async move {
            rx.await
                .unwrap_or_else(|_| Err(OutputError::Aborted("x".into())))
        });
        let o2 = o.clone();
        tx.send(Ok("once".to_string())).unwrap();
        assert_eq!(o.resolve().await.unwrap(), "once");
        assert_eq!(o2.resolve().await.unwrap(), "once");
    }

    #[tokio::test]
    async fn test_poison_propagates_through_map_and_zip() {
        let failed: Output<String> = Output::from_future(async {
            Err(OutputError::Poisoned {
                resource: "sa".into(),
                message: "quota exceeded".into(),
            })
        });
        let ok = Output::resolved("fine".to_string());
        let composed = failed.map(|s| s.len()).zip(ok);
        let err = composed.resolve().await.unwrap_err();
        assert!(matches!(err, OutputError::Poisoned { .. }));
    }

    #[tokio::test]
    async fn test_try_map_error() {
        let o = Output::resolved("".to_string()).try_map(|s| {
            if s.is_empty() {
                Err(OutputError::Empty("no keys returned".into()))
            } else {
                Ok(s)
            }
        });
        assert!(matches!(
            o.resolve().await.unwrap_err(),
            OutputError::Empty(_)
        ));
    }

    #[tokio::test]
    async fn test_sources_survive_composition() {
        let a = Output::from_future_with_sources(
            async { Ok("a".to_string()) },
            vec!["sa".to_string()],
        );
        let b = Output::from_future_with_sources(
            async { Ok("b".to_string()) },
            vec!["blob".to_string(), "sa".to_string()],
        );
        let zipped = a.map(|s| s.len()).zip(b);
        assert_eq!(zipped.sources(), &["sa", "blob"]);
        assert_eq!(zipped.resolve().await.unwrap(), (1, "b".to_string()));
    }

    #[tokio::test]
    async fn test_input_literal_and_deferred() {
        let lit = Input::from("plain");
        assert!(lit.is_literal());
        assert_eq!(lit.resolve().await.unwrap(), "plain");

        let def = Input::from(Output::resolved("later".to_string()));
        assert!(!def.is_literal());
        assert_eq!(def.resolve().await.unwrap(), "later");
    }
}
