//! Generated credentials.
//!
//! A credential is declared like any other resource; its value is produced by
//! the engine and persisted under the logical name, so re-applying the same
//! declaration does not rotate the secret. Re-declaring the same logical name
//! with the same spec inside one run returns the same deferred value.

use std::fmt;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::context::{DeploymentContext, ResourceRef};
use crate::core::graph::{GraphError, ResourceKind};
use crate::core::output::Output;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SPECIAL: &str = "!#$%&*+-=?@_";

/// What the credential is for. Usernames are constrained to a conservative
/// charset; passwords draw from the full policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Username,
    Password,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => write!(f, "username"),
            Self::Password => write!(f, "password"),
        }
    }
}

/// Length and character-class policy for one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialSpec {
    pub length: usize,
    pub include_special: bool,
}

/// Reference to a declared credential.
#[derive(Debug, Clone)]
pub struct CredentialRef {
    pub(crate) inner: ResourceRef,
}

impl CredentialRef {
    pub fn logical_name(&self) -> &str {
        self.inner.logical_name()
    }

    /// The secret value. Deferred; only other compositions consume it.
    pub fn value(&self) -> Output<String> {
        self.inner.attr("value")
    }
}

/// Declare a random credential. Idempotent per logical name within a run; a
/// conflicting spec under the same name is a duplicate-name error.
pub fn random_credential(
    ctx: &mut DeploymentContext,
    name: &str,
    kind: CredentialKind,
    spec: CredentialSpec,
) -> Result<CredentialRef, GraphError> {
    let fingerprint = format!("{}:{}:{}", kind, spec.length, spec.include_special);
    let mut config = IndexMap::new();
    config.insert("kind".to_string(), kind.to_string().into());
    config.insert("length".to_string(), spec.length.to_string().into());
    config.insert(
        "include_special".to_string(),
        spec.include_special.to_string().into(),
    );
    let inner = ctx.register_memoized(
        ResourceKind::RandomCredential,
        name,
        fingerprint,
        config,
        vec![],
    )?;
    Ok(CredentialRef { inner })
}

/// Generate a credential value honoring the charset policy. Called by the
/// engine, never at declaration time.
pub fn generate(kind: CredentialKind, spec: CredentialSpec, rng: &mut impl Rng) -> String {
    match kind {
        CredentialKind::Username => generate_username(spec.length, rng),
        CredentialKind::Password => generate_password(spec.length, spec.include_special, rng),
    }
}

/// Lowercase letter first (SQL login rule), then lowercase and digits.
fn generate_username(length: usize, rng: &mut impl Rng) -> String {
    let lower: Vec<char> = LOWER.chars().collect();
    let tail: Vec<char> = LOWER.chars().chain(DIGITS.chars()).collect();
    let mut out = String::with_capacity(length);
    out.push(*lower.choose(rng).unwrap());
    for _ in 1..length {
        out.push(*tail.choose(rng).unwrap());
    }
    out
}

/// At least one character from each required class, remainder drawn from the
/// full pool, then shuffled.
fn generate_password(length: usize, include_special: bool, rng: &mut impl Rng) -> String {
    let mut classes: Vec<Vec<char>> = vec![
        LOWER.chars().collect(),
        UPPER.chars().collect(),
        DIGITS.chars().collect(),
    ];
    if include_special {
        classes.push(SPECIAL.chars().collect());
    }
    let pool: Vec<char> = classes.iter().flatten().copied().collect();

    let mut chars: Vec<char> = classes
        .iter()
        .map(|class| *class.choose(rng).unwrap())
        .collect();
    while chars.len() < length {
        chars.push(*pool.choose(rng).unwrap());
    }
    chars.truncate(length);
    chars.shuffle(rng);
    chars.into_iter().collect()
}
