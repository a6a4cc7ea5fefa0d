//! # Annotations
//!
//! The annotation protocol that drives reflection. This covers:
//! - The constant annotation keys and the ownership marker
//! - Parsing the destination namespace list from the source Secret
//! - Resolving a destination list against the cluster when the
//!   annotation asks for every namespace

use std::collections::BTreeMap;

use crate::client::ClusterClient;
use crate::errors::Error;

/// Prefix for all reflector annotations
pub const PREFIX: &str = "reflector.havulv.io";

/// Annotation that opts a Secret into reflection when set to `"true"`
pub const REFLECT_ANNOTATION: &str = "reflector.havulv.io/reflect";

/// Annotation holding the comma separated list of destination namespaces
pub const NAMESPACE_ANNOTATION: &str = "reflector.havulv.io/namespaces";

/// Annotation on a replica recording the namespace it was reflected from
pub const REFLECTED_FROM_ANNOTATION: &str = "reflector.havulv.io/reflected-from";

/// Annotation on a replica recording when it was last written (UTC nanoseconds)
pub const REFLECTED_AT_ANNOTATION: &str = "reflector.havulv.io/reflected-at";

/// Annotation on a replica holding the content hash of the source at write time
pub const REFLECTION_HASH_ANNOTATION: &str = "reflector.havulv.io/hash";

/// Annotation marking which entity owns a replica
pub const REFLECTION_OWNER_ANNOTATION: &str = "reflector.havulv.io/owner";

/// Owner value denoting that a replica is owned by this controller
pub const REFLECTION_OWNED: &str = "reflector";

/// The destinations a source Secret asks to be reflected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destinations {
    /// An explicit, ordered, de-duplicated list of namespaces
    Explicit(Vec<String>),
    /// Every namespace in the cluster (`*`, or no annotation at all)
    All,
}

/// Checks if an operation can be performed on an existing secret.
///
/// Ownership is a cooperative protocol: a secret is ours only when it
/// carries the owner annotation with the literal owned value.
pub fn can_operate(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(REFLECTION_OWNER_ANNOTATION)
        .is_some_and(|owner| owner == REFLECTION_OWNED)
}

/// Parses the destination list from the namespaces annotation value.
///
/// Tokens are split on commas, trimmed, and de-duplicated preserving
/// first occurrence. Whitespace-only tokens are discarded. A missing or
/// empty annotation and the literal `*` both expand to all namespaces.
pub fn parse_destinations(value: Option<&str>) -> Destinations {
    let value = match value {
        Some(v) if !v.is_empty() && v != "*" => v,
        _ => return Destinations::All,
    };

    let mut seen = std::collections::HashSet::new();
    let namespaces: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .filter(|ns| seen.insert(ns.to_string()))
        .map(str::to_string)
        .collect();

    if namespaces.is_empty() {
        return Destinations::All;
    }
    Destinations::Explicit(namespaces)
}

/// Resolves the destination namespaces for a source Secret, listing
/// every namespace in the cluster when the annotation asks for it.
pub async fn resolve_destinations(
    client: &dyn ClusterClient,
    annotations: &BTreeMap<String, String>,
) -> Result<Vec<String>, Error> {
    match parse_destinations(annotations.get(NAMESPACE_ANNOTATION).map(String::as_str)) {
        Destinations::Explicit(namespaces) => Ok(namespaces),
        Destinations::All => client.list_namespaces().await,
    }
}
