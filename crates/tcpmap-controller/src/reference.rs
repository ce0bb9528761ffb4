//! Reference resolution for frontend Services and proxy ConfigMaps
//!
//! Both collaborators are located the same way:
//!
//! 1. the reference on the mapping itself, namespace defaulting to the
//!    mapping's namespace;
//! 2. otherwise the operator-wide default `[namespace/]name`, a bare name
//!    again defaulting to the mapping's namespace;
//! 3. otherwise the reference is unresolved.
//!
//! A reference's own namespace always wins over the fallback; the fallback is
//! only ever the namespace of the mapping being reconciled.

use std::fmt;
use std::str::FromStr;

use tcpmap_common::Error;

use crate::crd::ObjectRefSpec;

/// Fully resolved `namespace/name` of a Kubernetes object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Build a key from its parts
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A reference whose namespace may still be unset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    /// Namespace, if the reference names one
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceRef {
    /// Build a reference from its parts
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            name: name.into(),
        }
    }

    /// Resolve to a key, using `default_namespace` when none is set
    pub fn resolve(&self, default_namespace: &str) -> ObjectKey {
        ObjectKey::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            self.name.clone(),
        )
    }
}

impl From<&ObjectRefSpec> for ResourceRef {
    fn from(spec: &ObjectRefSpec) -> Self {
        Self::new(spec.namespace.clone(), spec.name.clone())
    }
}

impl FromStr for ResourceRef {
    type Err = Error;

    /// Parse `name` or `namespace/name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (Some(ns), name),
            None => (None, s),
        };

        let valid = |part: &str| !part.is_empty() && !part.contains('/');
        if !valid(name) || namespace.is_some_and(|ns| !valid(ns)) {
            return Err(Error::config(format!(
                "invalid reference '{s}', expected [namespace/]name"
            )));
        }

        Ok(Self::new(namespace.map(str::to_string), name))
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Resolve a collaborator reference with mapping-over-default precedence.
///
/// Returns `None` when neither the mapping nor the operator names one.
pub fn resolve_reference(
    explicit: Option<&ObjectRefSpec>,
    default: Option<&ResourceRef>,
    mapping_namespace: &str,
) -> Option<ObjectKey> {
    explicit
        .map(ResourceRef::from)
        .as_ref()
        .or(default)
        .map(|r| r.resolve(mapping_namespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_ref(name: &str, namespace: Option<&str>) -> ObjectRefSpec {
        ObjectRefSpec {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    #[test]
    fn parses_bare_name() {
        let r: ResourceRef = "nginx".parse().unwrap();
        assert_eq!(r, ResourceRef::new(None, "nginx"));
        assert_eq!(r.resolve("apps"), ObjectKey::new("apps", "nginx"));
    }

    #[test]
    fn parses_namespaced_name() {
        let r: ResourceRef = "ingress/nginx".parse().unwrap();
        assert_eq!(r.namespace.as_deref(), Some("ingress"));
        assert_eq!(r.resolve("apps"), ObjectKey::new("ingress", "nginx"));
        assert_eq!(r.to_string(), "ingress/nginx");
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "/", "ns/", "/name", "a/b/c"] {
            assert!(bad.parse::<ResourceRef>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn mapping_reference_wins_over_default() {
        let explicit = spec_ref("own-frontend", Some("edge"));
        let default: ResourceRef = "ingress/nginx".parse().unwrap();

        let key = resolve_reference(Some(&explicit), Some(&default), "apps");
        assert_eq!(key, Some(ObjectKey::new("edge", "own-frontend")));
    }

    #[test]
    fn mapping_reference_without_namespace_uses_mapping_namespace() {
        let explicit = spec_ref("own-frontend", None);
        let key = resolve_reference(Some(&explicit), None, "apps");
        assert_eq!(key, Some(ObjectKey::new("apps", "own-frontend")));
    }

    #[test]
    fn empty_namespace_counts_as_unset() {
        let explicit = spec_ref("own-frontend", Some(""));
        let key = resolve_reference(Some(&explicit), None, "apps");
        assert_eq!(key, Some(ObjectKey::new("apps", "own-frontend")));
    }

    #[test]
    fn default_is_used_when_mapping_has_none() {
        let default: ResourceRef = "tcp-services".parse().unwrap();
        let key = resolve_reference(None, Some(&default), "apps");
        assert_eq!(key, Some(ObjectKey::new("apps", "tcp-services")));
    }

    #[test]
    fn unresolved_without_any_reference() {
        assert_eq!(resolve_reference(None, None, "apps"), None);
    }
}
