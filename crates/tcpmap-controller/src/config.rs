//! Operator-wide settings handed to the engine at construction

use tcpmap_common::Error;

use crate::allocator;
use crate::reference::ResourceRef;

/// Lowest port elected when no range is configured
pub const DEFAULT_MIN_PORT: i32 = 1025;
/// Highest port elected when no range is configured
pub const DEFAULT_MAX_PORT: i32 = 65535;

/// Inclusive range of electable ports.
///
/// Always satisfies `1 <= min <= max <= 65535`; 0 is reserved for "unelected".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    min: i32,
    max: i32,
}

impl PortRange {
    /// Validate and build a range
    pub fn new(min: i32, max: i32) -> Result<Self, Error> {
        if min < 1 || max > 65535 {
            return Err(Error::config(format!(
                "port range {min}-{max} must lie within 1-65535"
            )));
        }
        if min > max {
            return Err(Error::config(format!(
                "min port {min} is above max port {max}"
            )));
        }
        Ok(Self { min, max })
    }

    /// Lowest electable port
    pub fn min(&self) -> i32 {
        self.min
    }

    /// Highest electable port
    pub fn max(&self) -> i32 {
        self.max
    }

    /// Smallest free port in the range, or 0 if every port is used
    pub fn allocate<'a>(&self, used: impl IntoIterator<Item = &'a i32>) -> i32 {
        allocator::allocate(self.min, self.max, used)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_PORT,
            max: DEFAULT_MAX_PORT,
        }
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Immutable configuration shared by every reconcile
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MappingConfig {
    /// Ports available for election
    pub ports: PortRange,
    /// Frontend Service used when a mapping has no `frontendRef`
    pub default_frontend: Option<ResourceRef>,
    /// Proxy ConfigMap used when a mapping has no `configStoreRef`
    pub default_config_store: Option<ResourceRef>,
}

impl MappingConfig {
    /// Configuration with the given range and no default references
    pub fn with_ports(ports: PortRange) -> Self {
        Self {
            ports,
            ..Default::default()
        }
    }

    /// Set the default frontend Service reference
    pub fn default_frontend(mut self, reference: ResourceRef) -> Self {
        self.default_frontend = Some(reference);
        self
    }

    /// Set the default proxy ConfigMap reference
    pub fn default_config_store(mut self, reference: ResourceRef) -> Self {
        self.default_config_store = Some(reference);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_range_is_unprivileged_ports() {
        let range = PortRange::default();
        assert_eq!((range.min(), range.max()), (1025, 65535));
        assert_eq!(range.to_string(), "1025-65535");
    }

    #[test]
    fn rejects_inverted_range() {
        let err = PortRange::new(2000, 1000).unwrap_err();
        assert!(err.to_string().contains("above max port"));
    }

    #[test]
    fn rejects_zero_and_out_of_bounds() {
        assert!(PortRange::new(0, 10).is_err());
        assert!(PortRange::new(1025, 70000).is_err());
        assert!(PortRange::new(1, 1).is_ok());
    }
}
