//! Pool configuration.

/// Default cap on live connections per address.
pub const DEFAULT_MAX_CONNECTIONS_PER_NODE: u32 = 10;

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of live connections (idle plus in use) per address.
    pub max_connections_per_node: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_node: DEFAULT_MAX_CONNECTIONS_PER_NODE,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections per address.
    ///
    /// A value of zero is not applied and the current value is kept.
    /// [`PoolBuilder::max_connections_per_node`](crate::PoolBuilder::max_connections_per_node)
    /// also reports the rejection to the pool's
    /// [`PoolObserver`](crate::PoolObserver).
    #[must_use]
    pub fn max_connections_per_node(mut self, count: u32) -> Self {
        if count != 0 {
            self.max_connections_per_node = count;
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), crate::error::PoolError> {
        if self.max_connections_per_node == 0 {
            return Err(crate::error::PoolError::Configuration(
                "max_connections_per_node must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
