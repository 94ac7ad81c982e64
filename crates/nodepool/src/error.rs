//! Pool error types.

use thiserror::Error;

use crate::context::ContextError;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Establishing a new transport to the address failed.
    #[error("failed to dial {addr}: {source}")]
    Dial {
        /// Address that was being dialed.
        addr: String,
        /// Underlying transport error.
        #[source]
        source: std::io::Error,
    },

    /// The caller's context ended before a connection became available.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The address is not one the pool was built with.
    #[error("unknown address: {0}")]
    UnknownAddress(String),

    /// The connection is not checked out from this pool.
    #[error("connection {id} to {addr} is not in use")]
    NotInUse {
        /// Address of the connection.
        addr: String,
        /// Pool-assigned connection id.
        id: u64,
    },

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// Dial failures and context expiry depend on conditions outside the
    /// pool; everything else is caused by how the pool is used.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Dial { .. } | Self::Context(_))
    }

    /// Check if this error was caused by calling the pool incorrectly.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::UnknownAddress(_) | Self::NotInUse { .. } | Self::PoolClosed
        )
    }

    /// Get the context error if the caller's wait was interrupted.
    #[must_use]
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Context(e) => Some(*e),
            _ => None,
        }
    }
}
