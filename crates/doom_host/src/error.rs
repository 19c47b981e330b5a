//! Host-layer error types.

use doom_core::CodecError;

/// Errors raised by the simulation host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The module could not be compiled, linked or initialised. Not
    /// recoverable.
    #[error("failed to instantiate simulation module: {0:#}")]
    Instantiate(#[source] anyhow::Error),

    /// An exported entry point trapped.
    #[error("simulation module trapped in `{entry}`: {source:#}")]
    Trap {
        entry: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Linear memory could not be grown.
    #[error("failed to grow simulation memory by {pages} pages: {source:#}")]
    Grow {
        pages: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A checkpoint could not be encoded or decoded.
    #[error("checkpoint codec error: {0}")]
    Checkpoint(#[from] CodecError),
}
