use std::io;

use sr_core::CapacityError;

/// Failures that escape a relay tick.
///
/// Per-client trouble never shows up here: a misbehaving client is only
/// marked disconnected and reaped.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid ring capacity: {0}")]
    Capacity(#[from] CapacityError),

    #[error("upstream closed the stream")]
    UpstreamClosed,

    #[error("upstream I/O failed: {0}")]
    Upstream(#[source] io::Error),

    #[error("listening socket failed: {0}")]
    Listener(#[source] io::Error),
}

impl RelayError {
    /// True when the upstream side is gone and the host should reopen it.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamClosed | Self::Upstream(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
