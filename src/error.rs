use thiserror::Error;

/// Errors surfaced by the partitioning engine.
///
/// Empty regions, fewer blocks than requested parts and clustering that hits
/// its iteration bound are valid outcomes and never produce one of these.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Source geometry is missing, malformed or refers to an unknown region.
    #[error("source data unavailable: {0}")]
    DataUnavailable(String),

    /// The persisted store could not be read or written, or held a corrupt entry.
    #[error("partition cache unavailable for region {region}: {reason}")]
    CacheUnavailable { region: String, reason: String },

    #[error("projection failed: {0}")]
    Projection(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl PartitionError {
    pub(crate) fn data(msg: impl Into<String>) -> Self {
        PartitionError::DataUnavailable(msg.into())
    }

    pub(crate) fn cache(region: impl ToString, reason: impl ToString) -> Self {
        PartitionError::CacheUnavailable {
            region: region.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_cache_error(&self) -> bool {
        matches!(self, PartitionError::CacheUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, PartitionError>;
