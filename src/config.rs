use crate::cluster::ClusterParams;
use crate::error::{PartitionError, Result};

/// Sub-regions requested per region when nothing else is configured.
pub const DEFAULT_PARTS: usize = 6;

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Target number of sub-regions per region. Fewer come out when a region
    /// has fewer blocks than this.
    pub n_parts: usize,
    pub cluster: ClusterParams,
    /// Build uncached instead of failing when the store cannot be used.
    pub fallback_on_cache_error: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            n_parts: DEFAULT_PARTS,
            cluster: ClusterParams::default(),
            fallback_on_cache_error: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_parts == 0 {
            return Err(PartitionError::InvalidParameter("n_parts must be at least 1".into()));
        }
        if self.cluster.max_iterations == 0 {
            return Err(PartitionError::InvalidParameter("max_iterations must be at least 1".into()));
        }
        if self.cluster.tolerance.is_nan() || self.cluster.tolerance < 0.0 {
            return Err(PartitionError::InvalidParameter("tolerance must be a non-negative number".into()));
        }
        Ok(())
    }
}
