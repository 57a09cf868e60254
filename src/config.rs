/// Default minimum spatial dimension a generated level must still meet; see `spec.md` §4.2.
pub const DEFAULT_MIN_DIM: u32 = 512;

/// Default upper bound on worker pool size; see `spec.md` §5.
pub const MAX_WORKERS: usize = 8;

/// Default resident-memory budget used to cap worker concurrency (§5).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 1 << 30;

/// Level `L > 1` failure tolerance before the coordinator escalates to `BuildFailed`.
pub const LEVEL_FAILURE_TOLERANCE: f64 = 0.10;

/// Thumbnail output format. Only `Tif` is implemented (`spec.md` non-goals).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ThumbnailFormat {
    #[default]
    Tif,
}

/// Configuration accepted by [`crate::build`].
///
/// Mirrors the "Configuration options the core recognizes" table in `spec.md` §6.
#[derive(Clone, Debug)]
pub struct PyramidConfig {
    /// Bound on parallel workers. `None` selects the formula in `spec.md` §5.
    pub worker_count: Option<usize>,
    /// Smallest spatial dimension allowed in a generated level.
    pub min_dim: u32,
    /// Thumbnail output format. Currently always `Tif`.
    pub thumbnail_format: ThumbnailFormat,
    /// Overrides the auto-computed sampling window size for ETA smoothing.
    pub sample_size_override: Option<usize>,
    /// Resident-memory budget used by the worker-pool sizing formula (§5).
    pub memory_budget_bytes: u64,
    /// Whether to write/consult the `.thumbnail/<L>/manifest.json` cache-validity record.
    pub cache_manifest: bool,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            min_dim: DEFAULT_MIN_DIM,
            thumbnail_format: ThumbnailFormat::default(),
            sample_size_override: None,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            cache_manifest: true,
        }
    }
}

impl PyramidConfig {
    /// Resolve the effective worker-pool size per `spec.md` §5:
    /// `min(logical_cpu_count, memory_budget / per_slice_memory_estimate, MAX_WORKERS)`,
    /// with a floor of 1.
    pub fn resolve_worker_count(&self, width: u32, height: u32, bit_depth: u8) -> usize {
        if let Some(n) = self.worker_count {
            return n.clamp(1, MAX_WORKERS);
        }
        let logical_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let bytes_per_sample = if bit_depth > 8 { 2 } else { 1 };
        let per_slice_estimate =
            (width as u64) * (height as u64) * bytes_per_sample * 4;
        let memory_bound = if per_slice_estimate == 0 {
            MAX_WORKERS as u64
        } else {
            (self.memory_budget_bytes / per_slice_estimate).max(1)
        };
        [logical_cpus as u64, memory_bound, MAX_WORKERS as u64]
            .into_iter()
            .min()
            .unwrap_or(1)
            .max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = PyramidConfig::default();
        assert_eq!(cfg.min_dim, 512);
        assert!(cfg.cache_manifest);
    }

    #[test]
    fn worker_count_respects_explicit_override() {
        let cfg = PyramidConfig {
            worker_count: Some(100),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_worker_count(512, 512, 8), MAX_WORKERS);
    }

    #[test]
    fn worker_count_has_floor_of_one() {
        let cfg = PyramidConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_worker_count(512, 512, 8), 1);
    }

    #[test]
    fn worker_count_bounded_by_memory_budget() {
        let cfg = PyramidConfig {
            worker_count: None,
            memory_budget_bytes: 4096,
            ..Default::default()
        };
        // huge slices, tiny budget -> memory bound dominates
        assert_eq!(cfg.resolve_worker_count(4096, 4096, 16), 1);
    }
}
