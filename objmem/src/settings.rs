// ── Memory settings ───────────────────────────────────────────────────

/// Configuration for an [`crate::ObjectMemory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySettings {
    /// Number of object slots reserved up front.
    pub initial_capacity: usize,
    /// When false, every indexable container starts in object storage.
    pub storage_strategies: bool,
    /// Maximum number of frames on one process stack.
    pub max_frame_depth: usize,
    /// Seed of the identity hash generator. Must be non-zero.
    pub hash_seed: u32,
    /// Stack slots of code declaring a small frame.
    pub small_frame_size: usize,
    /// Stack slots of code declaring a large frame.
    pub large_frame_size: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            initial_capacity: 4096,
            storage_strategies: true,
            max_frame_depth: 65_536,
            hash_seed: 0x2545_F491,
            small_frame_size: 16,
            large_frame_size: 56,
        }
    }
}

impl MemorySettings {
    #[inline]
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_frame_depth == 0 {
            return Err("max_frame_depth must be > 0");
        }
        if self.hash_seed == 0 {
            return Err("hash_seed must be non-zero");
        }
        if self.small_frame_size == 0 || self.large_frame_size == 0 {
            return Err("frame sizes must be > 0");
        }
        if self.small_frame_size > self.large_frame_size {
            return Err("small_frame_size must not exceed large_frame_size");
        }
        if self.initial_capacity > u32::MAX as usize >> 2 {
            return Err("initial_capacity exceeds the addressable arena");
        }
        Ok(())
    }
}

/// Optional overrides merged over [`MemorySettings::default`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCreateInfo {
    pub initial_capacity: Option<usize>,
    pub storage_strategies: Option<bool>,
    pub max_frame_depth: Option<usize>,
    pub hash_seed: Option<u32>,
}

impl MemoryCreateInfo {
    pub fn settings(&self) -> Result<MemorySettings, &'static str> {
        let defaults = MemorySettings::default();
        let settings = MemorySettings {
            initial_capacity: self
                .initial_capacity
                .unwrap_or(defaults.initial_capacity),
            storage_strategies: self
                .storage_strategies
                .unwrap_or(defaults.storage_strategies),
            max_frame_depth: self
                .max_frame_depth
                .unwrap_or(defaults.max_frame_depth),
            hash_seed: self.hash_seed.unwrap_or(defaults.hash_seed),
            ..defaults
        };
        settings.validate()?;
        Ok(settings)
    }
}
