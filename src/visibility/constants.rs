/// Re-evaluation periods in ticks, one per classification tier.
///
/// A pair is due when `(observable_id + frame_counter) % period == 0`, so
/// every value here must be at least 1.
pub mod period {
    /// Observer looking at itself: never changes, recheck as rarely as possible
    pub const SELF: u8 = u8::MAX;
    /// Inside the unconditional radius
    pub const NEAR: u8 = 16;
    /// Beyond the max radius; short so re-entry is picked up quickly
    pub const FAR: u8 = 4;
    /// Middle band, ray reached the trace point
    pub const RAYCAST_VISIBLE: u8 = 8;
    /// Middle band, ray blocked by terrain; approaching pairs need fast re-acquisition
    pub const RAYCAST_INVISIBLE: u8 = 3;
    /// Distance-only observables (cheap check)
    pub const SIMPLE: u8 = 2;
    /// Collision world failed for this pair; retry on the next tick
    pub const OCCLUSION_RETRY: u8 = 1;
    /// Fresh slots are due immediately
    pub const INITIAL: u8 = 1;
}

/// Extrapolated point-of-view tuning
pub mod pov {
    /// Eye offset above the observer's position (world units)
    pub const EYE_HEIGHT: f32 = 1.7;
    /// Distance the eye point is pushed along the aim direction
    pub const AIM_FORWARD_BIAS: f32 = 0.5;
    /// Looking down never drops the eye below this fraction of EYE_HEIGHT
    pub const MIN_EYE_HEIGHT_FRACTION: f32 = 0.5;
}

/// Default observer radii (world units)
pub mod radius {
    pub const UNCONDITIONAL: f32 = 30.0;
    pub const MAX: f32 = 300.0;
}

/// Replication level of detail
pub mod lod {
    /// Distance band width; each full band adds one tick to the replication frequency
    pub const PERIOD_INCREASE_DISTANCE: f32 = 63.0;
}

/// Registry sizing
pub mod capacity {
    /// Default maximum of simultaneously registered observables
    pub const MAX_OBSERVABLES: usize = 4096;
    /// Hard ceiling imposed by the u16 id space
    pub const ID_SPACE: usize = u16::MAX as usize + 1;
}

/// Debug instrumentation defaults
pub mod debug {
    /// Ticks between aggregate ray-cast log lines (10s at 30 Hz)
    pub const REPORT_INTERVAL_TICKS: u64 = 300;
    /// Rolling window of per-tick ray counts used for the average
    pub const STATS_WINDOW: usize = 300;
    /// Upper bound on recorded ray segments per tick
    pub const MAX_SEGMENTS_PER_TICK: usize = 4096;
}
