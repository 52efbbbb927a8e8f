use std::str::FromStr;

use crate::visibility::constants::{capacity, debug, lod, period, pov, radius};
use crate::visibility::types::VisibilityRadii;

/// Configuration validation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} period must be at least 1")]
    ZeroPeriod(&'static str),
    #[error("max_observables must be 1-{max}, got {got}")]
    InvalidCapacity { got: usize, max: usize },
    #[error("default radii invalid: unconditional {unconditional} > max {max}")]
    InvalidRadii { unconditional: f32, max: f32 },
    #[error("min_eye_height_fraction must be within 0..=1, got {0}")]
    InvalidEyeFraction(f32),
    #[error("tick_rate must be 1-1000, got {0}")]
    InvalidTickRate(u32),
    #[error("lod period_increase_distance must be > 0, got {0}")]
    InvalidLodDistance(f32),
}

/// Re-evaluation period per classification tier (ticks)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPeriods {
    pub self_period: u8,
    pub near: u8,
    pub far: u8,
    pub raycast_visible: u8,
    pub raycast_invisible: u8,
    pub simple: u8,
}

impl Default for TierPeriods {
    fn default() -> Self {
        Self {
            self_period: period::SELF,
            near: period::NEAR,
            far: period::FAR,
            raycast_visible: period::RAYCAST_VISIBLE,
            raycast_invisible: period::RAYCAST_INVISIBLE,
            simple: period::SIMPLE,
        }
    }
}

impl TierPeriods {
    /// The same period for every tier; handy for tests and worst-case benches
    pub fn uniform(value: u8) -> Self {
        Self {
            self_period: value,
            near: value,
            far: value,
            raycast_visible: value,
            raycast_invisible: value,
            simple: value,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("self", self.self_period),
            ("near", self.near),
            ("far", self.far),
            ("raycast_visible", self.raycast_visible),
            ("raycast_invisible", self.raycast_invisible),
            ("simple", self.simple),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroPeriod(name));
            }
        }
        Ok(())
    }

    /// Longest period, i.e. the worst-case staleness of any pair
    pub fn max_staleness(&self) -> u8 {
        [
            self.self_period,
            self.near,
            self.far,
            self.raycast_visible,
            self.raycast_invisible,
            self.simple,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }
}

/// Extrapolated point-of-view settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PovConfig {
    /// Eye offset above the observer position
    pub eye_height: f32,
    /// Push along the aim direction
    pub aim_forward_bias: f32,
    /// Lower clamp on the vertical offset, as a fraction of `eye_height`
    pub min_eye_height_fraction: f32,
}

impl Default for PovConfig {
    fn default() -> Self {
        Self {
            eye_height: pov::EYE_HEIGHT,
            aim_forward_bias: pov::AIM_FORWARD_BIAS,
            min_eye_height_fraction: pov::MIN_EYE_HEIGHT_FRACTION,
        }
    }
}

/// Debug instrumentation (off by default, never changes outcomes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Keep the ray segments of the last tick for inspection
    pub record_segments: bool,
    /// Ticks between aggregate ray-cast log lines
    pub report_interval_ticks: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            record_segments: false,
            report_interval_ticks: debug::REPORT_INTERVAL_TICKS,
        }
    }
}

/// Distance-banded replication frequency (off by default).
///
/// A visible pair at distance `d` replicates every
/// `1 + floor(d / period_increase_distance)` ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodConfig {
    pub enabled: bool,
    pub period_increase_distance: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_increase_distance: lod::PERIOD_INCREASE_DISTANCE,
        }
    }
}

impl LodConfig {
    /// Replication frequency for a visible pair `distance` apart
    #[inline]
    pub fn frequency(&self, distance: f32) -> u8 {
        let bands = (distance / self.period_increase_distance).floor();
        if bands.is_nan() {
            return u8::MAX;
        }
        (1.0 + bands).clamp(1.0, u8::MAX as f32) as u8
    }
}

/// Visibility scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityConfig {
    pub periods: TierPeriods,
    /// Maximum concurrently registered observables
    pub max_observables: usize,
    pub pov: PovConfig,
    /// Radii used by hosts that do not configure observers individually
    pub default_radii: VisibilityRadii,
    pub debug: DebugConfig,
    pub lod: LodConfig,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            periods: TierPeriods::default(),
            max_observables: capacity::MAX_OBSERVABLES,
            pov: PovConfig::default(),
            default_radii: VisibilityRadii::new(radius::UNCONDITIONAL, radius::MAX),
            debug: DebugConfig::default(),
            lod: LodConfig::default(),
        }
    }
}

impl VisibilityConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        let periods = &mut config.periods;
        for (var, slot) in [
            ("VIS_NEAR_PERIOD", &mut periods.near),
            ("VIS_FAR_PERIOD", &mut periods.far),
            ("VIS_RAYCAST_VISIBLE_PERIOD", &mut periods.raycast_visible),
            ("VIS_RAYCAST_INVISIBLE_PERIOD", &mut periods.raycast_invisible),
            ("VIS_SIMPLE_PERIOD", &mut periods.simple),
        ] {
            if let Some(value) = env_parse::<u8>(var, |v| *v >= 1, "1-255") {
                *slot = value;
            }
        }

        if let Some(value) = env_parse::<usize>(
            "VIS_MAX_OBSERVABLES",
            |v| (1..=capacity::ID_SPACE).contains(v),
            "1-65536",
        ) {
            config.max_observables = value;
        }

        if let Some(value) = env_parse::<f32>("VIS_UNCONDITIONAL_RADIUS", |v| *v >= 0.0, ">= 0") {
            config.default_radii.unconditional = value;
        }
        if let Some(value) = env_parse::<f32>("VIS_MAX_RADIUS", |v| *v > 0.0, "> 0") {
            config.default_radii.max = value;
        }
        if let Some(value) = env_parse::<f32>("VIS_EYE_HEIGHT", |v| *v >= 0.0, ">= 0") {
            config.pov.eye_height = value;
        }

        if let Ok(flag) = std::env::var("VIS_DEBUG") {
            let enabled = matches!(flag.as_str(), "1" | "true" | "yes");
            config.debug.enabled = enabled;
            config.debug.record_segments = enabled;
        }
        if let Some(value) = env_parse::<u64>("VIS_DEBUG_INTERVAL", |v| *v > 0, "> 0") {
            config.debug.report_interval_ticks = value;
        }

        if let Ok(flag) = std::env::var("VIS_LOD") {
            config.lod.enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = env_parse::<f32>("VIS_LOD_DISTANCE", |v| *v > 0.0, "> 0") {
            config.lod.period_increase_distance = value;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.periods.validate()?;
        if self.max_observables == 0 || self.max_observables > capacity::ID_SPACE {
            return Err(ConfigError::InvalidCapacity {
                got: self.max_observables,
                max: capacity::ID_SPACE,
            });
        }
        if !self.default_radii.is_valid() {
            return Err(ConfigError::InvalidRadii {
                unconditional: self.default_radii.unconditional,
                max: self.default_radii.max,
            });
        }
        if !(0.0..=1.0).contains(&self.pov.min_eye_height_fraction) {
            return Err(ConfigError::InvalidEyeFraction(self.pov.min_eye_height_fraction));
        }
        let step = self.lod.period_increase_distance;
        if self.lod.enabled && (step.is_nan() || step <= 0.0) {
            return Err(ConfigError::InvalidLodDistance(step));
        }
        Ok(())
    }
}

/// Population of the headless demo server
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoConfig {
    pub observers: usize,
    pub observables: usize,
    pub terrain_shapes: usize,
    /// Half-width of the square play area (world units)
    pub world_extent: f32,
    /// Max distance an entity wanders per tick
    pub step: f32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            observers: 32,
            observables: 400,
            terrain_shapes: 60,
            world_extent: 500.0,
            step: 0.5,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Fixed simulation tick rate in Hz
    pub tick_rate: u32,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
    pub demo: DemoConfig,
    pub visibility: VisibilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            metrics_port: 9090,
            demo: DemoConfig::default(),
            visibility: VisibilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self {
            visibility: VisibilityConfig::load_or_default(),
            ..Self::default()
        };

        if let Some(value) = env_parse::<u32>("TICK_RATE", |v| (1..=1000).contains(v), "1-1000") {
            config.tick_rate = value;
        }
        if let Some(value) = env_parse::<u16>("METRICS_PORT", |v| *v > 0, "> 0") {
            config.metrics_port = value;
        }
        if let Some(value) = env_parse::<usize>("DEMO_OBSERVERS", |v| *v <= 10_000, "0-10000") {
            config.demo.observers = value;
        }
        if let Some(value) = env_parse::<usize>("DEMO_OBSERVABLES", |v| *v <= capacity::ID_SPACE, "0-65536") {
            config.demo.observables = value;
        }
        if let Some(value) = env_parse::<usize>("DEMO_TERRAIN", |v| *v <= 100_000, "0-100000") {
            config.demo.terrain_shapes = value;
        }
        if let Some(value) = env_parse::<f32>("DEMO_EXTENT", |v| *v > 0.0, "> 0") {
            config.demo.world_extent = value;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 1000 {
            return Err(ConfigError::InvalidTickRate(self.tick_rate));
        }
        if self.demo.observables > self.visibility.max_observables {
            return Err(ConfigError::InvalidCapacity {
                got: self.demo.observables,
                max: self.visibility.max_observables,
            });
        }
        self.visibility.validate()
    }
}

/// Read and parse an env var, warning and returning None when it is invalid
fn env_parse<T: FromStr>(name: &str, accept: impl Fn(&T) -> bool, expected: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) if accept(&value) => Some(value),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", name, expected);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}
