//! Optional ray-cast instrumentation
//!
//! Records the segments cast during the last tick and a rolling window of
//! per-tick ray counts. It only observes the scheduler's results and is
//! skipped entirely when disabled.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::info;

use crate::config::DebugConfig;
use crate::util::vec3::Vec3;
use crate::visibility::constants::debug::{MAX_SEGMENTS_PER_TICK, STATS_WINDOW};
use crate::visibility::types::EntityId;

/// One occlusion ray cast during a tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RaySegment {
    pub observer: EntityId,
    pub observable: EntityId,
    pub origin: Vec3,
    pub target: Vec3,
    pub blocked: bool,
}

/// Aggregate ray-cast counters over the rolling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RayStats {
    pub average_per_tick: f64,
    pub peak_per_tick: u64,
    pub total: u64,
    pub window_ticks: usize,
}

#[derive(Serialize)]
struct SegmentDump<'a> {
    frame: u64,
    dropped: u64,
    segments: &'a [RaySegment],
}

pub struct DebugInstrumentation {
    config: DebugConfig,
    segments: Vec<RaySegment>,
    /// Segments beyond the per-tick cap
    dropped: u64,
    /// Frame the current segments belong to
    frame: u64,
    history: VecDeque<u64>,
    total: u64,
    ticks_since_report: u64,
}

impl DebugInstrumentation {
    pub fn new(config: DebugConfig) -> Self {
        Self {
            config,
            segments: Vec::new(),
            dropped: 0,
            frame: 0,
            history: VecDeque::with_capacity(STATS_WINDOW),
            total: 0,
            ticks_since_report: 0,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Should evaluation collect ray segments this tick?
    #[inline]
    pub fn wants_segments(&self) -> bool {
        self.config.enabled && self.config.record_segments
    }

    /// Start a new tick, discarding the previous tick's segments
    pub fn begin_tick(&mut self, frame: u64) {
        self.segments.clear();
        self.dropped = 0;
        self.frame = frame;
    }

    /// Append segments from one observer's pass
    pub fn record_segments(&mut self, segments: impl IntoIterator<Item = RaySegment>) {
        for segment in segments {
            if self.segments.len() < MAX_SEGMENTS_PER_TICK {
                self.segments.push(segment);
            } else {
                self.dropped += 1;
            }
        }
    }

    /// Close the tick with its ray-cast count; logs the aggregate every
    /// `report_interval_ticks`.
    pub fn end_tick(&mut self, ray_casts: u64) {
        if !self.config.enabled {
            return;
        }

        if self.history.len() >= STATS_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(ray_casts);
        self.total += ray_casts;

        self.ticks_since_report += 1;
        if self.ticks_since_report >= self.config.report_interval_ticks.max(1) {
            self.ticks_since_report = 0;
            let stats = self.stats();
            info!(
                "Ray casts: avg={:.1}/tick, peak={}/tick over {} ticks (total={}, segments={}, dropped={})",
                stats.average_per_tick,
                stats.peak_per_tick,
                stats.window_ticks,
                stats.total,
                self.segments.len(),
                self.dropped
            );
        }
    }

    pub fn stats(&self) -> RayStats {
        if self.history.is_empty() {
            return RayStats::default();
        }
        let sum: u64 = self.history.iter().sum();
        RayStats {
            average_per_tick: sum as f64 / self.history.len() as f64,
            peak_per_tick: self.history.iter().copied().max().unwrap_or(0),
            total: self.total,
            window_ticks: self.history.len(),
        }
    }

    /// Segments cast during the last tick
    pub fn segments(&self) -> &[RaySegment] {
        &self.segments
    }

    /// Last tick's segments as JSON, for external debug viewers
    pub fn segments_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SegmentDump {
            frame: self.frame,
            dropped: self.dropped,
            segments: &self.segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> DebugConfig {
        DebugConfig {
            enabled: true,
            record_segments: true,
            report_interval_ticks: 2,
        }
    }

    fn segment(blocked: bool) -> RaySegment {
        RaySegment {
            observer: 1,
            observable: 2,
            origin: Vec3::ZERO,
            target: Vec3::new(10.0, 0.0, 0.0),
            blocked,
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let mut instrumentation = DebugInstrumentation::new(DebugConfig::default());
        assert!(!instrumentation.is_enabled());
        assert!(!instrumentation.wants_segments());
        instrumentation.end_tick(50);
        assert_eq!(instrumentation.stats(), RayStats::default());
    }

    #[test]
    fn test_average_and_peak() {
        let mut instrumentation = DebugInstrumentation::new(enabled());
        for rays in [4, 10, 1] {
            instrumentation.begin_tick(0);
            instrumentation.end_tick(rays);
        }
        let stats = instrumentation.stats();
        assert_eq!(stats.peak_per_tick, 10);
        assert_eq!(stats.total, 15);
        assert_eq!(stats.window_ticks, 3);
        assert!((stats.average_per_tick - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut instrumentation = DebugInstrumentation::new(enabled());
        instrumentation.end_tick(1000);
        for _ in 0..STATS_WINDOW {
            instrumentation.end_tick(1);
        }
        let stats = instrumentation.stats();
        // The 1000-ray tick fell out of the window but still counts in the total
        assert_eq!(stats.peak_per_tick, 1);
        assert_eq!(stats.window_ticks, STATS_WINDOW);
        assert_eq!(stats.total, 1000 + STATS_WINDOW as u64);
    }

    #[test]
    fn test_segments_reset_each_tick() {
        let mut instrumentation = DebugInstrumentation::new(enabled());
        instrumentation.begin_tick(1);
        instrumentation.record_segments([segment(true), segment(false)]);
        assert_eq!(instrumentation.segments().len(), 2);

        instrumentation.begin_tick(2);
        assert!(instrumentation.segments().is_empty());
    }

    #[test]
    fn test_segment_cap() {
        let mut instrumentation = DebugInstrumentation::new(enabled());
        instrumentation.begin_tick(0);
        instrumentation.record_segments(std::iter::repeat(segment(false)).take(MAX_SEGMENTS_PER_TICK + 5));
        assert_eq!(instrumentation.segments().len(), MAX_SEGMENTS_PER_TICK);

        let json: serde_json::Value =
            serde_json::from_str(&instrumentation.segments_json().unwrap()).unwrap();
        assert_eq!(json["dropped"], 5);
    }

    #[test]
    fn test_segments_json() {
        let mut instrumentation = DebugInstrumentation::new(enabled());
        instrumentation.begin_tick(7);
        instrumentation.record_segments([segment(true)]);

        let json: serde_json::Value =
            serde_json::from_str(&instrumentation.segments_json().unwrap()).unwrap();
        assert_eq!(json["frame"], 7);
        assert_eq!(json["segments"][0]["blocked"], true);
        assert_eq!(json["segments"][0]["target"]["x"], 10.0);
    }
}
