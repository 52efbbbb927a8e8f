//! AoI Visibility Server Library
//!
//! Server-authoritative area-of-interest visibility: decides which entities
//! each observer may see and schedules when every pair is re-checked.
//!
//! # Features
//!
//! - `parallel` - Evaluate observers on the rayon thread pool (enabled by default)

pub mod collision;
pub mod config;
pub mod demo;
pub mod metrics;
pub mod util;
pub mod visibility;
