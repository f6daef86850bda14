//! Room and tick configuration.
//!
//! [`RoomConfig`] is deserialized from the creation options the hosting layer
//! passes in. Every key is optional and unknown keys are rejected.

use std::time::Duration;

use ripple_ecs::world::WorldConfig;
use serde::{Deserialize, Serialize};

use crate::error::RoomError;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Per-room simulation settings.
///
/// ```
/// use ripple_room::config::RoomConfig;
///
/// let config = RoomConfig::from_options(&serde_json::json!({
///     "tickRateHz": 30,
///     "seed": 7,
/// }))
/// .unwrap();
/// assert_eq!(config.tick_rate_hz, 30);
/// assert_eq!(config.bound_width, 800.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RoomConfig {
    /// Ticks per second of the driver's timer.
    pub tick_rate_hz: u32,
    pub bound_width: f64,
    pub bound_height: f64,
    /// Edge length of a shape. Wrap-around uses half of it.
    pub shape_size: f64,
    /// Maximum speed per axis, in units per second.
    pub speed: f64,
    /// Radius given to freshly spawned shapes.
    pub default_radius: f64,
    /// Seed for the spawn generator. Random when absent.
    pub seed: Option<u64>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            bound_width: 800.0,
            bound_height: 600.0,
            shape_size: 50.0,
            speed: 300.0,
            default_radius: 20.0,
            seed: None,
        }
    }
}

impl RoomConfig {
    /// Parse and validate creation options. `null` yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidOptions`] on unknown keys, wrong value
    /// types, or out-of-range values.
    pub fn from_options(options: &serde_json::Value) -> Result<Self, RoomError> {
        let config = if options.is_null() {
            Self::default()
        } else {
            Self::deserialize(options).map_err(|e| RoomError::InvalidOptions {
                reason: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), RoomError> {
        let invalid = |reason: String| Err(RoomError::InvalidOptions { reason });
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1000 {
            return invalid(format!("tickRateHz must be in 1..=1000, got {}", self.tick_rate_hz));
        }
        for (name, value) in [
            ("boundWidth", self.bound_width),
            ("boundHeight", self.bound_height),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return invalid(format!("{name} must be positive and finite, got {value}"));
            }
        }
        for (name, value) in [
            ("shapeSize", self.shape_size),
            ("speed", self.speed),
            ("defaultRadius", self.default_radius),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return invalid(format!("{name} must be non-negative and finite, got {value}"));
            }
        }
        Ok(())
    }

    pub fn half_size(&self) -> f64 {
        self.shape_size / 2.0
    }

    /// Bounds for the room's world.
    pub fn world_config(&self) -> WorldConfig {
        WorldConfig {
            bound_width: self.bound_width,
            bound_height: self.bound_height,
            half_size: self.half_size(),
        }
    }

    /// Timer settings for the room driver.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig::from_hz(self.tick_rate_hz)
    }
}

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-rate room timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
    /// Time between ticks. Must be non-zero.
    pub interval: Duration,
}

impl TickConfig {
    /// # Panics
    ///
    /// Panics if `hz` is zero.
    pub fn from_hz(hz: u32) -> Self {
        assert!(hz > 0, "tick rate must be positive, got {hz}");
        Self {
            interval: Duration::from_secs(1) / hz,
        }
    }
}

impl Default for TickConfig {
    /// Defaults to 60 Hz.
    fn default() -> Self {
        Self::from_hz(60)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
