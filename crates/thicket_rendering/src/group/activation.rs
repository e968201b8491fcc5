//! Automatic group activation.
//!
//! A group with too few instances to be worth its draw calls is switched
//! off, and back on once it grows again. Two thresholds form a hysteresis
//! band and a frame cooldown stops the group from flapping:
//!
//! ```text
//! count:  ... 20  12   3   2   5   9  17 ...
//!                      ^ below disable (4): off
//!                                      ^ at/above enable (16): on, if cooldown elapsed
//! ```

use crate::config::ActivationConfig;

/// Hysteresis + cooldown state machine of one group.
#[derive(Debug, Clone, Copy)]
pub struct ActivationController {
    config: ActivationConfig,
    active: bool,
    last_toggle: Option<u64>,
}

impl ActivationController {
    /// Creates an active controller.
    #[must_use]
    pub const fn new(config: ActivationConfig) -> Self {
        Self {
            config,
            active: true,
            last_toggle: None,
        }
    }

    /// Returns true if the group syncs and draws.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds this frame's instance count. Returns the new state if it flipped.
    pub fn update(&mut self, instance_count: usize, frame: u64) -> Option<bool> {
        if !self.config.enabled {
            if self.active {
                return None;
            }
            self.active = true;
            return Some(true);
        }

        let cooled_down = self
            .last_toggle
            .map_or(true, |at| frame.saturating_sub(at) >= u64::from(self.config.cooldown_frames));
        if !cooled_down {
            return None;
        }

        let next = if self.active {
            instance_count >= self.config.disable_threshold
        } else {
            instance_count >= self.config.enable_threshold
        };
        if next == self.active {
            return None;
        }
        self.active = next;
        self.last_toggle = Some(frame);
        Some(next)
    }
}
