//! Dispatch statistics.

use std::ops::AddAssign;

/// Counters from one camera's dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Number of draw calls submitted (color + shadow).
    pub draw_calls: u32,
    /// Color-pass draw calls.
    pub color_draws: u32,
    /// Shadow-pass draw calls.
    pub shadow_draws: u32,
    /// Instances drawn in the color pass, summed over calls.
    pub instances: u32,
    /// Instances drawn in the shadow pass, summed over calls.
    pub shadow_instances: u32,
    /// Groups that issued commands this frame.
    pub groups_drawn: u32,
    /// Groups skipped because visibility was not ready.
    pub skipped_groups: u32,
    /// Groups switched off by activation or disabled after a failure.
    pub inactive_groups: u32,
    /// Groups whose buffers could not be written this frame.
    pub failed_groups: u32,
    /// Visibility results dropped because the layout changed under them.
    pub stale_results: u32,
    /// Renderers skipped for a missing mesh or a culled layer.
    pub culled_renderers: u32,
    /// LOD levels skipped by the profile/quality floor.
    pub skipped_lods: u32,
}

impl RenderStats {
    /// Returns true if nothing was submitted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.draw_calls == 0
    }

    /// Average instances per color draw call.
    #[must_use]
    pub fn instances_per_draw(&self) -> f32 {
        if self.color_draws > 0 {
            self.instances as f32 / self.color_draws as f32
        } else {
            0.0
        }
    }
}

impl AddAssign for RenderStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draw_calls += rhs.draw_calls;
        self.color_draws += rhs.color_draws;
        self.shadow_draws += rhs.shadow_draws;
        self.instances += rhs.instances;
        self.shadow_instances += rhs.shadow_instances;
        self.groups_drawn += rhs.groups_drawn;
        self.skipped_groups += rhs.skipped_groups;
        self.inactive_groups += rhs.inactive_groups;
        self.failed_groups += rhs.failed_groups;
        self.stale_results += rhs.stale_results;
        self.culled_renderers += rhs.culled_renderers;
        self.skipped_lods += rhs.skipped_lods;
    }
}
