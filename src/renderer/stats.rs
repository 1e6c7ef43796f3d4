// renderer/stats.rs

use serde::{Deserialize, Serialize};

use crate::renderer::render_op::RenderOp;

/// Counters describing what a draw context collected and submitted.
///
/// Collection counters (`collected_*`, `opaque_*_switches`) are only updated
/// when statistics collection is enabled. Submission counters are always on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawStatistics {
    pub collected_opaque_ops: u32,
    pub collected_transparent_ops: u32,
    pub collected_shimmer_ops: u32,
    pub opaque_shader_switches: u32,
    pub opaque_material_switches: u32,
    pub draw_calls: u32,
    pub instanced_draw_calls: u32,
    pub instances_drawn: u32,
    pub effect_switches: u32,
    pub skipped_ops: u32,
}

impl DrawStatistics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Counts shader and material boundaries in a submitted opaque channel.
    pub(crate) fn record_opaque(&mut self, ops: &[RenderOp]) {
        let mut effect = None;
        let mut properties = None;
        for op in ops {
            if effect != Some(op.effect) {
                effect = Some(op.effect);
                self.opaque_shader_switches += 1;
            }
            if properties != Some(op.properties_id()) {
                properties = Some(op.properties_id());
                self.opaque_material_switches += 1;
            }
        }
        self.collected_opaque_ops += ops.len() as u32;
    }
}
