use glam::{Mat4, Vec3};

use crate::error::{DrawError, DrawResult};
use crate::renderer::channel::{DistanceSortedOp, SortGeometry};
use crate::renderer::device::{IndexFormat, PrimitiveType, RenderDevice};
use crate::renderer::render_op::RenderOp;

/// Clusters opaque ops by state key. Stable, so equal keys keep push order.
pub(crate) fn sort_opaque(ops: &mut [RenderOp]) {
    ops.sort_by_key(RenderOp::state_key);
}

/// Orders distance-sorted ops farthest first. Stable for equal distances.
pub(crate) fn sort_back_to_front(ops: &mut [DistanceSortedOp]) {
    ops.sort_by(|a, b| b.distance.total_cmp(&a.distance));
}

/// Reusable buffers for per-triangle sorting.
#[derive(Debug, Default)]
pub(crate) struct TriangleSorter {
    vertex_depths: Vec<f32>,
    triangles: Vec<(f32, u32)>,
    sorted: Vec<u32>,
}

impl TriangleSorter {
    /// Rewrites the triangles of `op` back to front into the dynamic index
    /// buffer and points `op` at the sorted range.
    ///
    /// Depth is clip-space z (+z into the screen); a triangle's depth is the
    /// deepest of its three vertices.
    pub(crate) fn sort(
        &mut self,
        op: &mut RenderOp,
        geometry: &SortGeometry,
        world: &Mat4,
        view_projection: &Mat4,
        device: &mut dyn RenderDevice,
    ) -> DrawResult<()> {
        let group = op.group;
        let depth_row = (*view_projection * *world).row(2);
        let depth_axis = depth_row.truncate();

        let first_vertex = group.start_vertex as usize;
        let positions = geometry
            .positions
            .get(first_vertex..first_vertex + group.vertex_count as usize)
            .ok_or(DrawError::VertexOutOfRange {
                index: group.start_vertex + group.vertex_count,
            })?;

        self.vertex_depths.clear();
        self.vertex_depths.extend(
            positions
                .iter()
                .map(|p: &Vec3| depth_axis.dot(*p) + depth_row.w),
        );

        let first_index = group.start_index as usize;
        let indices = geometry
            .indices
            .get(first_index..first_index + group.primitive_count as usize * 3)
            .ok_or(DrawError::VertexOutOfRange {
                index: group.start_index + group.primitive_count * 3,
            })?;

        self.triangles.clear();
        for (triangle, corners) in indices.chunks_exact(3).enumerate() {
            let mut depth = f32::NEG_INFINITY;
            for &index in corners {
                let vertex_depth = index
                    .checked_sub(group.start_vertex)
                    .and_then(|local| self.vertex_depths.get(local as usize))
                    .ok_or(DrawError::VertexOutOfRange { index })?;
                depth = depth.max(*vertex_depth);
            }
            self.triangles.push((depth, triangle as u32));
        }

        if self.triangles.is_empty() {
            return Err(DrawError::EmptyTriangleSort);
        }

        self.triangles.sort_by(|a, b| b.0.total_cmp(&a.0));

        let max_index = group.start_vertex + group.vertex_count;
        let limit = device.max_vertex_index();
        if max_index >= limit {
            return Err(DrawError::IndexRangeExceeded { max_index, limit });
        }

        self.sorted.clear();
        for &(_, triangle) in &self.triangles {
            let start = triangle as usize * 3;
            self.sorted.extend_from_slice(&indices[start..start + 3]);
        }

        let range = device
            .write_dynamic_indices(IndexFormat::for_max_index(max_index), &self.sorted)
            .map_err(DrawError::TriangleSortUpload)?;

        op.index_buffer = range.buffer;
        op.primitive_type = PrimitiveType::TriangleList;
        op.group.start_index = range.start_index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Handle;
    use crate::renderer::channel::WrappedOp;
    use crate::renderer::instance::InstanceHandle;
    use crate::renderer::material::MaterialProperties;
    use crate::renderer::recording::{DeviceCommand, RecordingDevice};
    use crate::renderer::render_op::{PrimitiveGroup, RenderOpFlags};
    use std::rc::Rc;

    fn op(effect: usize, vertex_buffer: usize, start_index: u32) -> RenderOp {
        RenderOp {
            effect: Handle::new(effect),
            technique: Handle::new(0),
            properties: Rc::new(MaterialProperties::new()),
            global_state: None,
            vertex_declaration: Handle::new(0),
            vertex_buffer: Handle::new(vertex_buffer),
            vertex_offset: 0,
            vertex_stride: 12,
            index_buffer: Handle::new(0),
            primitive_type: PrimitiveType::TriangleList,
            group: PrimitiveGroup::new(start_index, 1, 0, 3),
            instance: InstanceHandle::new(u32::MAX, u32::MAX),
            flags: RenderOpFlags::empty(),
            fallback: None,
        }
    }

    #[test]
    fn opaque_sort_orders_by_effect_then_buffers() {
        let mut ops = vec![op(2, 0, 0), op(1, 5, 0), op(1, 3, 6), op(1, 3, 0)];
        sort_opaque(&mut ops);

        let order: Vec<_> = ops
            .iter()
            .map(|o| (o.effect.index(), o.vertex_buffer.index(), o.group.start_index))
            .collect();
        assert_eq!(order, vec![(1, 3, 0), (1, 3, 6), (1, 5, 0), (2, 0, 0)]);
    }

    #[test]
    fn back_to_front_is_stable_for_equal_distances() {
        let mut ops: Vec<_> = [(1.0, 0), (5.0, 1), (1.0, 2), (3.0, 3)]
            .into_iter()
            .map(|(distance, start)| DistanceSortedOp {
                distance,
                op: WrappedOp::Normal(op(0, 0, start)),
            })
            .collect();

        sort_back_to_front(&mut ops);

        let order: Vec<_> = ops
            .iter()
            .map(|o| o.op.render_op().unwrap().group.start_index)
            .collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    fn two_triangle_geometry() -> SortGeometry {
        // triangle 0 at z = -1 (near), triangle 1 at z = -5 (far)
        let positions: Vec<Vec3> = vec![
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 0.0, -5.0),
            Vec3::new(1.0, 0.0, -5.0),
            Vec3::new(0.0, 1.0, -5.0),
        ];
        SortGeometry {
            indices: Rc::from(vec![0u32, 1, 2, 3, 4, 5]),
            positions: Rc::from(positions),
        }
    }

    #[test]
    fn triangles_are_written_far_to_near() {
        let mut device = RecordingDevice::new();
        let mut sorter = TriangleSorter::default();
        let mut op = op(0, 0, 0);
        op.group = PrimitiveGroup::new(0, 2, 0, 6);
        let view_projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);

        sorter
            .sort(
                &mut op,
                &two_triangle_geometry(),
                &Mat4::IDENTITY,
                &view_projection,
                &mut device,
            )
            .unwrap();

        assert_eq!(
            device.commands(),
            &[DeviceCommand::WriteDynamicIndices {
                format: IndexFormat::U16,
                indices: vec![3, 4, 5, 0, 1, 2],
            }]
        );
        assert_eq!(op.index_buffer, device.dynamic_index_buffer(IndexFormat::U16));
        assert_eq!(op.group.start_index, 0);
    }

    #[test]
    fn empty_group_is_rejected() {
        let mut device = RecordingDevice::new();
        let mut sorter = TriangleSorter::default();
        let mut op = op(0, 0, 0);
        op.group = PrimitiveGroup::new(0, 0, 0, 6);

        let result = sorter.sort(
            &mut op,
            &two_triangle_geometry(),
            &Mat4::IDENTITY,
            &Mat4::IDENTITY,
            &mut device,
        );

        assert_eq!(result, Err(DrawError::EmptyTriangleSort));
        assert!(device.commands().is_empty());
    }

    #[test]
    fn upload_failure_is_reported() {
        let mut device = RecordingDevice::new();
        device.fail_dynamic_indices(true);
        let mut sorter = TriangleSorter::default();
        let mut op = op(0, 0, 0);
        op.group = PrimitiveGroup::new(0, 2, 0, 6);
        let original_buffer = op.index_buffer;

        let result = sorter.sort(
            &mut op,
            &two_triangle_geometry(),
            &Mat4::IDENTITY,
            &Mat4::IDENTITY,
            &mut device,
        );

        assert!(matches!(result, Err(DrawError::TriangleSortUpload(_))));
        assert_eq!(op.index_buffer, original_buffer);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut device = RecordingDevice::new();
        let mut sorter = TriangleSorter::default();
        let mut op = op(0, 0, 0);
        op.group = PrimitiveGroup::new(0, 1, 0, 2);

        let result = sorter.sort(
            &mut op,
            &two_triangle_geometry(),
            &Mat4::IDENTITY,
            &Mat4::IDENTITY,
            &mut device,
        );

        assert_eq!(result, Err(DrawError::VertexOutOfRange { index: 2 }));
    }
}
