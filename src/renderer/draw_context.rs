// renderer/draw_context.rs
//
// Public entry point: producers queue draws here, flush submits them.

use std::error::Error as _;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};

use crate::asset::{BoundingBox, Primitives, Vertices};
use crate::error::DrawError;
use crate::renderer::channel::{
    ChannelCollector, ChannelMask, ChannelType, SortGeometry, UserDrawItem, WrappedOp,
};
use crate::renderer::device::{ColourWriteMask, RenderDevice};
use crate::renderer::global_state::GlobalStateBlock;
use crate::renderer::instance::{InstanceAllocator, InstanceHandle};
use crate::renderer::internal::processor::{RenderOpProcessor, SubmitContext};
use crate::renderer::internal::recorder::GlobalStateRecorder;
use crate::renderer::internal::sort::{sort_back_to_front, sort_opaque, TriangleSorter};
use crate::renderer::material::{Material, OverrideBlock, RenderingPass};
use crate::renderer::render_op::{RenderOp, RenderOpFlags, SingleDrawState};
use crate::renderer::stats::DrawStatistics;
use crate::settings::DrawContextSettings;

/// Routes skipped-draw reports to the user's handler or the log.
struct ErrorSink {
    label: String,
    handler: Option<Box<dyn FnMut(&DrawError)>>,
}

impl ErrorSink {
    fn handle(&mut self, error: &DrawError) {
        if let Some(handler) = self.handler.as_mut() {
            handler(error);
            return;
        }
        match error.source() {
            Some(source) => log::error!("{}: {}: {}", self.label, error, source),
            None => log::error!("{}: {}", self.label, error),
        }
    }
}

/// Deferred draw submission for one rendering pass.
///
/// Draws are queued per channel between [`begin`](Self::begin) and
/// [`end`](Self::end) and reach the device only in [`flush`](Self::flush):
/// opaque ops sorted by state and merged into instanced draws where possible,
/// transparent ops back to front, shimmer ops in order with alpha-only writes.
pub struct DrawContext<D: RenderDevice> {
    pass: RenderingPass,
    settings: DrawContextSettings,
    device: D,
    channels: ChannelCollector,
    recorder: GlobalStateRecorder,
    processor: RenderOpProcessor,
    triangle_sorter: TriangleSorter,
    view: Mat4,
    view_projection: Mat4,
    immediate_mode: u32,
    active_override: Option<Rc<OverrideBlock>>,
    stats: DrawStatistics,
    errors: ErrorSink,
}

impl<D: RenderDevice> DrawContext<D> {
    pub fn new(device: D, pass: RenderingPass, settings: DrawContextSettings) -> Self {
        let settings = settings.validate();
        Self {
            pass,
            device,
            channels: ChannelCollector::new(
                settings.initial_opaque_capacity,
                settings.instance_page_size,
            ),
            recorder: GlobalStateRecorder::new(),
            processor: RenderOpProcessor::new(
                settings.max_instances,
                settings.hw_instancing_enabled,
            ),
            triangle_sorter: TriangleSorter::default(),
            view: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            immediate_mode: 0,
            active_override: None,
            stats: DrawStatistics::default(),
            errors: ErrorSink {
                label: "DrawContext".to_string(),
                handler: None,
            },
            settings,
        }
    }

    /// Labels the context; the label prefixes its log lines.
    pub fn with_name(mut self, name: &str) -> Self {
        self.errors.label = format!("DrawContext/{}", name);
        self
    }

    pub fn label(&self) -> &str {
        &self.errors.label
    }

    pub fn rendering_pass(&self) -> RenderingPass {
        self.pass
    }

    pub fn settings(&self) -> &DrawContextSettings {
        &self.settings
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Replaces the default handler, which logs every skipped draw.
    pub fn set_error_handler(&mut self, handler: impl FnMut(&DrawError) + 'static) {
        self.errors.handler = Some(Box::new(handler));
    }

    pub fn set_view(&mut self, view: Mat4, projection: Mat4) {
        self.view = view;
        self.view_projection = projection * view;
    }

    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    pub fn view_projection(&self) -> &Mat4 {
        &self.view_projection
    }

    pub fn hw_instancing_available(&self) -> bool {
        self.settings.hw_instancing_enabled && self.device.supports_instancing()
    }

    pub fn statistics(&self) -> &DrawStatistics {
        &self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    pub fn channels(&self) -> &ChannelCollector {
        &self.channels
    }

    pub fn instances(&self) -> &InstanceAllocator {
        &self.channels.instances
    }

    pub fn begin(&mut self, mask: ChannelMask) {
        self.channels.begin(mask);
        if self.settings.auto_reset_statistics {
            self.stats.reset();
        }
    }

    pub fn end(&mut self, mask: ChannelMask) {
        self.channels.end(mask);
    }

    /// Submits the channels in `mask`: opaque, then transparent, then
    /// shimmer. With `clearing` the submitted channels are emptied; once all
    /// channels are empty the frame's instance data and global state log are
    /// released.
    pub fn flush(&mut self, mask: ChannelMask, clearing: bool) {
        debug_assert!(
            !self.channels.collecting().intersects(mask),
            "flushing channels {:?} while they are collecting",
            self.channels.collecting() & mask
        );
        log::trace!(
            "{}: flush {:?}: {} opaque, {} transparent, {} shimmer",
            self.errors.label,
            mask,
            self.channels.opaque.len(),
            self.channels.transparent.len(),
            self.channels.shimmer.len()
        );

        if mask.contains(ChannelMask::OPAQUE) {
            self.flush_opaque();
            if clearing {
                self.channels.opaque.clear();
            }
        }
        if mask.contains(ChannelMask::TRANSPARENT) {
            self.flush_transparent();
            if clearing {
                for entry in self.channels.transparent.drain(..) {
                    entry.op.finish();
                }
            }
        }
        if mask.contains(ChannelMask::SHIMMER) {
            self.flush_shimmer();
            if clearing {
                for entry in self.channels.shimmer.drain(..) {
                    entry.finish();
                }
            }
        }

        if self.channels.is_empty() {
            self.channels.instances.reset();
            self.recorder.reset();
        }
    }

    fn flush_opaque(&mut self) {
        if self.channels.opaque.is_empty() || !self.settings.render_opaque {
            return;
        }
        if self.settings.sort_opaque {
            sort_opaque(&mut self.channels.opaque);
        }
        if self.settings.collect_statistics {
            self.stats.record_opaque(&self.channels.opaque);
        }

        let Self {
            device,
            channels,
            recorder,
            processor,
            stats,
            errors,
            ..
        } = self;
        let mut report = |error: &DrawError| errors.handle(error);
        let mut ctx = SubmitContext {
            device,
            recorder,
            instances: &channels.instances,
            stats,
            errors: &mut report,
        };

        processor.start(&mut ctx);
        for op in &channels.opaque {
            processor.process(op, &mut ctx);
        }
        processor.stop(&mut ctx);
    }

    fn flush_transparent(&mut self) {
        if self.channels.transparent.is_empty() || !self.settings.render_transparent {
            return;
        }
        if self.settings.sort_transparent {
            sort_back_to_front(&mut self.channels.transparent);
        }
        if self.settings.collect_statistics {
            self.stats.collected_transparent_ops += self.channels.transparent.len() as u32;
        }

        let Self {
            device,
            channels,
            recorder,
            processor,
            triangle_sorter,
            view_projection,
            stats,
            errors,
            ..
        } = self;
        let mut report = |error: &DrawError| errors.handle(error);
        let mut ctx = SubmitContext {
            device,
            recorder,
            instances: &channels.instances,
            stats,
            errors: &mut report,
        };

        processor.start(&mut ctx);
        for entry in channels.transparent.iter_mut() {
            flush_wrapped(
                &mut entry.op,
                processor,
                triangle_sorter,
                view_projection,
                &mut ctx,
            );
        }
        processor.stop(&mut ctx);
    }

    fn flush_shimmer(&mut self) {
        if self.channels.shimmer.is_empty() || !self.settings.render_shimmer {
            return;
        }
        if self.settings.collect_statistics {
            self.stats.collected_shimmer_ops += self.channels.shimmer.len() as u32;
        }

        self.device.set_colour_write_mask(ColourWriteMask::ALPHA);
        {
            let Self {
                device,
                channels,
                recorder,
                processor,
                triangle_sorter,
                view_projection,
                stats,
                errors,
                ..
            } = self;
            let mut report = |error: &DrawError| errors.handle(error);
            let mut ctx = SubmitContext {
                device,
                recorder,
                instances: &channels.instances,
                stats,
                errors: &mut report,
            };

            processor.start(&mut ctx);
            for entry in channels.shimmer.iter_mut() {
                flush_wrapped(entry, processor, triangle_sorter, view_projection, &mut ctx);
            }
            processor.stop(&mut ctx);
        }
        self.device.set_colour_write_mask(ColourWriteMask::RGB);
    }

    /// Pushes a block that applies to every draw queued until it is popped.
    pub fn push_global_state_block(&mut self, block: Rc<dyn GlobalStateBlock>) {
        self.recorder.push(block);
    }

    pub fn pop_global_state_block(&mut self, block: &Rc<dyn GlobalStateBlock>) {
        self.recorder.pop(block);
    }

    /// While pushed, opaque draws are submitted at once instead of queued.
    pub fn push_immediate_mode(&mut self) {
        self.immediate_mode += 1;
    }

    pub fn pop_immediate_mode(&mut self) {
        debug_assert!(self.immediate_mode > 0, "unbalanced pop_immediate_mode");
        if self.immediate_mode == 0 {
            log::warn!("{}: pop_immediate_mode without push", self.errors.label);
            return;
        }
        self.immediate_mode -= 1;
    }

    pub fn is_immediate_mode(&self) -> bool {
        self.immediate_mode > 0
    }

    pub fn push_override_block(&mut self, block: Rc<OverrideBlock>) {
        debug_assert!(
            self.active_override.is_none(),
            "an override block is already active"
        );
        if self.active_override.is_some() {
            log::warn!(
                "{}: replacing the active override block",
                self.errors.label
            );
        }
        self.active_override = Some(block);
    }

    pub fn pop_override_block(&mut self, block: &Rc<OverrideBlock>) {
        let matches = self
            .active_override
            .as_ref()
            .is_some_and(|active| Rc::ptr_eq(active, block));
        debug_assert!(matches, "popped override block is not the active one");
        if !matches {
            log::warn!(
                "{}: popping an override block that is not active",
                self.errors.label
            );
        }
        self.active_override = None;
    }

    /// Allocates per-draw instance data for the current frame: one world
    /// matrix, or `palette_size` skin matrices when non-zero.
    pub fn alloc_instance_data(&mut self, palette_size: u32) -> InstanceHandle {
        self.channels.instances.alloc(palette_size)
    }

    pub fn instance_transform_mut(&mut self, handle: InstanceHandle) -> Option<&mut Mat4> {
        self.channels.instances.transform_mut(handle)
    }

    pub fn instance_palette_mut(&mut self, handle: InstanceHandle) -> Option<&mut [Vec4]> {
        self.channels.instances.palette_mut(handle)
    }

    /// Queues one primitive group of a mesh.
    ///
    /// Draws whose material has no technique for this context's pass, or
    /// whose channel is not collecting, are dropped silently.
    pub fn draw_render_op(
        &mut self,
        material: &Material,
        vertices: &Vertices,
        primitives: &Primitives,
        group_index: usize,
        instance: InstanceHandle,
        world_bb: &BoundingBox,
    ) {
        let Some(is_skinned) = self
            .channels
            .instances
            .get(instance)
            .map(|data| data.is_skinned())
        else {
            self.stats.skipped_ops += 1;
            self.errors.handle(&DrawError::StaleInstanceData);
            return;
        };

        let override_block = self.active_override.clone();
        let material = match &override_block {
            Some(block) => block.process(material, is_skinned),
            None => material,
        };

        let channel = material.channel();
        if !self.channels.is_collecting(channel.mask()) {
            return;
        }

        let wants_instancing = channel == ChannelType::Opaque
            && !is_skinned
            && self.immediate_mode == 0
            && self.hw_instancing_available()
            && vertices.supports_instancing();
        let Some(resolved) = material.resolve(self.pass, wants_instancing) else {
            return;
        };

        let Some(group) = primitives.group(group_index).copied() else {
            debug_assert!(false, "primitive group {} does not exist", group_index);
            log::warn!(
                "{}: primitive group {} does not exist",
                self.errors.label,
                group_index
            );
            return;
        };
        let Some(vertex_declaration) = vertices.declaration(resolved.instanced) else {
            return;
        };
        let fallback = if resolved.instanced {
            material
                .resolve(self.pass, false)
                .zip(vertices.declaration(false))
                .map(|(single, vertex_declaration)| SingleDrawState {
                    technique: single.technique,
                    vertex_declaration,
                })
        } else {
            None
        };

        let op = RenderOp {
            effect: resolved.effect,
            technique: resolved.technique,
            properties: resolved.properties,
            global_state: self.recorder.capture(),
            vertex_declaration,
            vertex_buffer: vertices.buffer(),
            vertex_offset: vertices.offset(),
            vertex_stride: vertices.stride(),
            index_buffer: primitives.index_buffer(),
            primitive_type: primitives.primitive_type(),
            group,
            instance,
            flags: if resolved.instanced {
                RenderOpFlags::HW_INSTANCING
            } else {
                RenderOpFlags::empty()
            },
            fallback,
        };

        match channel {
            ChannelType::Opaque if self.immediate_mode > 0 => {
                if self.settings.render_opaque {
                    self.immediate_render(&op);
                }
            }
            ChannelType::Opaque => self.channels.push_opaque(op),
            ChannelType::Transparent | ChannelType::TransparentInternalSort => {
                let distance = self.camera_distance(world_bb, primitives.origin(group_index));
                let entry = wrap(channel, op, vertices, primitives, is_skinned);
                self.channels.push_transparent(distance, entry);
            }
            ChannelType::Shimmer | ChannelType::ShimmerInternalSort => {
                let entry = wrap(channel, op, vertices, primitives, is_skinned);
                self.channels.push_shimmer(entry);
            }
        }
    }

    /// Depth of the box centre, offset by the group origin, in front of the
    /// camera. View space is right-handed with the camera looking down -Z.
    fn camera_distance(&self, world_bb: &BoundingBox, origin: Vec3) -> f32 {
        -self.view.transform_point3(world_bb.centre() + origin).z
    }

    fn immediate_render(&mut self, op: &RenderOp) {
        let Self {
            device,
            channels,
            recorder,
            processor,
            stats,
            errors,
            ..
        } = self;
        let mut report = |error: &DrawError| errors.handle(error);
        let mut ctx = SubmitContext {
            device,
            recorder,
            instances: &channels.instances,
            stats,
            errors: &mut report,
        };
        processor.immediate_render(op, &mut ctx);
    }

    /// Queues a custom draw into the transparent or shimmer channel. When
    /// that channel is not collecting the item is finished straight away.
    pub fn draw_user_item(
        &mut self,
        item: Box<dyn UserDrawItem>,
        mask: ChannelMask,
        distance: f32,
    ) {
        debug_assert!(
            mask == ChannelMask::TRANSPARENT || mask == ChannelMask::SHIMMER,
            "user items belong to the transparent or shimmer channel, got {:?}",
            mask
        );

        if mask == ChannelMask::TRANSPARENT && self.channels.is_collecting(mask) {
            self.channels.push_transparent(distance, WrappedOp::UserItem(item));
        } else if mask == ChannelMask::SHIMMER && self.channels.is_collecting(mask) {
            self.channels.push_shimmer(WrappedOp::UserItem(item));
        } else {
            item.fini();
        }
    }

    /// Recreates device resources after a device reset.
    pub fn create_unmanaged_objects(&mut self) {
        self.processor
            .set_instancing_enabled(self.settings.hw_instancing_enabled);
        if let Err(err) = self.processor.create_unmanaged_objects(&mut self.device) {
            self.errors.handle(&err);
        }
    }

    /// Releases device resources ahead of a device reset.
    pub fn delete_unmanaged_objects(&mut self) {
        self.processor.delete_unmanaged_objects(&mut self.device);
    }

    pub fn max_instances(&self) -> u32 {
        self.processor.max_instances()
    }
}

impl<D: RenderDevice> Drop for DrawContext<D> {
    fn drop(&mut self) {
        if !self.channels.is_empty() {
            log::warn!(
                "{}: dropped with {} queued draws",
                self.errors.label,
                self.channels.len(ChannelMask::ALL)
            );
        }
        for entry in self.channels.transparent.drain(..) {
            entry.op.finish();
        }
        for entry in self.channels.shimmer.drain(..) {
            entry.finish();
        }
        self.processor.delete_unmanaged_objects(&mut self.device);
    }
}

fn wrap(
    channel: ChannelType,
    op: RenderOp,
    vertices: &Vertices,
    primitives: &Primitives,
    is_skinned: bool,
) -> WrappedOp {
    if channel.needs_internal_sort() && !is_skinned {
        WrappedOp::InternalSort {
            op,
            geometry: SortGeometry {
                indices: Rc::clone(primitives.indices()),
                positions: Rc::clone(vertices.positions()),
            },
        }
    } else {
        WrappedOp::Normal(op)
    }
}

fn flush_wrapped(
    entry: &mut WrappedOp,
    processor: &mut RenderOpProcessor,
    sorter: &mut TriangleSorter,
    view_projection: &Mat4,
    ctx: &mut SubmitContext<'_>,
) {
    match entry {
        WrappedOp::Normal(op) => processor.process(op, ctx),
        WrappedOp::InternalSort { op, geometry } => {
            let Some(world) = ctx.instances.transform(op.instance).copied() else {
                ctx.skip(DrawError::StaleInstanceData);
                return;
            };
            let mut sorted = op.clone();
            match sorter.sort(&mut sorted, geometry, &world, view_projection, ctx.device) {
                Ok(()) => processor.process(&sorted, ctx),
                Err(err) => ctx.skip(err),
            }
        }
        WrappedOp::UserItem(item) => {
            processor.stop(ctx);
            item.draw(ctx.device);
            processor.start(ctx);
        }
    }
}
