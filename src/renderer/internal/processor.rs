use std::rc::Rc;

use crate::asset::Handle;
use crate::error::DrawError;
use crate::renderer::device::{
    Effect, IndexBuffer, LockMode, RenderDevice, StreamFrequency, Technique, VertexBuffer,
    VertexDeclaration, GEOMETRY_STREAM, INSTANCE_STREAM,
};
use crate::renderer::global_state::{ApplyMode, ChainIndex};
use crate::renderer::instance::{InstanceAllocator, InstanceData, InstanceTransform};
use crate::renderer::internal::recorder::GlobalStateRecorder;
use crate::renderer::material::MaterialProperties;
use crate::renderer::render_op::RenderOp;
use crate::renderer::stats::DrawStatistics;

/// Everything the processor borrows from its draw context for one flush.
pub(crate) struct SubmitContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub recorder: &'a GlobalStateRecorder,
    pub instances: &'a InstanceAllocator,
    pub stats: &'a mut DrawStatistics,
    pub errors: &'a mut dyn FnMut(&DrawError),
}

impl SubmitContext<'_> {
    /// Reports a failure that did not drop any queued work.
    pub(crate) fn report(&mut self, error: DrawError) {
        (self.errors)(&error);
    }

    /// Reports a failure that dropped an op (or an instancing chain).
    pub(crate) fn skip(&mut self, error: DrawError) {
        self.stats.skipped_ops += 1;
        (self.errors)(&error);
    }
}

/// GPU state last bound by the processor. `None` means unknown.
#[derive(Debug, Default)]
struct ActiveState {
    effect: Option<Handle<Effect>>,
    technique: Option<Handle<Technique>>,
    properties: Option<Rc<MaterialProperties>>,
    vertex_declaration: Option<Handle<VertexDeclaration>>,
    vertex_buffer: Option<(Handle<VertexBuffer>, u32, u32)>,
    index_buffer: Option<Handle<IndexBuffer>>,
    global_state: Option<ChainIndex>,
    /// Effect the active chain was last applied to; used to undo it.
    chain_effect: Option<Handle<Effect>>,
    pass: u32,
    pass_count: u32,
}

/// Open run of mergeable instanced ops whose transforms sit in `staging`.
#[derive(Debug)]
struct InstancingChain {
    reference: RenderOp,
    first_instance: u32,
}

/// Closed chain already uploaded to the instancing buffer.
#[derive(Debug)]
struct InstancedBatch {
    reference: RenderOp,
    first_instance: u32,
    count: u32,
}

#[derive(Clone, Copy)]
enum Submission<'i> {
    Single(InstanceData<'i>),
    Instanced {
        buffer: Handle<VertexBuffer>,
        first_instance: u32,
        count: u32,
    },
}

/// Submits sorted render ops, binding only the state that changed and
/// merging consecutive identical instanced ops into instanced draws.
#[derive(Debug)]
pub(crate) struct RenderOpProcessor {
    active: ActiveState,
    instancing_enabled: bool,
    max_instances: u32,
    instance_buffer: Option<Handle<VertexBuffer>>,
    chain: Option<InstancingChain>,
    staging: Vec<InstanceTransform>,
    pending: Vec<InstancedBatch>,
    /// Instances uploaded in the current buffer generation.
    written_instances: u32,
    /// Whether the current generation already discarded the buffer.
    generation_open: bool,
}

impl RenderOpProcessor {
    pub(crate) fn new(max_instances: u32, instancing_enabled: bool) -> Self {
        Self {
            active: ActiveState::default(),
            instancing_enabled,
            max_instances: max_instances.max(1),
            instance_buffer: None,
            chain: None,
            staging: Vec::new(),
            pending: Vec::new(),
            written_instances: 0,
            generation_open: false,
        }
    }

    pub(crate) fn max_instances(&self) -> u32 {
        self.max_instances
    }

    pub(crate) fn instance_buffer(&self) -> Option<Handle<VertexBuffer>> {
        self.instance_buffer
    }

    pub(crate) fn set_instancing_enabled(&mut self, enabled: bool) {
        self.instancing_enabled = enabled;
    }

    /// Creates the instancing buffer if instancing is usable and it does not
    /// exist yet.
    pub(crate) fn create_unmanaged_objects(
        &mut self,
        device: &mut dyn RenderDevice,
    ) -> Result<(), DrawError> {
        if self.instance_buffer.is_some()
            || !self.instancing_enabled
            || !device.supports_instancing()
        {
            return Ok(());
        }

        let size = u64::from(self.max_instances) * u64::from(InstanceTransform::ELEMENT_SIZE);
        let buffer = device
            .create_dynamic_vertex_buffer(size)
            .map_err(DrawError::InstanceBufferCreation)?;
        log::info!(
            "Created instancing buffer: {} transforms ({} bytes)",
            self.max_instances,
            size
        );
        self.instance_buffer = Some(buffer);
        Ok(())
    }

    pub(crate) fn delete_unmanaged_objects(&mut self, device: &mut dyn RenderDevice) {
        debug_assert!(
            self.pending.is_empty() && self.chain.is_none(),
            "instancing buffer released with pending instanced ops"
        );
        if let Some(buffer) = self.instance_buffer.take() {
            device.release_vertex_buffer(buffer);
            log::info!("Released instancing buffer");
        }
        self.pending.clear();
        self.chain = None;
        self.staging.clear();
    }

    pub(crate) fn start(&mut self, ctx: &mut SubmitContext<'_>) {
        debug_assert!(
            self.pending.is_empty() && self.chain.is_none(),
            "processor started with pending instanced ops"
        );
        if let Err(err) = self.create_unmanaged_objects(ctx.device) {
            ctx.report(err);
        }
        self.active = ActiveState::default();
        self.written_instances = 0;
        self.generation_open = false;
    }

    pub(crate) fn stop(&mut self, ctx: &mut SubmitContext<'_>) {
        self.close_active_effect(true, ctx);
        self.flush_instanced(ctx);
        ctx.device.set_world_matrix(None);
    }

    pub(crate) fn process(&mut self, op: &RenderOp, ctx: &mut SubmitContext<'_>) {
        match self.instance_buffer {
            Some(buffer) if op.is_instanced() => self.process_instanced(op, buffer, ctx),
            _ => self.submit_single(op, ctx),
        }
    }

    fn submit_single(&mut self, op: &RenderOp, ctx: &mut SubmitContext<'_>) {
        // instanced ops reach here when the instancing buffer is missing
        let single = op.single_draw();
        let op = single.as_ref().unwrap_or(op);
        let instances = ctx.instances;
        match instances.get(op.instance) {
            Some(data) => self.submit(op, Submission::Single(data), ctx),
            None => ctx.skip(DrawError::StaleInstanceData),
        }
    }

    fn process_instanced(
        &mut self,
        op: &RenderOp,
        buffer: Handle<VertexBuffer>,
        ctx: &mut SubmitContext<'_>,
    ) {
        let Some(matrix) = ctx.instances.transform(op.instance).copied() else {
            ctx.skip(DrawError::StaleInstanceData);
            return;
        };

        if self
            .chain
            .as_ref()
            .is_some_and(|chain| !chain.reference.is_mergeable_with(op))
        {
            self.close_chain(buffer, ctx);
        }

        if self.used_instances() == self.max_instances {
            log::debug!(
                "Instancing buffer full ({} transforms), flushing",
                self.max_instances
            );
            self.flush_instanced(ctx);
        }

        if self.chain.is_none() {
            self.chain = Some(InstancingChain {
                reference: op.clone(),
                first_instance: self.used_instances(),
            });
        }
        self.staging.push(InstanceTransform::from_matrix(&matrix));
    }

    fn used_instances(&self) -> u32 {
        self.written_instances + self.staging.len() as u32
    }

    /// Uploads the open chain's transforms and queues it for drawing.
    fn close_chain(&mut self, buffer: Handle<VertexBuffer>, ctx: &mut SubmitContext<'_>) {
        let Some(chain) = self.chain.take() else {
            return;
        };
        let count = self.staging.len() as u32;
        let lock = if self.generation_open {
            LockMode::NoOverwrite
        } else {
            LockMode::Discard
        };
        let offset =
            u64::from(chain.first_instance) * u64::from(InstanceTransform::ELEMENT_SIZE);

        match ctx
            .device
            .write_vertex_data(buffer, offset, bytemuck::cast_slice(&self.staging), lock)
        {
            Ok(()) => {
                self.generation_open = true;
                self.written_instances += count;
                self.pending.push(InstancedBatch {
                    reference: chain.reference,
                    first_instance: chain.first_instance,
                    count,
                });
            }
            Err(source) => ctx.skip(DrawError::InstanceUpload {
                instances: count,
                source,
            }),
        }
        self.staging.clear();
    }

    /// Draws every uploaded chain and starts a new buffer generation.
    fn flush_instanced(&mut self, ctx: &mut SubmitContext<'_>) {
        let Some(buffer) = self.instance_buffer else {
            return;
        };
        self.close_chain(buffer, ctx);
        self.written_instances = 0;
        self.generation_open = false;
        if self.pending.is_empty() {
            return;
        }

        // batches carry their own state; drop whatever single ops left bound
        self.close_active_effect(true, ctx);
        ctx.device
            .set_stream_frequency(INSTANCE_STREAM, StreamFrequency::InstanceData(1));

        let mut pending = std::mem::take(&mut self.pending);
        for batch in &pending {
            let submission = Submission::Instanced {
                buffer,
                first_instance: batch.first_instance,
                count: batch.count,
            };
            self.submit(&batch.reference, submission, ctx);
        }
        pending.clear();
        self.pending = pending;

        self.close_active_effect(true, ctx);
        ctx.device
            .set_stream_frequency(GEOMETRY_STREAM, StreamFrequency::Default);
        ctx.device
            .set_stream_frequency(INSTANCE_STREAM, StreamFrequency::Default);
        ctx.device.reset_vertex_stream(INSTANCE_STREAM);
    }

    /// Ends the open pass and effect. A full close also undoes the active
    /// global state chain and forgets every binding.
    fn close_active_effect(&mut self, full: bool, ctx: &mut SubmitContext<'_>) {
        if self.active.effect.take().is_some() {
            ctx.device.end_pass();
            ctx.device.end_effect();
        }
        self.active.technique = None;
        self.active.pass = 0;
        self.active.pass_count = 0;

        if full {
            if let Some(effect) = self.active.chain_effect {
                ctx.recorder
                    .apply(self.active.global_state, ApplyMode::Undo, effect, ctx.device);
            }
            self.active = ActiveState::default();
        }
    }

    fn submit(&mut self, op: &RenderOp, submission: Submission<'_>, ctx: &mut SubmitContext<'_>) {
        let effect_changed = self.active.effect != Some(op.effect)
            || self.active.technique != Some(op.technique);

        if effect_changed {
            self.close_active_effect(false, ctx);
            let passes = match ctx.device.begin_effect(op.effect, op.technique) {
                Ok(passes) => passes,
                Err(source) => {
                    ctx.skip(DrawError::BeginEffect(source));
                    return;
                }
            };
            ctx.stats.effect_switches += 1;
            if passes == 0 {
                ctx.device.end_effect();
                return;
            }
            ctx.device.begin_pass(0);
            self.active.effect = Some(op.effect);
            self.active.technique = Some(op.technique);
            self.active.pass = 0;
            self.active.pass_count = passes;
        } else if self.active.pass != 0 {
            // multi-pass technique left on its last pass by the previous op
            ctx.device.end_pass();
            ctx.device.begin_pass(0);
            self.active.pass = 0;
        }

        self.set_material(op, effect_changed, ctx);
        self.set_primitive_buffers(op, ctx.device);
        self.flush_op(op, submission, ctx);

        for pass in 1..self.active.pass_count {
            ctx.device.end_pass();
            ctx.device.begin_pass(pass);
            self.active.pass = pass;
            self.set_material(op, false, ctx);
            self.flush_op(op, submission, ctx);
        }
    }

    fn set_material(&mut self, op: &RenderOp, effect_changed: bool, ctx: &mut SubmitContext<'_>) {
        let same_properties = self
            .active
            .properties
            .as_ref()
            .is_some_and(|active| Rc::ptr_eq(active, &op.properties));
        if effect_changed || !same_properties {
            for (name, value) in op.properties.iter() {
                ctx.device.set_property(op.effect, name, value);
            }
            self.active.properties = Some(Rc::clone(&op.properties));
        }

        match op.global_state {
            Some(chain) if self.active.global_state != Some(chain) => {
                ctx.recorder
                    .apply(self.active.global_state, ApplyMode::Undo, op.effect, ctx.device);
                ctx.recorder
                    .apply(Some(chain), ApplyMode::Apply, op.effect, ctx.device);
                self.active.global_state = Some(chain);
                self.active.chain_effect = Some(op.effect);
            }
            _ if effect_changed && self.active.global_state.is_some() => {
                ctx.recorder.apply(
                    self.active.global_state,
                    ApplyMode::ChangeEffect,
                    op.effect,
                    ctx.device,
                );
                self.active.chain_effect = Some(op.effect);
            }
            _ => {}
        }
    }

    fn set_primitive_buffers(&mut self, op: &RenderOp, device: &mut dyn RenderDevice) {
        if self.active.vertex_declaration != Some(op.vertex_declaration) {
            device.set_vertex_declaration(op.vertex_declaration);
            self.active.vertex_declaration = Some(op.vertex_declaration);
        }

        let vertex_buffer = (op.vertex_buffer, op.vertex_offset, op.vertex_stride);
        if self.active.vertex_buffer != Some(vertex_buffer) {
            device.set_vertex_buffer(
                GEOMETRY_STREAM,
                op.vertex_buffer,
                op.vertex_offset,
                op.vertex_stride,
            );
            self.active.vertex_buffer = Some(vertex_buffer);
        }

        if self.active.index_buffer != Some(op.index_buffer) {
            device.set_index_buffer(op.index_buffer);
            self.active.index_buffer = Some(op.index_buffer);
        }
    }

    fn flush_op(&mut self, op: &RenderOp, submission: Submission<'_>, ctx: &mut SubmitContext<'_>) {
        match submission {
            Submission::Single(InstanceData::Transform(matrix)) => {
                ctx.device.set_world_matrix(Some(matrix))
            }
            Submission::Single(InstanceData::Palette(palette)) => {
                ctx.device.set_world_palette(palette)
            }
            Submission::Instanced {
                buffer,
                first_instance,
                count,
            } => {
                ctx.device.set_vertex_buffer(
                    INSTANCE_STREAM,
                    buffer,
                    first_instance * InstanceTransform::ELEMENT_SIZE,
                    InstanceTransform::ELEMENT_SIZE,
                );
                ctx.device
                    .set_stream_frequency(GEOMETRY_STREAM, StreamFrequency::IndexedData(count));
            }
        }

        ctx.device.commit_changes(op.effect);
        if op.group.is_empty() {
            return;
        }

        match submission {
            Submission::Single(_) => ctx.device.draw_indexed(op.primitive_type, &op.group),
            Submission::Instanced { count, .. } => {
                ctx.device
                    .draw_indexed_instanced(op.primitive_type, &op.group, count);
                ctx.stats.instanced_draw_calls += 1;
                ctx.stats.instances_drawn += count;
            }
        }
        ctx.stats.draw_calls += 1;
    }

    /// Draws `op` straight away, leaving the batching state untouched.
    pub(crate) fn immediate_render(&self, op: &RenderOp, ctx: &mut SubmitContext<'_>) {
        let instances = ctx.instances;
        let Some(data) = instances.get(op.instance) else {
            ctx.skip(DrawError::StaleInstanceData);
            return;
        };

        let passes = match ctx.device.begin_effect(op.effect, op.technique) {
            Ok(passes) => passes,
            Err(source) => {
                ctx.skip(DrawError::BeginEffect(source));
                return;
            }
        };
        ctx.stats.effect_switches += 1;

        match data {
            InstanceData::Transform(matrix) => ctx.device.set_world_matrix(Some(matrix)),
            InstanceData::Palette(palette) => ctx.device.set_world_palette(palette),
        }
        ctx.device.set_vertex_declaration(op.vertex_declaration);
        ctx.device.set_vertex_buffer(
            GEOMETRY_STREAM,
            op.vertex_buffer,
            op.vertex_offset,
            op.vertex_stride,
        );
        ctx.device.set_index_buffer(op.index_buffer);

        for pass in 0..passes {
            ctx.device.begin_pass(pass);
            for (name, value) in op.properties.iter() {
                ctx.device.set_property(op.effect, name, value);
            }
            ctx.recorder
                .apply(op.global_state, ApplyMode::Apply, op.effect, ctx.device);
            ctx.device.commit_changes(op.effect);
            if !op.group.is_empty() {
                ctx.device.draw_indexed(op.primitive_type, &op.group);
                ctx.stats.draw_calls += 1;
            }
            ctx.device.end_pass();
        }
        ctx.device.end_effect();

        ctx.recorder
            .apply(op.global_state, ApplyMode::Undo, op.effect, ctx.device);
        ctx.device.set_world_matrix(None);
    }
}
