//! Shared setup for the draw context integration tests.
//!
//! The harness registers one effect with three techniques and a mesh of three
//! stacked triangles at z = 0, -1 and -2. The camera sits at z = +5 looking
//! down -Z, so lower z means farther away.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use deferred_draw::asset::{BoundingBox, Handle, Primitives, Vertices};
use deferred_draw::renderer::device::{
    Effect, PrimitiveType, Technique, VertexBuffer, INSTANCE_STREAM,
};
use deferred_draw::renderer::{
    ApplyMode, ChannelMask, ChannelType, DeviceCommand, DrawContext, GlobalStateBlock,
    InstanceHandle, Material, MaterialProperties, PrimitiveGroup, PropertyValue, RecordingDevice,
    RenderDevice, RenderingPass,
};
use deferred_draw::DrawContextSettings;
use glam::{Mat4, Vec3};

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

pub fn camera_position() -> Vec3 {
    Vec3::new(0.0, 0.0, 5.0)
}

pub struct Harness {
    pub ctx: DrawContext<RecordingDevice>,
    pub effect: Handle<Effect>,
    pub main: Handle<Technique>,
    pub instanced: Handle<Technique>,
    pub two_pass: Handle<Technique>,
    pub vertices: Vertices,
    pub primitives: Primitives,
    next_tint: f32,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(RecordingDevice::new(), DrawContextSettings::default())
    }

    pub fn without_instancing() -> Self {
        Self::with(
            RecordingDevice::without_instancing(),
            DrawContextSettings::default(),
        )
    }

    pub fn with_settings(settings: DrawContextSettings) -> Self {
        Self::with(RecordingDevice::new(), settings)
    }

    pub fn with(mut device: RecordingDevice, settings: DrawContextSettings) -> Self {
        init_logging();

        let mut effect = Effect::new("standard");
        let main = effect.add_technique("main", 1);
        let instanced = effect.add_technique("main_instanced", 1);
        let two_pass = effect.add_technique("two_pass", 2);
        let effect = device.add_effect(effect);

        let declaration = device.add_vertex_declaration("position", false);
        let instanced_declaration = device.add_vertex_declaration("position_instanced", true);
        let positions: Vec<Vec3> = (0..3)
            .flat_map(|layer| {
                let z = -(layer as f32);
                [
                    Vec3::new(0.0, 0.0, z),
                    Vec3::new(1.0, 0.0, z),
                    Vec3::new(0.0, 1.0, z),
                ]
            })
            .collect();
        let indices: Vec<u32> = (0..9).collect();
        let vertex_buffer = device.add_vertex_buffer(vec![0; positions.len() * 12]);
        let index_buffer = device.add_index_buffer(indices.clone());

        let vertices = Vertices::new(declaration, vertex_buffer, 12, positions)
            .with_instanced_declaration(instanced_declaration);
        let primitives = Primitives::new(index_buffer, indices, PrimitiveType::TriangleList)
            .with_group(PrimitiveGroup::new(0, 3, 0, 9), Vec3::new(0.5, 0.5, -1.0))
            .with_group(PrimitiveGroup::new(0, 1, 0, 3), Vec3::new(0.5, 0.5, 0.0));

        let mut ctx = DrawContext::new(device, RenderingPass::Color, settings);
        ctx.set_view(
            Mat4::look_at_rh(camera_position(), Vec3::ZERO, Vec3::Y),
            Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0),
        );

        Self {
            ctx,
            effect,
            main,
            instanced,
            two_pass,
            vertices,
            primitives,
            next_tint: 0.0,
        }
    }

    /// A material with its own property set, tagged by a unique `tint`.
    /// Opaque materials also get an instanced technique.
    pub fn material(&mut self, channel: ChannelType) -> Material {
        self.next_tint += 1.0;
        let properties =
            MaterialProperties::new().with("tint", PropertyValue::Float(self.next_tint));
        let material = Material::new(channel, properties);
        match channel {
            ChannelType::Opaque => material.with_instanced_pass(
                RenderingPass::Color,
                self.effect,
                self.main,
                self.instanced,
            ),
            _ => material.with_pass(RenderingPass::Color, self.effect, self.main),
        }
    }

    pub fn two_pass_material(&mut self, channel: ChannelType) -> Material {
        self.next_tint += 1.0;
        let properties =
            MaterialProperties::new().with("tint", PropertyValue::Float(self.next_tint));
        Material::new(channel, properties).with_pass(
            RenderingPass::Color,
            self.effect,
            self.two_pass,
        )
    }

    /// Draws group 1 (a single triangle) translated to `at`.
    pub fn draw(&mut self, material: &Material, at: Vec3) -> InstanceHandle {
        self.draw_group(material, 1, at)
    }

    pub fn draw_group(&mut self, material: &Material, group: usize, at: Vec3) -> InstanceHandle {
        let instance = self.ctx.alloc_instance_data(0);
        if let Some(world) = self.ctx.instance_transform_mut(instance) {
            *world = Mat4::from_translation(at);
        }
        self.ctx.draw_render_op(
            material,
            &self.vertices,
            &self.primitives,
            group,
            instance,
            &BoundingBox::from_point(at),
        );
        instance
    }

    pub fn draw_skinned(
        &mut self,
        material: &Material,
        group: usize,
        bones: u32,
    ) -> InstanceHandle {
        let instance = self.ctx.alloc_instance_data(bones);
        self.ctx.draw_render_op(
            material,
            &self.vertices,
            &self.primitives,
            group,
            instance,
            &BoundingBox::from_point(Vec3::ZERO),
        );
        instance
    }

    /// Runs `body` between `begin(mask)` and `end(mask)`.
    pub fn collect(&mut self, mask: ChannelMask, body: impl FnOnce(&mut Self)) {
        self.ctx.begin(mask);
        body(self);
        self.ctx.end(mask);
    }

    /// Clearing flush of every channel; returns the emitted commands.
    pub fn flush(&mut self) -> Vec<DeviceCommand> {
        self.flush_mask(ChannelMask::ALL, true)
    }

    pub fn flush_mask(&mut self, mask: ChannelMask, clearing: bool) -> Vec<DeviceCommand> {
        self.ctx.flush(mask, clearing);
        self.ctx.device_mut().take_commands()
    }

    pub fn device(&self) -> &RecordingDevice {
        self.ctx.device()
    }
}

pub fn draw_count(commands: &[DeviceCommand]) -> usize {
    commands.iter().filter(|command| command.is_draw()).count()
}

pub fn instanced_counts(commands: &[DeviceCommand]) -> Vec<u32> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::DrawIndexedInstanced { instances, .. } => Some(*instances),
            _ => None,
        })
        .collect()
}

/// Translations of every world matrix set for a single draw, in order.
pub fn world_translations(commands: &[DeviceCommand]) -> Vec<Vec3> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::SetWorldMatrix(Some(matrix)) => Some(matrix.w_axis.truncate()),
            _ => None,
        })
        .collect()
}

/// Values of every `tint` property write, in order.
pub fn tints(commands: &[DeviceCommand]) -> Vec<f32> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::SetProperty {
                name,
                value: PropertyValue::Float(tint),
                ..
            } if name == "tint" => Some(*tint),
            _ => None,
        })
        .collect()
}

pub fn begin_passes(commands: &[DeviceCommand]) -> Vec<u32> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::BeginPass(pass) => Some(*pass),
            _ => None,
        })
        .collect()
}

/// Buffer and first element of every instanced stream binding.
pub fn instance_bindings(commands: &[DeviceCommand]) -> Vec<(Handle<VertexBuffer>, u32)> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::SetVertexBuffer {
                stream,
                buffer,
                offset,
                stride,
            } if *stream == INSTANCE_STREAM => Some((*buffer, offset / stride)),
            _ => None,
        })
        .collect()
}

pub fn position_of(commands: &[DeviceCommand], wanted: &DeviceCommand) -> Option<usize> {
    commands.iter().position(|command| command == wanted)
}

pub type ApplyLog = Rc<RefCell<Vec<(&'static str, ApplyMode)>>>;

/// Global state block that only records how it was applied.
#[derive(Debug)]
pub struct RecordingBlock {
    name: &'static str,
    log: ApplyLog,
}

impl RecordingBlock {
    pub fn new(name: &'static str, log: &ApplyLog) -> Rc<dyn GlobalStateBlock> {
        Rc::new(Self {
            name,
            log: Rc::clone(log),
        })
    }
}

impl GlobalStateBlock for RecordingBlock {
    fn apply(&self, _device: &mut dyn RenderDevice, _effect: Handle<Effect>, mode: ApplyMode) {
        self.log.borrow_mut().push((self.name, mode));
    }
}
