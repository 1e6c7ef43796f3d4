// renderer/device.rs
//
// The graphics backend contract the submission engine draws through.

use bitflags::bitflags;
use glam::{Mat4, Vec4};
use thiserror::Error;

use crate::asset::Handle;
use crate::renderer::material::PropertyValue;
use crate::renderer::render_op::PrimitiveGroup;

/// Stream slot the per-instance transforms are bound to.
pub const INSTANCE_STREAM: u32 = 3;

/// Stream slot of the default vertex buffer.
pub const GEOMETRY_STREAM: u32 = 0;

/// A compiled shader (vertex + pixel program pair) with its techniques.
#[derive(Debug, Clone)]
pub struct Effect {
    pub name: String,
    pub techniques: Vec<Technique>,
}

impl Effect {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            techniques: Vec::new(),
        }
    }

    /// Adds a technique and returns its handle within this effect.
    pub fn add_technique(&mut self, name: impl Into<String>, passes: u32) -> Handle<Technique> {
        let index = self.techniques.len();
        self.techniques.push(Technique {
            name: name.into(),
            passes,
        });
        Handle::new(index)
    }

    pub fn technique(&self, handle: Handle<Technique>) -> Option<&Technique> {
        self.techniques.get(handle.index())
    }
}

#[derive(Debug, Clone)]
pub struct Technique {
    pub name: String,
    pub passes: u32,
}

#[derive(Debug, Clone)]
pub struct VertexDeclaration {
    pub name: String,
    /// True when the declaration reads a per-instance transform stream.
    pub instanced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VertexBuffer {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct IndexBuffer {
    pub format: IndexFormat,
    pub indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    const MAX_16_BIT_INDEX: u32 = 0xffff;

    /// Smallest format able to address `max_index`.
    pub fn for_max_index(max_index: u32) -> Self {
        if max_index <= Self::MAX_16_BIT_INDEX {
            Self::U16
        } else {
            Self::U32
        }
    }
}

/// How a dynamic buffer region is locked for writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Previous contents may be thrown away; starts a new buffer generation.
    Discard,
    /// Appends to the current generation without touching regions in flight.
    NoOverwrite,
}

/// Stream source frequency used to set up hardware instancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFrequency {
    Default,
    /// Geometry stream repeated `n` times.
    IndexedData(u32),
    /// Instance stream advanced once every `n` instances.
    InstanceData(u32),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColourWriteMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const RGB = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
    }
}

/// Indices written into the shared dynamic index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicIndexRange {
    pub buffer: Handle<IndexBuffer>,
    pub start_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of video memory")]
    OutOfVideoMemory,
    #[error("device lost")]
    DeviceLost,
    #[error("failed to lock {resource}")]
    LockFailed { resource: &'static str },
    #[error("unknown effect")]
    UnknownEffect,
    #[error("unknown technique")]
    UnknownTechnique,
    #[error("unknown buffer")]
    UnknownBuffer,
}

/// Submission primitives required from a graphics backend.
///
/// The draw context drives a backend through this trait only; the sequence of
/// calls it makes is the observable output of a flush.
pub trait RenderDevice {
    /// Whether the backend can draw with per-instance vertex streams.
    fn supports_instancing(&self) -> bool;

    /// Largest vertex index the backend accepts.
    fn max_vertex_index(&self) -> u32;

    fn set_vertex_declaration(&mut self, declaration: Handle<VertexDeclaration>);

    fn set_vertex_buffer(
        &mut self,
        stream: u32,
        buffer: Handle<VertexBuffer>,
        offset: u32,
        stride: u32,
    );

    /// Unbinds whatever buffer is set on `stream`.
    fn reset_vertex_stream(&mut self, stream: u32);

    fn set_index_buffer(&mut self, buffer: Handle<IndexBuffer>);

    /// Selects `technique` and begins the effect. Returns the number of passes.
    fn begin_effect(
        &mut self,
        effect: Handle<Effect>,
        technique: Handle<Technique>,
    ) -> Result<u32, DeviceError>;

    fn begin_pass(&mut self, pass: u32);

    fn end_pass(&mut self);

    fn end_effect(&mut self);

    /// Writes a named constant or texture on the effect.
    fn set_property(&mut self, effect: Handle<Effect>, name: &str, value: &PropertyValue);

    /// Sets the world transform, or clears it when `None`.
    fn set_world_matrix(&mut self, matrix: Option<&Mat4>);

    /// Sets a skinning palette, three `Vec4` rows per bone.
    fn set_world_palette(&mut self, palette: &[Vec4]);

    /// Flushes pending constant writes before a draw.
    fn commit_changes(&mut self, effect: Handle<Effect>);

    fn draw_indexed(&mut self, primitive_type: PrimitiveType, group: &PrimitiveGroup);

    fn draw_indexed_instanced(
        &mut self,
        primitive_type: PrimitiveType,
        group: &PrimitiveGroup,
        instances: u32,
    );

    fn set_stream_frequency(&mut self, stream: u32, frequency: StreamFrequency);

    fn set_colour_write_mask(&mut self, mask: ColourWriteMask);

    /// Creates a dynamic, write-only vertex buffer of `size` bytes.
    fn create_dynamic_vertex_buffer(
        &mut self,
        size: u64,
    ) -> Result<Handle<VertexBuffer>, DeviceError>;

    fn release_vertex_buffer(&mut self, buffer: Handle<VertexBuffer>);

    /// Locks `data.len()` bytes at `offset`, copies `data` in and unlocks.
    fn write_vertex_data(
        &mut self,
        buffer: Handle<VertexBuffer>,
        offset: u64,
        data: &[u8],
        lock: LockMode,
    ) -> Result<(), DeviceError>;

    /// Appends indices to the shared dynamic index buffer of `format`.
    fn write_dynamic_indices(
        &mut self,
        format: IndexFormat,
        indices: &[u32],
    ) -> Result<DynamicIndexRange, DeviceError>;
}

impl<T: RenderDevice + ?Sized> RenderDevice for &mut T {
    fn supports_instancing(&self) -> bool {
        (**self).supports_instancing()
    }

    fn max_vertex_index(&self) -> u32 {
        (**self).max_vertex_index()
    }

    fn set_vertex_declaration(&mut self, declaration: Handle<VertexDeclaration>) {
        (**self).set_vertex_declaration(declaration)
    }

    fn set_vertex_buffer(
        &mut self,
        stream: u32,
        buffer: Handle<VertexBuffer>,
        offset: u32,
        stride: u32,
    ) {
        (**self).set_vertex_buffer(stream, buffer, offset, stride)
    }

    fn reset_vertex_stream(&mut self, stream: u32) {
        (**self).reset_vertex_stream(stream)
    }

    fn set_index_buffer(&mut self, buffer: Handle<IndexBuffer>) {
        (**self).set_index_buffer(buffer)
    }

    fn begin_effect(
        &mut self,
        effect: Handle<Effect>,
        technique: Handle<Technique>,
    ) -> Result<u32, DeviceError> {
        (**self).begin_effect(effect, technique)
    }

    fn begin_pass(&mut self, pass: u32) {
        (**self).begin_pass(pass)
    }

    fn end_pass(&mut self) {
        (**self).end_pass()
    }

    fn end_effect(&mut self) {
        (**self).end_effect()
    }

    fn set_property(&mut self, effect: Handle<Effect>, name: &str, value: &PropertyValue) {
        (**self).set_property(effect, name, value)
    }

    fn set_world_matrix(&mut self, matrix: Option<&Mat4>) {
        (**self).set_world_matrix(matrix)
    }

    fn set_world_palette(&mut self, palette: &[Vec4]) {
        (**self).set_world_palette(palette)
    }

    fn commit_changes(&mut self, effect: Handle<Effect>) {
        (**self).commit_changes(effect)
    }

    fn draw_indexed(&mut self, primitive_type: PrimitiveType, group: &PrimitiveGroup) {
        (**self).draw_indexed(primitive_type, group)
    }

    fn draw_indexed_instanced(
        &mut self,
        primitive_type: PrimitiveType,
        group: &PrimitiveGroup,
        instances: u32,
    ) {
        (**self).draw_indexed_instanced(primitive_type, group, instances)
    }

    fn set_stream_frequency(&mut self, stream: u32, frequency: StreamFrequency) {
        (**self).set_stream_frequency(stream, frequency)
    }

    fn set_colour_write_mask(&mut self, mask: ColourWriteMask) {
        (**self).set_colour_write_mask(mask)
    }

    fn create_dynamic_vertex_buffer(
        &mut self,
        size: u64,
    ) -> Result<Handle<VertexBuffer>, DeviceError> {
        (**self).create_dynamic_vertex_buffer(size)
    }

    fn release_vertex_buffer(&mut self, buffer: Handle<VertexBuffer>) {
        (**self).release_vertex_buffer(buffer)
    }

    fn write_vertex_data(
        &mut self,
        buffer: Handle<VertexBuffer>,
        offset: u64,
        data: &[u8],
        lock: LockMode,
    ) -> Result<(), DeviceError> {
        (**self).write_vertex_data(buffer, offset, data, lock)
    }

    fn write_dynamic_indices(
        &mut self,
        format: IndexFormat,
        indices: &[u32],
    ) -> Result<DynamicIndexRange, DeviceError> {
        (**self).write_dynamic_indices(format, indices)
    }
}
