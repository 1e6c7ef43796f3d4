// renderer/recording.rs
//
// Software device that records every submission call. Used by the tests and
// the demo binary; a GPU backend implements the same trait.

use glam::{Mat4, Vec4};
use log::warn;

use crate::asset::{AssetCache, Handle};
use crate::renderer::device::{
    ColourWriteMask, DeviceError, DynamicIndexRange, Effect, IndexBuffer, IndexFormat, LockMode,
    PrimitiveType, RenderDevice, StreamFrequency, Technique, Texture, VertexBuffer,
    VertexDeclaration,
};
use crate::renderer::instance::InstanceTransform;
use crate::renderer::material::PropertyValue;
use crate::renderer::render_op::PrimitiveGroup;

const DEFAULT_MAX_VERTEX_INDEX: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    SetVertexDeclaration(Handle<VertexDeclaration>),
    SetVertexBuffer {
        stream: u32,
        buffer: Handle<VertexBuffer>,
        offset: u32,
        stride: u32,
    },
    ResetVertexStream(u32),
    SetIndexBuffer(Handle<IndexBuffer>),
    BeginEffect {
        effect: Handle<Effect>,
        technique: Handle<Technique>,
    },
    BeginPass(u32),
    EndPass,
    EndEffect,
    SetProperty {
        effect: Handle<Effect>,
        name: String,
        value: PropertyValue,
    },
    SetWorldMatrix(Option<Mat4>),
    SetWorldPalette(Vec<Vec4>),
    CommitChanges(Handle<Effect>),
    DrawIndexed {
        primitive_type: PrimitiveType,
        group: PrimitiveGroup,
    },
    DrawIndexedInstanced {
        primitive_type: PrimitiveType,
        group: PrimitiveGroup,
        instances: u32,
    },
    SetStreamFrequency {
        stream: u32,
        frequency: StreamFrequency,
    },
    SetColourWriteMask(ColourWriteMask),
    CreateVertexBuffer {
        buffer: Handle<VertexBuffer>,
        size: u64,
    },
    ReleaseVertexBuffer(Handle<VertexBuffer>),
    WriteVertexData {
        buffer: Handle<VertexBuffer>,
        offset: u64,
        len: usize,
        lock: LockMode,
    },
    WriteDynamicIndices {
        format: IndexFormat,
        indices: Vec<u32>,
    },
}

impl DeviceCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::DrawIndexed { .. } | Self::DrawIndexedInstanced { .. }
        )
    }
}

/// A [`RenderDevice`] that executes nothing and records everything.
#[derive(Debug)]
pub struct RecordingDevice {
    commands: Vec<DeviceCommand>,
    effects: AssetCache<Effect>,
    declarations: AssetCache<VertexDeclaration>,
    vertex_buffers: AssetCache<VertexBuffer>,
    index_buffers: AssetCache<IndexBuffer>,
    textures: AssetCache<Texture>,
    dynamic_u16: Handle<IndexBuffer>,
    dynamic_u32: Handle<IndexBuffer>,
    supports_instancing: bool,
    max_vertex_index: u32,
    failing_vertex_writes: u32,
    fail_dynamic_indices: bool,
    fail_buffer_creation: bool,
}

impl RecordingDevice {
    pub fn new() -> Self {
        let mut index_buffers = AssetCache::new();
        let dynamic_u16 = index_buffers.insert(IndexBuffer {
            format: IndexFormat::U16,
            indices: Vec::new(),
        });
        let dynamic_u32 = index_buffers.insert(IndexBuffer {
            format: IndexFormat::U32,
            indices: Vec::new(),
        });

        Self {
            commands: Vec::new(),
            effects: AssetCache::new(),
            declarations: AssetCache::new(),
            vertex_buffers: AssetCache::new(),
            index_buffers,
            textures: AssetCache::new(),
            dynamic_u16,
            dynamic_u32,
            supports_instancing: true,
            max_vertex_index: DEFAULT_MAX_VERTEX_INDEX,
            failing_vertex_writes: 0,
            fail_dynamic_indices: false,
            fail_buffer_creation: false,
        }
    }

    pub fn without_instancing() -> Self {
        Self {
            supports_instancing: false,
            ..Self::new()
        }
    }

    pub fn add_effect(&mut self, effect: Effect) -> Handle<Effect> {
        self.effects.insert(effect)
    }

    pub fn add_vertex_declaration(
        &mut self,
        name: impl Into<String>,
        instanced: bool,
    ) -> Handle<VertexDeclaration> {
        self.declarations.insert(VertexDeclaration {
            name: name.into(),
            instanced,
        })
    }

    pub fn add_vertex_buffer(&mut self, data: Vec<u8>) -> Handle<VertexBuffer> {
        self.vertex_buffers.insert(VertexBuffer { data })
    }

    pub fn add_index_buffer(&mut self, indices: Vec<u32>) -> Handle<IndexBuffer> {
        let max = indices.iter().copied().max().unwrap_or(0);
        self.index_buffers.insert(IndexBuffer {
            format: IndexFormat::for_max_index(max),
            indices,
        })
    }

    pub fn add_texture(&mut self, name: impl Into<String>) -> Handle<Texture> {
        self.textures.insert(Texture { name: name.into() })
    }

    pub fn effect(&self, handle: Handle<Effect>) -> Option<&Effect> {
        self.effects.get(handle)
    }

    pub fn vertex_buffer(&self, handle: Handle<VertexBuffer>) -> Option<&VertexBuffer> {
        self.vertex_buffers.get(handle)
    }

    pub fn index_buffer(&self, handle: Handle<IndexBuffer>) -> Option<&IndexBuffer> {
        self.index_buffers.get(handle)
    }

    pub fn dynamic_index_buffer(&self, format: IndexFormat) -> Handle<IndexBuffer> {
        match format {
            IndexFormat::U16 => self.dynamic_u16,
            IndexFormat::U32 => self.dynamic_u32,
        }
    }

    pub fn set_supports_instancing(&mut self, supported: bool) {
        self.supports_instancing = supported;
    }

    pub fn set_max_vertex_index(&mut self, limit: u32) {
        self.max_vertex_index = limit;
    }

    /// Makes the next `count` vertex data writes fail to lock.
    pub fn fail_next_vertex_writes(&mut self, count: u32) {
        self.failing_vertex_writes = count;
    }

    pub fn fail_dynamic_indices(&mut self, fail: bool) {
        self.fail_dynamic_indices = fail;
    }

    pub fn fail_buffer_creation(&mut self, fail: bool) {
        self.fail_buffer_creation = fail;
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn draw_calls(&self) -> impl Iterator<Item = &DeviceCommand> {
        self.commands.iter().filter(|command| command.is_draw())
    }

    pub fn count(&self, predicate: impl Fn(&DeviceCommand) -> bool) -> usize {
        self.commands.iter().filter(|command| predicate(command)).count()
    }

    /// Reads `count` instance transforms starting at element `first`.
    pub fn instance_transforms(
        &self,
        buffer: Handle<VertexBuffer>,
        first: u32,
        count: u32,
    ) -> Option<Vec<Mat4>> {
        let data = &self.vertex_buffer(buffer)?.data;
        let size = InstanceTransform::ELEMENT_SIZE as usize;
        (first..first + count)
            .map(|element| {
                let start = element as usize * size;
                let bytes = data.get(start..start + size)?;
                Some(bytemuck::pod_read_unaligned::<InstanceTransform>(bytes).matrix())
            })
            .collect()
    }

    fn record(&mut self, command: DeviceCommand) {
        log::trace!("{:?}", command);
        self.commands.push(command);
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for RecordingDevice {
    fn supports_instancing(&self) -> bool {
        self.supports_instancing
    }

    fn max_vertex_index(&self) -> u32 {
        self.max_vertex_index
    }

    fn set_vertex_declaration(&mut self, declaration: Handle<VertexDeclaration>) {
        self.record(DeviceCommand::SetVertexDeclaration(declaration));
    }

    fn set_vertex_buffer(
        &mut self,
        stream: u32,
        buffer: Handle<VertexBuffer>,
        offset: u32,
        stride: u32,
    ) {
        self.record(DeviceCommand::SetVertexBuffer {
            stream,
            buffer,
            offset,
            stride,
        });
    }

    fn reset_vertex_stream(&mut self, stream: u32) {
        self.record(DeviceCommand::ResetVertexStream(stream));
    }

    fn set_index_buffer(&mut self, buffer: Handle<IndexBuffer>) {
        self.record(DeviceCommand::SetIndexBuffer(buffer));
    }

    fn begin_effect(
        &mut self,
        effect: Handle<Effect>,
        technique: Handle<Technique>,
    ) -> Result<u32, DeviceError> {
        let passes = self
            .effects
            .get(effect)
            .ok_or(DeviceError::UnknownEffect)?
            .technique(technique)
            .ok_or(DeviceError::UnknownTechnique)?
            .passes;
        self.record(DeviceCommand::BeginEffect { effect, technique });
        Ok(passes)
    }

    fn begin_pass(&mut self, pass: u32) {
        self.record(DeviceCommand::BeginPass(pass));
    }

    fn end_pass(&mut self) {
        self.record(DeviceCommand::EndPass);
    }

    fn end_effect(&mut self) {
        self.record(DeviceCommand::EndEffect);
    }

    fn set_property(&mut self, effect: Handle<Effect>, name: &str, value: &PropertyValue) {
        self.record(DeviceCommand::SetProperty {
            effect,
            name: name.to_string(),
            value: *value,
        });
    }

    fn set_world_matrix(&mut self, matrix: Option<&Mat4>) {
        self.record(DeviceCommand::SetWorldMatrix(matrix.copied()));
    }

    fn set_world_palette(&mut self, palette: &[Vec4]) {
        self.record(DeviceCommand::SetWorldPalette(palette.to_vec()));
    }

    fn commit_changes(&mut self, effect: Handle<Effect>) {
        self.record(DeviceCommand::CommitChanges(effect));
    }

    fn draw_indexed(&mut self, primitive_type: PrimitiveType, group: &PrimitiveGroup) {
        self.record(DeviceCommand::DrawIndexed {
            primitive_type,
            group: *group,
        });
    }

    fn draw_indexed_instanced(
        &mut self,
        primitive_type: PrimitiveType,
        group: &PrimitiveGroup,
        instances: u32,
    ) {
        self.record(DeviceCommand::DrawIndexedInstanced {
            primitive_type,
            group: *group,
            instances,
        });
    }

    fn set_stream_frequency(&mut self, stream: u32, frequency: StreamFrequency) {
        self.record(DeviceCommand::SetStreamFrequency { stream, frequency });
    }

    fn set_colour_write_mask(&mut self, mask: ColourWriteMask) {
        self.record(DeviceCommand::SetColourWriteMask(mask));
    }

    fn create_dynamic_vertex_buffer(
        &mut self,
        size: u64,
    ) -> Result<Handle<VertexBuffer>, DeviceError> {
        if self.fail_buffer_creation {
            return Err(DeviceError::OutOfVideoMemory);
        }
        let buffer = self.vertex_buffers.insert(VertexBuffer {
            data: Vec::with_capacity(size as usize),
        });
        self.record(DeviceCommand::CreateVertexBuffer { buffer, size });
        Ok(buffer)
    }

    fn release_vertex_buffer(&mut self, buffer: Handle<VertexBuffer>) {
        if self.vertex_buffers.remove(buffer).is_none() {
            warn!("Released unknown vertex buffer {:?}", buffer);
        }
        self.record(DeviceCommand::ReleaseVertexBuffer(buffer));
    }

    fn write_vertex_data(
        &mut self,
        buffer: Handle<VertexBuffer>,
        offset: u64,
        data: &[u8],
        lock: LockMode,
    ) -> Result<(), DeviceError> {
        if self.failing_vertex_writes > 0 {
            self.failing_vertex_writes -= 1;
            return Err(DeviceError::LockFailed {
                resource: "vertex buffer",
            });
        }
        let target = self
            .vertex_buffers
            .get_mut(buffer)
            .ok_or(DeviceError::UnknownBuffer)?;

        let start = offset as usize;
        let end = start + data.len();
        if target.data.len() < end {
            target.data.resize(end, 0);
        }
        target.data[start..end].copy_from_slice(data);

        self.record(DeviceCommand::WriteVertexData {
            buffer,
            offset,
            len: data.len(),
            lock,
        });
        Ok(())
    }

    fn write_dynamic_indices(
        &mut self,
        format: IndexFormat,
        indices: &[u32],
    ) -> Result<DynamicIndexRange, DeviceError> {
        if self.fail_dynamic_indices {
            return Err(DeviceError::LockFailed {
                resource: "dynamic index buffer",
            });
        }
        let buffer = self.dynamic_index_buffer(format);
        let target = self
            .index_buffers
            .get_mut(buffer)
            .ok_or(DeviceError::UnknownBuffer)?;
        let start_index = target.indices.len() as u32;
        target.indices.extend_from_slice(indices);

        self.record(DeviceCommand::WriteDynamicIndices {
            format,
            indices: indices.to_vec(),
        });
        Ok(DynamicIndexRange {
            buffer,
            start_index,
        })
    }
}
