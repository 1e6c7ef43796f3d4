// renderer/render_op.rs

use std::rc::Rc;

use bitflags::bitflags;

use crate::asset::Handle;
use crate::renderer::device::{
    Effect, IndexBuffer, PrimitiveType, Technique, VertexBuffer, VertexDeclaration,
};
use crate::renderer::global_state::ChainIndex;
use crate::renderer::instance::InstanceHandle;
use crate::renderer::material::MaterialProperties;

/// Range of an index buffer making up one drawable group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveGroup {
    pub start_index: u32,
    pub primitive_count: u32,
    pub start_vertex: u32,
    pub vertex_count: u32,
}

impl PrimitiveGroup {
    pub fn new(
        start_index: u32,
        primitive_count: u32,
        start_vertex: u32,
        vertex_count: u32,
    ) -> Self {
        Self {
            start_index,
            primitive_count,
            start_vertex,
            vertex_count,
        }
    }

    /// Groups without vertices or primitives are never submitted.
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0 || self.primitive_count == 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderOpFlags: u32 {
        /// Op may be merged into a hardware-instanced draw.
        const HW_INSTANCING = 1 << 0;
    }
}

/// Technique and vertex declaration an instanced op draws with when it has
/// to be submitted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SingleDrawState {
    pub technique: Handle<Technique>,
    pub vertex_declaration: Handle<VertexDeclaration>,
}

/// Everything needed to issue one draw call.
///
/// All fields are handles or plain values so ops can be sorted and compared
/// cheaply; the material property set is compared by `Rc` identity.
#[derive(Debug, Clone)]
pub struct RenderOp {
    pub effect: Handle<Effect>,
    pub technique: Handle<Technique>,
    pub properties: Rc<MaterialProperties>,
    pub global_state: Option<ChainIndex>,
    pub vertex_declaration: Handle<VertexDeclaration>,
    pub vertex_buffer: Handle<VertexBuffer>,
    pub vertex_offset: u32,
    pub vertex_stride: u32,
    pub index_buffer: Handle<IndexBuffer>,
    pub primitive_type: PrimitiveType,
    pub group: PrimitiveGroup,
    pub instance: InstanceHandle,
    pub flags: RenderOpFlags,
    /// Set on instanced ops; not part of the state key.
    pub fallback: Option<SingleDrawState>,
}

/// Canonical GPU state of a render op, excluding its instance data.
///
/// Ordering clusters ops by the most expensive state first (shader, then
/// material, global state, buffers). Equality is the instancing merge
/// predicate: ops with equal keys draw the same geometry with the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    pub effect: Handle<Effect>,
    pub technique: Handle<Technique>,
    pub properties: usize,
    pub global_state: Option<ChainIndex>,
    pub vertex_declaration: Handle<VertexDeclaration>,
    pub vertex_buffer: Handle<VertexBuffer>,
    pub index_buffer: Handle<IndexBuffer>,
    pub start_index: u32,
    pub vertex_offset: u32,
    pub vertex_stride: u32,
    pub primitive_type: PrimitiveType,
    pub primitive_count: u32,
    pub start_vertex: u32,
    pub vertex_count: u32,
}

impl RenderOp {
    pub fn is_instanced(&self) -> bool {
        self.flags.contains(RenderOpFlags::HW_INSTANCING)
    }

    pub fn properties_id(&self) -> usize {
        Rc::as_ptr(&self.properties) as usize
    }

    pub fn state_key(&self) -> StateKey {
        StateKey {
            effect: self.effect,
            technique: self.technique,
            properties: self.properties_id(),
            global_state: self.global_state,
            vertex_declaration: self.vertex_declaration,
            vertex_buffer: self.vertex_buffer,
            index_buffer: self.index_buffer,
            start_index: self.group.start_index,
            vertex_offset: self.vertex_offset,
            vertex_stride: self.vertex_stride,
            primitive_type: self.primitive_type,
            primitive_count: self.group.primitive_count,
            start_vertex: self.group.start_vertex,
            vertex_count: self.group.vertex_count,
        }
    }

    /// The op rebound to its non-instanced technique and declaration, or
    /// `None` when it has nothing to fall back to.
    pub fn single_draw(&self) -> Option<RenderOp> {
        let fallback = self.fallback.filter(|_| self.is_instanced())?;
        Some(RenderOp {
            technique: fallback.technique,
            vertex_declaration: fallback.vertex_declaration,
            flags: self.flags - RenderOpFlags::HW_INSTANCING,
            fallback: None,
            ..self.clone()
        })
    }

    /// True when `other` can join the same instanced draw as `self`.
    pub fn is_mergeable_with(&self, other: &RenderOp) -> bool {
        self.state_key() == other.state_key()
    }
}
