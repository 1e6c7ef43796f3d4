use std::rc::Rc;

use glam::{Mat4, Vec3};

use crate::asset::Handle;
use crate::renderer::device::{IndexBuffer, PrimitiveType, VertexBuffer, VertexDeclaration};
use crate::renderer::render_op::PrimitiveGroup;

/// Vertex data of a mesh as the draw context consumes it.
#[derive(Clone, Debug)]
pub struct Vertices {
    declaration: Handle<VertexDeclaration>,
    instanced_declaration: Option<Handle<VertexDeclaration>>,
    buffer: Handle<VertexBuffer>,
    offset: u32,
    stride: u32,
    positions: Rc<[Vec3]>,
}

impl Vertices {
    pub fn new(
        declaration: Handle<VertexDeclaration>,
        buffer: Handle<VertexBuffer>,
        stride: u32,
        positions: impl Into<Rc<[Vec3]>>,
    ) -> Self {
        Self {
            declaration,
            instanced_declaration: None,
            buffer,
            offset: 0,
            stride,
            positions: positions.into(),
        }
    }

    /// Declaration that also reads the per-instance transform stream.
    pub fn with_instanced_declaration(mut self, declaration: Handle<VertexDeclaration>) -> Self {
        self.instanced_declaration = Some(declaration);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Declaration to bind for a draw; `None` when an instanced draw was
    /// requested but these vertices cannot be instanced.
    pub fn declaration(&self, instanced: bool) -> Option<Handle<VertexDeclaration>> {
        if instanced {
            self.instanced_declaration
        } else {
            Some(self.declaration)
        }
    }

    pub fn supports_instancing(&self) -> bool {
        self.instanced_declaration.is_some()
    }

    pub fn buffer(&self) -> Handle<VertexBuffer> {
        self.buffer
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// CPU copy of the vertex positions, used for per-triangle sorting.
    pub fn positions(&self) -> &Rc<[Vec3]> {
        &self.positions
    }
}

/// Index data split into drawable groups.
#[derive(Clone, Debug)]
pub struct Primitives {
    index_buffer: Handle<IndexBuffer>,
    indices: Rc<[u32]>,
    primitive_type: PrimitiveType,
    groups: Vec<PrimitiveGroup>,
    origins: Vec<Vec3>,
}

impl Primitives {
    pub fn new(
        index_buffer: Handle<IndexBuffer>,
        indices: impl Into<Rc<[u32]>>,
        primitive_type: PrimitiveType,
    ) -> Self {
        Self {
            index_buffer,
            indices: indices.into(),
            primitive_type,
            groups: Vec::new(),
            origins: Vec::new(),
        }
    }

    /// Adds a group whose geometry is centred on `origin` in model space.
    pub fn with_group(mut self, group: PrimitiveGroup, origin: Vec3) -> Self {
        self.groups.push(group);
        self.origins.push(origin);
        self
    }

    pub fn index_buffer(&self) -> Handle<IndexBuffer> {
        self.index_buffer
    }

    pub fn indices(&self) -> &Rc<[u32]> {
        &self.indices
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    pub fn group(&self, index: usize) -> Option<&PrimitiveGroup> {
        self.groups.get(index)
    }

    pub fn origin(&self, index: usize) -> Vec3 {
        self.origins.get(index).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_point(point: Vec3) -> Self {
        Self::new(point, point)
    }

    pub fn centre(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Box enclosing this one after transforming its corners by `matrix`.
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            let p = matrix.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }
    }
}
