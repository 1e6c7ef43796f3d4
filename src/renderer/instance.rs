// renderer/instance.rs
//
// Per-frame scratch storage for instance transforms and skinning palettes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Rows per skin matrix in a palette (3x4 affine bone transform).
pub const VEC4_PER_SKIN_MATRIX: usize = 3;

/// Reference to instance data allocated for the current frame.
///
/// Handles are invalidated in bulk when the allocator is reset; a handle from
/// an earlier generation never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    index: u32,
    generation: u32,
}

impl InstanceHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Transform(usize),
    Palette { start: usize, bones: usize },
}

/// Resolved instance data.
#[derive(Debug, Clone, Copy)]
pub enum InstanceData<'a> {
    Transform(&'a Mat4),
    Palette(&'a [Vec4]),
}

impl InstanceData<'_> {
    pub fn is_skinned(&self) -> bool {
        matches!(self, Self::Palette(_))
    }
}

/// GPU layout of one per-instance transform in the instancing stream.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct InstanceTransform {
    pub model: [[f32; 4]; 4], // 64 bytes
}

impl InstanceTransform {
    /// Size in bytes of one element in the instancing stream.
    pub const ELEMENT_SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn from_matrix(model: &Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}

/// Grow-only allocator for instance data, bulk-reset once per frame.
#[derive(Debug)]
pub struct InstanceAllocator {
    slots: Vec<Slot>,
    transforms: Vec<Mat4>,
    palettes: Vec<Vec4>,
    generation: u32,
}

impl InstanceAllocator {
    pub fn new(page_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(page_size),
            transforms: Vec::with_capacity(page_size),
            palettes: Vec::new(),
            generation: 0,
        }
    }

    /// Allocates room for one world matrix, or for `palette_size` skin
    /// matrices when non-zero. The data starts as identity / zero.
    pub fn alloc(&mut self, palette_size: u32) -> InstanceHandle {
        let slot = if palette_size == 0 {
            self.transforms.push(Mat4::IDENTITY);
            Slot::Transform(self.transforms.len() - 1)
        } else {
            let bones = palette_size as usize;
            let start = self.palettes.len();
            self.palettes
                .resize(start + bones * VEC4_PER_SKIN_MATRIX, Vec4::ZERO);
            Slot::Palette { start, bones }
        };

        self.slots.push(slot);
        InstanceHandle::new((self.slots.len() - 1) as u32, self.generation)
    }

    fn slot(&self, handle: InstanceHandle) -> Option<Slot> {
        if handle.generation != self.generation {
            return None;
        }
        self.slots.get(handle.index as usize).copied()
    }

    pub fn get(&self, handle: InstanceHandle) -> Option<InstanceData<'_>> {
        match self.slot(handle)? {
            Slot::Transform(i) => Some(InstanceData::Transform(&self.transforms[i])),
            Slot::Palette { start, bones } => Some(InstanceData::Palette(
                &self.palettes[start..start + bones * VEC4_PER_SKIN_MATRIX],
            )),
        }
    }

    pub fn transform(&self, handle: InstanceHandle) -> Option<&Mat4> {
        match self.get(handle)? {
            InstanceData::Transform(matrix) => Some(matrix),
            InstanceData::Palette(_) => None,
        }
    }

    pub fn transform_mut(&mut self, handle: InstanceHandle) -> Option<&mut Mat4> {
        match self.slot(handle)? {
            Slot::Transform(i) => self.transforms.get_mut(i),
            Slot::Palette { .. } => None,
        }
    }

    pub fn palette_mut(&mut self, handle: InstanceHandle) -> Option<&mut [Vec4]> {
        match self.slot(handle)? {
            Slot::Palette { start, bones } => {
                Some(&mut self.palettes[start..start + bones * VEC4_PER_SKIN_MATRIX])
            }
            Slot::Transform(_) => None,
        }
    }

    /// Number of skin matrices behind `handle`; zero for a plain transform.
    pub fn palette_size(&self, handle: InstanceHandle) -> Option<u32> {
        match self.slot(handle)? {
            Slot::Transform(_) => Some(0),
            Slot::Palette { bones, .. } => Some(bones as u32),
        }
    }

    /// Bytes of instance payload handed out since the last reset.
    pub fn allocated_bytes(&self) -> usize {
        self.transforms.len() * std::mem::size_of::<Mat4>()
            + self.palettes.len() * std::mem::size_of::<Vec4>()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Releases every allocation at once and invalidates outstanding handles.
    pub fn reset(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        self.slots.clear();
        self.transforms.clear();
        self.palettes.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Default for InstanceAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}
