// renderer/channel.rs

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use glam::Vec3;

use crate::renderer::device::RenderDevice;
use crate::renderer::instance::InstanceAllocator;
use crate::renderer::render_op::RenderOp;

/// Channel a material declares it renders in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Opaque,
    Transparent,
    /// Transparent, with triangles sorted back to front at flush.
    TransparentInternalSort,
    Shimmer,
    /// Shimmer, with triangles sorted back to front at flush.
    ShimmerInternalSort,
}

impl ChannelType {
    pub fn mask(self) -> ChannelMask {
        match self {
            Self::Opaque => ChannelMask::OPAQUE,
            Self::Transparent | Self::TransparentInternalSort => ChannelMask::TRANSPARENT,
            Self::Shimmer | Self::ShimmerInternalSort => ChannelMask::SHIMMER,
        }
    }

    pub fn needs_internal_sort(self) -> bool {
        matches!(
            self,
            Self::TransparentInternalSort | Self::ShimmerInternalSort
        )
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u32 {
        const OPAQUE = 0x1;
        const TRANSPARENT = 0x2;
        const SHIMMER = 0x4;
        const ALL = Self::OPAQUE.bits() | Self::TRANSPARENT.bits() | Self::SHIMMER.bits();
    }
}

/// Draw that cannot be expressed as a render op.
///
/// Items are drawn in their channel's order with batching suspended around
/// them. `fini` is called once the item is cleared from its channel, or
/// straight away if its channel was not collecting.
pub trait UserDrawItem {
    fn draw(&mut self, device: &mut dyn RenderDevice);

    fn fini(self: Box<Self>) {}
}

/// CPU copy of the geometry needed to re-sort triangles.
#[derive(Debug, Clone)]
pub struct SortGeometry {
    pub indices: Rc<[u32]>,
    pub positions: Rc<[Vec3]>,
}

/// Entry of the transparent and shimmer channels.
pub enum WrappedOp {
    Normal(RenderOp),
    InternalSort {
        op: RenderOp,
        geometry: SortGeometry,
    },
    UserItem(Box<dyn UserDrawItem>),
}

impl WrappedOp {
    pub fn render_op(&self) -> Option<&RenderOp> {
        match self {
            Self::Normal(op) | Self::InternalSort { op, .. } => Some(op),
            Self::UserItem(_) => None,
        }
    }

    /// Releases the entry after its channel was cleared.
    pub fn finish(self) {
        if let Self::UserItem(item) = self {
            item.fini();
        }
    }
}

impl fmt::Debug for WrappedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(op) => f.debug_tuple("Normal").field(op).finish(),
            Self::InternalSort { op, geometry } => f
                .debug_struct("InternalSort")
                .field("op", op)
                .field("triangles", &(geometry.indices.len() / 3))
                .finish(),
            Self::UserItem(_) => f.write_str("UserItem"),
        }
    }
}

#[derive(Debug)]
pub struct DistanceSortedOp {
    /// View-space depth used to order the channel back to front.
    pub distance: f32,
    pub op: WrappedOp,
}

/// Per-channel queues filled while their channel is collecting.
#[derive(Debug)]
pub struct ChannelCollector {
    pub(crate) opaque: Vec<RenderOp>,
    pub(crate) transparent: Vec<DistanceSortedOp>,
    pub(crate) shimmer: Vec<WrappedOp>,
    pub(crate) instances: InstanceAllocator,
    collecting: ChannelMask,
}

impl ChannelCollector {
    pub fn new(opaque_capacity: usize, instance_page_size: usize) -> Self {
        Self {
            opaque: Vec::with_capacity(opaque_capacity),
            transparent: Vec::new(),
            shimmer: Vec::new(),
            instances: InstanceAllocator::new(instance_page_size),
            collecting: ChannelMask::empty(),
        }
    }

    pub fn begin(&mut self, mask: ChannelMask) {
        debug_assert!(
            !self.collecting.intersects(mask),
            "channels {:?} are already collecting",
            self.collecting & mask
        );
        if self.collecting.intersects(mask) {
            log::warn!("begin() on channels already collecting: {:?}", self.collecting & mask);
        }
        self.collecting |= mask;
    }

    pub fn end(&mut self, mask: ChannelMask) {
        debug_assert!(
            self.collecting.contains(mask),
            "channels {:?} are not collecting",
            mask - self.collecting
        );
        if !self.collecting.contains(mask) {
            log::warn!("end() on channels not collecting: {:?}", mask - self.collecting);
        }
        self.collecting -= mask;
    }

    pub fn collecting(&self) -> ChannelMask {
        self.collecting
    }

    pub fn is_collecting(&self, mask: ChannelMask) -> bool {
        self.collecting.contains(mask)
    }

    pub fn push_opaque(&mut self, op: RenderOp) {
        self.opaque.push(op);
    }

    pub fn push_transparent(&mut self, distance: f32, op: WrappedOp) {
        self.transparent.push(DistanceSortedOp { distance, op });
    }

    pub fn push_shimmer(&mut self, op: WrappedOp) {
        self.shimmer.push(op);
    }

    pub fn opaque(&self) -> &[RenderOp] {
        &self.opaque
    }

    pub fn transparent(&self) -> &[DistanceSortedOp] {
        &self.transparent
    }

    pub fn shimmer(&self) -> &[WrappedOp] {
        &self.shimmer
    }

    /// Number of queued entries across the channels in `mask`.
    pub fn len(&self, mask: ChannelMask) -> usize {
        let mut total = 0;
        if mask.contains(ChannelMask::OPAQUE) {
            total += self.opaque.len();
        }
        if mask.contains(ChannelMask::TRANSPARENT) {
            total += self.transparent.len();
        }
        if mask.contains(ChannelMask::SHIMMER) {
            total += self.shimmer.len();
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty() && self.shimmer.is_empty()
    }

    pub fn instances(&self) -> &InstanceAllocator {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceAllocator {
        &mut self.instances
    }
}
