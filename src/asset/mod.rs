pub mod cache;
pub mod handle;
pub mod mesh;

pub use cache::AssetCache;
pub use handle::Handle;
pub use mesh::{BoundingBox, Primitives, Vertices};

use crate::renderer::material::Material;

/// Materials and geometry shared by the producers feeding a draw context.
///
/// Constructed by the owning renderer and passed down by reference.
pub struct RenderResourcePool {
    pub materials: AssetCache<Material>,
    pub vertices: AssetCache<Vertices>,
    pub primitives: AssetCache<Primitives>,
}

impl RenderResourcePool {
    pub fn new() -> Self {
        Self {
            materials: AssetCache::new(),
            vertices: AssetCache::new(),
            primitives: AssetCache::new(),
        }
    }
}

impl Default for RenderResourcePool {
    fn default() -> Self {
        Self::new()
    }
}
