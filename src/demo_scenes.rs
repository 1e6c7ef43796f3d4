use std::rc::Rc;

use deferred_draw::asset::{BoundingBox, Handle, Primitives, RenderResourcePool, Vertices};
use deferred_draw::renderer::device::{Effect, PrimitiveType};
use deferred_draw::renderer::{
    ChannelMask, ChannelType, ConstantBlock, DrawContext, GlobalStateBlock, Material,
    MaterialProperties, PrimitiveGroup, PropertyValue, RecordingDevice, RenderDevice,
    RenderingPass, UserDrawItem,
};
use glam::{Mat4, Quat, Vec3, Vec4};
use log::info;

#[allow(dead_code)]
#[derive(Clone, Copy, Debug)]
pub enum DemoScene {
    /// Identical opaque cubes; collapses into a handful of instanced draws.
    Grid { size: i32 },
    /// Nested transparent shells, some with per-triangle sorting.
    GlassStack { layers: u32 },
    /// Grid, glass and a shimmer overlay under a fog block.
    Mixed { size: i32 },
}

/// Materials and meshes registered on the device for the demo scenes.
pub struct DemoAssets {
    pool: RenderResourcePool,
    cube_vertices: Handle<Vertices>,
    cube_primitives: Handle<Primitives>,
    painted: Handle<Material>,
    stone: Handle<Material>,
    glass: Handle<Material>,
    sorted_glass: Handle<Material>,
    haze: Handle<Material>,
}

impl DemoAssets {
    pub fn load(device: &mut RecordingDevice) -> Self {
        let mut effect = Effect::new("standard");
        let main = effect.add_technique("main", 1);
        let instanced = effect.add_technique("main_instanced", 1);
        let glass_technique = effect.add_technique("glass", 2);
        let effect = device.add_effect(effect);

        let declaration = device.add_vertex_declaration("pos_normal_uv", false);
        let instanced_declaration = device.add_vertex_declaration("pos_normal_uv_instanced", true);
        let (positions, indices) = cube_geometry();
        let vertex_buffer = device.add_vertex_buffer(vec![0; positions.len() * 32]);
        let index_buffer = device.add_index_buffer(indices.clone());

        let mut pool = RenderResourcePool::new();
        let vertex_count = positions.len() as u32;
        let triangle_count = indices.len() as u32 / 3;
        let cube_vertices = pool.vertices.insert(
            Vertices::new(declaration, vertex_buffer, 32, positions)
                .with_instanced_declaration(instanced_declaration),
        );
        let cube_primitives = pool.primitives.insert(
            Primitives::new(index_buffer, indices, PrimitiveType::TriangleList).with_group(
                PrimitiveGroup::new(0, triangle_count, 0, vertex_count),
                Vec3::ZERO,
            ),
        );

        let tint = |r: f32, g: f32, b: f32, a: f32| {
            MaterialProperties::new().with("tint", PropertyValue::Vector(Vec4::new(r, g, b, a)))
        };
        let painted = pool.materials.insert(
            Material::new(ChannelType::Opaque, tint(0.8, 0.2, 0.2, 1.0)).with_instanced_pass(
                RenderingPass::Color,
                effect,
                main,
                instanced,
            ),
        );
        let stone = pool.materials.insert(
            Material::new(ChannelType::Opaque, tint(0.5, 0.5, 0.5, 1.0)).with_instanced_pass(
                RenderingPass::Color,
                effect,
                main,
                instanced,
            ),
        );
        let glass = pool.materials.insert(
            Material::new(ChannelType::Transparent, tint(0.6, 0.8, 1.0, 0.4)).with_pass(
                RenderingPass::Color,
                effect,
                glass_technique,
            ),
        );
        let sorted_glass = pool.materials.insert(
            Material::new(ChannelType::TransparentInternalSort, tint(0.9, 0.9, 0.6, 0.3))
                .with_pass(RenderingPass::Color, effect, glass_technique),
        );
        let haze = pool.materials.insert(
            Material::new(ChannelType::ShimmerInternalSort, tint(1.0, 1.0, 1.0, 0.1)).with_pass(
                RenderingPass::Color,
                effect,
                main,
            ),
        );

        Self {
            pool,
            cube_vertices,
            cube_primitives,
            painted,
            stone,
            glass,
            sorted_glass,
            haze,
        }
    }

    fn draw_cube(
        &self,
        ctx: &mut DrawContext<RecordingDevice>,
        material: Handle<Material>,
        transform: Mat4,
    ) {
        let (Some(material), Some(vertices), Some(primitives)) = (
            self.pool.materials.get(material),
            self.pool.vertices.get(self.cube_vertices),
            self.pool.primitives.get(self.cube_primitives),
        ) else {
            log::warn!("Demo asset missing, skipping cube");
            return;
        };

        let instance = ctx.alloc_instance_data(0);
        if let Some(world) = ctx.instance_transform_mut(instance) {
            *world = transform;
        }
        let world_bb =
            BoundingBox::new(Vec3::splat(-0.5), Vec3::splat(0.5)).transformed(&transform);
        ctx.draw_render_op(material, vertices, primitives, 0, instance, &world_bb);
    }
}

impl DemoScene {
    pub fn draw(self, ctx: &mut DrawContext<RecordingDevice>, assets: &DemoAssets, frame: u32) {
        match self {
            DemoScene::Grid { size } => draw_grid(ctx, assets, size, frame),
            DemoScene::GlassStack { layers } => draw_glass_stack(ctx, assets, layers),
            DemoScene::Mixed { size } => {
                let fog: Rc<dyn GlobalStateBlock> = Rc::new(ConstantBlock::new("fog").with(
                    "fogDensity",
                    PropertyValue::Float(0.02),
                    PropertyValue::Float(0.0),
                ));
                ctx.push_global_state_block(Rc::clone(&fog));
                draw_grid(ctx, assets, size, frame);
                draw_glass_stack(ctx, assets, 3);
                ctx.pop_global_state_block(&fog);

                assets.draw_cube(
                    ctx,
                    assets.haze,
                    Mat4::from_scale_rotation_translation(
                        Vec3::splat(4.0),
                        Quat::IDENTITY,
                        Vec3::new(0.0, 2.0, 0.0),
                    ),
                );
                ctx.draw_user_item(
                    Box::new(HeatHaze { frame }),
                    ChannelMask::SHIMMER,
                    0.0,
                );
            }
        }
    }
}

fn draw_grid(ctx: &mut DrawContext<RecordingDevice>, assets: &DemoAssets, size: i32, frame: u32) {
    let spin = Quat::from_rotation_y(frame as f32 * 0.1);
    for x in -size..=size {
        for z in -size..=size {
            let material = if (x + z) % 2 == 0 {
                assets.painted
            } else {
                assets.stone
            };
            let transform = Mat4::from_rotation_translation(
                spin,
                Vec3::new(x as f32 * 1.5, 0.0, z as f32 * 1.5),
            );
            assets.draw_cube(ctx, material, transform);
        }
    }
}

fn draw_glass_stack(ctx: &mut DrawContext<RecordingDevice>, assets: &DemoAssets, layers: u32) {
    for layer in 0..layers {
        let material = if layer % 2 == 0 {
            assets.glass
        } else {
            assets.sorted_glass
        };
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::splat(1.0 + layer as f32),
            Quat::IDENTITY,
            Vec3::new(0.0, 1.0, -4.0 * layer as f32),
        );
        assets.draw_cube(ctx, material, transform);
    }
}

/// Full-screen distortion drawn between queued shimmer ops.
struct HeatHaze {
    frame: u32,
}

impl UserDrawItem for HeatHaze {
    fn draw(&mut self, device: &mut dyn RenderDevice) {
        device.set_world_matrix(None);
        info!("Heat haze overlay drawn for frame {}", self.frame);
    }

    fn fini(self: Box<Self>) {
        info!("Heat haze overlay released for frame {}", self.frame);
    }
}

/// Unit cube with one vertex per corner.
fn cube_geometry() -> (Vec<Vec3>, Vec<u32>) {
    let positions = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            )
        })
        .collect();
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    (positions, indices)
}
